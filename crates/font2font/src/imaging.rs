//! PNG output for samples, inference tiles and evaluation images.

use std::path::Path;

use image::{imageops, DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use crate::error::{Font2FontError, Result};
use crate::model::bridge::ImageBatch;

/// Map a `[-1, 1]` value to a byte.
pub fn scale_back(value: f32) -> u8 {
    ((value + 1.0) / 2.0 * 255.0).round().clamp(0.0, 255.0) as u8
}

/// An 8-bit grayscale or RGB image being assembled for output.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    image: DynamicImage,
}

impl Canvas {
    pub fn blank(width: usize, height: usize, channels: usize) -> Result<Self> {
        let (width, height) = (width as u32, height as u32);
        let image = match channels {
            1 => DynamicImage::new_luma8(width, height),
            3 => DynamicImage::new_rgb8(width, height),
            other => return Err(Font2FontError::Data(format!("cannot draw a {other}-channel image"))),
        };
        Ok(Self { image })
    }

    /// Convert one planar `(channels, height, width)` image in `[-1, 1]`.
    pub fn from_planar(values: &[f32], [channels, height, width]: [usize; 3]) -> Result<Self> {
        let plane = height * width;
        if values.len() < channels * plane {
            return Err(Font2FontError::Data(format!(
                "{} values do not fill a {channels}x{height}x{width} image",
                values.len()
            )));
        }
        let at = |c: usize, x: u32, y: u32| scale_back(values[c * plane + y as usize * width + x as usize]);
        let image = match channels {
            1 => DynamicImage::ImageLuma8(GrayImage::from_fn(width as u32, height as u32, |x, y| Luma([at(0, x, y)]))),
            3 => DynamicImage::ImageRgb8(RgbImage::from_fn(width as u32, height as u32, |x, y| {
                Rgb([at(0, x, y), at(1, x, y), at(2, x, y)])
            })),
            other => return Err(Font2FontError::Data(format!("cannot draw a {other}-channel image"))),
        };
        Ok(Self { image })
    }

    pub fn width(&self) -> usize {
        self.image.width() as usize
    }

    pub fn height(&self) -> usize {
        self.image.height() as usize
    }

    pub fn channels(&self) -> usize {
        self.image.color().channel_count() as usize
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    fn paste(&mut self, tile: &Canvas, x: usize, y: usize) {
        imageops::replace(&mut self.image, &tile.image, x as i64, y as i64);
    }

    /// Tile a batch into a `rows x cols` grid, filled row by row.
    pub fn merge(batch: &ImageBatch, rows: usize, cols: usize) -> Result<Self> {
        if batch.len() > rows * cols {
            return Err(Font2FontError::Data(format!(
                "{} images do not fit a {rows}x{cols} grid",
                batch.len()
            )));
        }
        let [channels, height, width] = batch.image_shape();
        let mut canvas = Self::blank(width * cols, height * rows, channels)?;
        for index in 0..batch.len() {
            let tile = Self::from_planar(batch.image(index), [channels, height, width])?;
            canvas.paste(&tile, (index % cols) * width, (index / cols) * height);
        }
        Ok(canvas)
    }

    /// Place canvases side by side; all must share height and channels.
    pub fn hconcat(parts: &[Canvas]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| Font2FontError::Data("nothing to concatenate".into()))?;
        if parts.iter().any(|p| p.height() != first.height() || p.channels() != first.channels()) {
            return Err(Font2FontError::Data("hconcat needs equal heights and channels".into()));
        }
        let width = parts.iter().map(Canvas::width).sum();
        let mut canvas = Self::blank(width, first.height(), first.channels())?;
        let mut x = 0;
        for part in parts {
            canvas.paste(part, x, 0);
            x += part.width();
        }
        Ok(canvas)
    }

    /// Stack canvases top to bottom; all must share width and channels.
    pub fn vconcat(parts: &[Canvas]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| Font2FontError::Data("nothing to concatenate".into()))?;
        if parts.iter().any(|p| p.width() != first.width() || p.channels() != first.channels()) {
            return Err(Font2FontError::Data("vconcat needs equal widths and channels".into()));
        }
        let height = parts.iter().map(Canvas::height).sum();
        let mut canvas = Self::blank(first.width(), height, first.channels())?;
        let mut y = 0;
        for part in parts {
            canvas.paste(part, 0, y);
            y += part.height();
        }
        Ok(canvas)
    }

    /// Write as PNG, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}
