//! Data providers for training, evaluation and inference.
//!
//! A paired example is a `(target, source)` channel-concatenated image in
//! `[-1, 1]`. On disk each pair is one PNG of size `2 * width x width` with
//! the target on the left and the source on the right.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::error::{Font2FontError, Result};
use crate::model::bridge::ImageBatch;

/// Supplies paired batches to the training loop and the evaluator.
pub trait PairedProvider {
    /// `(channels, height, width)` of one paired example.
    fn example_shape(&self) -> [usize; 3];

    /// Number of training batches in one epoch.
    fn total_batches(&self, batch_size: usize) -> usize;

    /// Reshuffle for a new epoch; batch indices restart at 0.
    fn start_epoch(&mut self, rng: &mut dyn RngCore);

    /// The `batch_idx`-th training batch of the current epoch, always full.
    fn train_batch(&self, batch_idx: usize, batch_size: usize) -> Result<ImageBatch>;

    /// Next validation batch, cycling through the held-out examples.
    fn val_batch(&mut self, batch_size: usize) -> Result<ImageBatch>;

    /// Every held-out example once, in order; the last batch may be short.
    fn val_batches(&self, batch_size: usize) -> Result<Vec<ImageBatch>>;

    /// Examples without a ground-truth target for the given training batch.
    fn no_target_batch(&self, _batch_idx: usize, _batch_size: usize) -> Result<Option<ImageBatch>> {
        Ok(None)
    }
}

/// Supplies source glyphs for inference.
pub trait SourceProvider {
    /// `(channels, height, width)` of one source image.
    fn source_shape(&self) -> [usize; 3];

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed-size batches; the last one is padded by repeating its final image.
    fn batches(&self, batch_size: usize) -> Result<Vec<ImageBatch>>;
}

/// Paired examples held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryPairs {
    train: Vec<Vec<f32>>,
    val: Vec<Vec<f32>>,
    no_target: Vec<Vec<f32>>,
    shape: [usize; 3],
    order: Vec<usize>,
    val_cursor: usize,
}

fn check_lengths(examples: &[Vec<f32>], shape: [usize; 3], what: &str) -> Result<()> {
    let expected: usize = shape.iter().product();
    match examples.iter().position(|e| e.len() != expected) {
        Some(i) => Err(Font2FontError::Data(format!(
            "{what} example {i} has {} values, expected {expected}",
            examples[i].len()
        ))),
        None => Ok(()),
    }
}

/// Gather `batch_size` examples starting at `start`, wrapping around.
fn wrapped_batch(examples: &[Vec<f32>], order: Option<&[usize]>, start: usize, batch_size: usize, shape: [usize; 3]) -> Result<ImageBatch> {
    if examples.is_empty() {
        return Err(Font2FontError::Data("no examples available".into()));
    }
    let images: Vec<&[f32]> = (0..batch_size)
        .map(|offset| {
            let position = (start + offset) % examples.len();
            let idx = order.map_or(position, |order| order[position]);
            examples[idx].as_slice()
        })
        .collect();
    ImageBatch::from_images(&images, shape)
}

impl InMemoryPairs {
    /// Build from training and held-out examples of shape `shape`.
    pub fn new(train: Vec<Vec<f32>>, val: Vec<Vec<f32>>, shape: [usize; 3]) -> Result<Self> {
        if train.is_empty() {
            return Err(Font2FontError::Data("training set is empty".into()));
        }
        check_lengths(&train, shape, "training")?;
        check_lengths(&val, shape, "validation")?;
        let order = (0..train.len()).collect();
        Ok(Self {
            train,
            val,
            no_target: Vec::new(),
            shape,
            order,
            val_cursor: 0,
        })
    }

    /// Attach unpaired examples; only their source channels are used.
    pub fn with_no_target(mut self, no_target: Vec<Vec<f32>>) -> Result<Self> {
        check_lengths(&no_target, self.shape, "no-target")?;
        self.no_target = no_target;
        Ok(self)
    }

    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn val_len(&self) -> usize {
        self.val.len()
    }

    /// Held-out examples fall back to the training set when none were given.
    fn held_out(&self) -> &[Vec<f32>] {
        if self.val.is_empty() {
            &self.train
        } else {
            &self.val
        }
    }
}

impl PairedProvider for InMemoryPairs {
    fn example_shape(&self) -> [usize; 3] {
        self.shape
    }

    fn total_batches(&self, batch_size: usize) -> usize {
        self.train.len().div_ceil(batch_size.max(1))
    }

    fn start_epoch(&mut self, rng: &mut dyn RngCore) {
        self.order.shuffle(rng);
    }

    fn train_batch(&self, batch_idx: usize, batch_size: usize) -> Result<ImageBatch> {
        wrapped_batch(&self.train, Some(&self.order), batch_idx * batch_size, batch_size, self.shape)
    }

    fn val_batch(&mut self, batch_size: usize) -> Result<ImageBatch> {
        let start = self.val_cursor;
        let batch = wrapped_batch(self.held_out(), None, start, batch_size, self.shape)?;
        self.val_cursor = (start + batch_size) % self.held_out().len();
        Ok(batch)
    }

    fn val_batches(&self, batch_size: usize) -> Result<Vec<ImageBatch>> {
        self.held_out()
            .chunks(batch_size.max(1))
            .map(|chunk| {
                let images: Vec<&[f32]> = chunk.iter().map(Vec::as_slice).collect();
                ImageBatch::from_images(&images, self.shape)
            })
            .collect()
    }

    fn no_target_batch(&self, batch_idx: usize, batch_size: usize) -> Result<Option<ImageBatch>> {
        if self.no_target.is_empty() {
            return Ok(None);
        }
        wrapped_batch(&self.no_target, None, batch_idx * batch_size, batch_size, self.shape).map(Some)
    }
}

/// Source glyphs held in memory.
#[derive(Debug, Clone)]
pub struct InMemorySources {
    images: Vec<Vec<f32>>,
    shape: [usize; 3],
}

impl InMemorySources {
    pub fn new(images: Vec<Vec<f32>>, shape: [usize; 3]) -> Result<Self> {
        check_lengths(&images, shape, "source")?;
        Ok(Self { images, shape })
    }
}

impl SourceProvider for InMemorySources {
    fn source_shape(&self) -> [usize; 3] {
        self.shape
    }

    fn len(&self) -> usize {
        self.images.len()
    }

    fn batches(&self, batch_size: usize) -> Result<Vec<ImageBatch>> {
        let batch_size = batch_size.max(1);
        self.images
            .chunks(batch_size)
            .map(|chunk| {
                let mut images: Vec<&[f32]> = chunk.iter().map(Vec::as_slice).collect();
                if let Some(last) = images.last().copied() {
                    images.resize(batch_size, last);
                }
                ImageBatch::from_images(&images, self.shape)
            })
            .collect()
    }
}

/// Map a byte to `[-1, 1]`.
pub fn normalize_pixel(value: u8) -> f32 {
    value as f32 / 127.5 - 1.0
}

/// PNG files of `dir`, sorted by name.
pub fn list_pngs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Decode a PNG into `(channels, height, width)` floats in `[-1, 1]`.
fn load_planar(path: &Path, channels: usize) -> Result<(Vec<f32>, u32, u32)> {
    let image = image::open(path)?;
    let (width, height, interleaved) = match channels {
        1 => {
            let gray = image.to_luma8();
            (gray.width(), gray.height(), gray.into_raw())
        }
        3 => {
            let rgb = image.to_rgb8();
            (rgb.width(), rgb.height(), rgb.into_raw())
        }
        other => {
            return Err(Font2FontError::Data(format!(
                "{} channels unsupported for {}; use 1 or 3",
                other,
                path.display()
            )))
        }
    };

    let plane = (width * height) as usize;
    let mut planar = vec![0.0_f32; plane * channels];
    for (i, value) in interleaved.into_iter().enumerate() {
        planar[(i % channels) * plane + i / channels] = normalize_pixel(value);
    }
    Ok((planar, width, height))
}

/// Copy columns `[x0, x0 + width)` of a planar image with `row_width` columns.
fn crop_columns(planar: &[f32], channels: usize, height: usize, row_width: usize, x0: usize, width: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(channels * height * width);
    for c in 0..channels {
        for y in 0..height {
            let row = (c * height + y) * row_width;
            out.extend_from_slice(&planar[row + x0..row + x0 + width]);
        }
    }
    out
}

/// Load one `[target | source]` PNG as a paired example with
/// `output_filters + input_filters` channels.
pub fn load_pair_file(path: &Path, width: usize, input_filters: usize, output_filters: usize) -> Result<Vec<f32>> {
    let (target, tw, th) = load_planar(path, output_filters)?;
    if tw as usize != 2 * width || th as usize != width {
        return Err(Font2FontError::Data(format!(
            "{} is {tw}x{th}, expected {}x{width}",
            path.display(),
            2 * width
        )));
    }
    let source = if input_filters == output_filters {
        target.clone()
    } else {
        load_planar(path, input_filters)?.0
    };

    let mut example = crop_columns(&target, output_filters, width, 2 * width, 0, width);
    example.extend(crop_columns(&source, input_filters, width, 2 * width, width, width));
    Ok(example)
}

/// Load one `width x width` source glyph PNG.
pub fn load_source_file(path: &Path, width: usize, channels: usize) -> Result<Vec<f32>> {
    let (planar, w, h) = load_planar(path, channels)?;
    if w as usize != width || h as usize != width {
        return Err(Font2FontError::Data(format!(
            "{} is {w}x{h}, expected {width}x{width}",
            path.display()
        )));
    }
    Ok(planar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn examples(n: usize, len: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32; len]).collect()
    }

    fn first_values(batch: &ImageBatch) -> Vec<f32> {
        (0..batch.len()).map(|i| batch.image(i)[0]).collect()
    }

    #[test]
    fn test_train_batches_wrap_to_full_size() {
        let provider = InMemoryPairs::new(examples(5, 8), vec![], [2, 2, 2]).unwrap();
        assert_eq!(provider.total_batches(2), 3);

        let last = provider.train_batch(2, 2).unwrap();
        assert_eq!(last.shape, [2, 2, 2, 2]);
        assert_eq!(first_values(&last), vec![4.0, 0.0]);
    }

    #[test]
    fn test_epoch_shuffle_is_a_permutation() {
        let mut provider = InMemoryPairs::new(examples(6, 4), vec![], [1, 2, 2]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        provider.start_epoch(&mut rng);

        let mut seen: Vec<f32> = (0..3)
            .flat_map(|b| first_values(&provider.train_batch(b, 2).unwrap()))
            .collect();
        seen.sort_by(f32::total_cmp);
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_val_batch_cycles_and_val_batches_cover_once() {
        let mut provider = InMemoryPairs::new(examples(2, 4), examples(3, 4), [1, 2, 2]).unwrap();
        assert_eq!(first_values(&provider.val_batch(2).unwrap()), vec![0.0, 1.0]);
        assert_eq!(first_values(&provider.val_batch(2).unwrap()), vec![2.0, 0.0]);

        let all = provider.val_batches(2).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].len(), 1);
    }

    #[test]
    fn test_source_batches_pad_with_last_image() {
        let sources = InMemorySources::new(examples(3, 4), [1, 2, 2]).unwrap();
        let batches = sources.batches(2).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(first_values(&batches[1]), vec![2.0, 2.0]);
    }

    #[test]
    fn test_rejects_wrong_example_length() {
        assert!(InMemoryPairs::new(vec![vec![0.0; 3]], vec![], [1, 2, 2]).is_err());
        assert!(InMemoryPairs::new(vec![], vec![], [1, 2, 2]).is_err());
    }

    #[test]
    fn test_listed_pair_files_split_target_and_source() {
        let dir = tempfile::tempdir().unwrap();
        // Left half white (target), right half black (source).
        let pair = image::GrayImage::from_fn(8, 4, |x, _| image::Luma([if x < 4 { 255 } else { 0 }]));
        pair.save(dir.path().join("0001.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let paths = list_pngs(dir.path()).unwrap();
        assert_eq!(paths, vec![dir.path().join("0001.png")]);

        let loaded = load_pair_file(&paths[0], 4, 1, 1).unwrap();
        assert_eq!(loaded.len(), 2 * 16);
        assert!(loaded[..16].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(loaded[16..].iter().all(|v| (*v + 1.0).abs() < 1e-6));

        assert!(load_pair_file(&paths[0], 8, 1, 1).is_err());
    }

    #[test]
    fn test_source_file_must_be_square_at_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glyph.png");
        image::GrayImage::from_fn(4, 4, |_, y| image::Luma([if y < 2 { 255 } else { 0 }]))
            .save(&path)
            .unwrap();

        let glyph = load_source_file(&path, 4, 1).unwrap();
        assert_eq!(glyph.len(), 16);
        assert!((glyph[0] - 1.0).abs() < 1e-6);
        assert!((glyph[15] + 1.0).abs() < 1e-6);
        assert!(load_source_file(&path, 8, 1).is_err());
    }
}
