//! Tensor bridge: host-side image batches (`Vec<f32>`) to and from burn tensors.
//!
//! Data providers and image writers work on plain `ImageBatch` values in
//! `(batch, channels, height, width)` layout; the model only ever sees
//! `Tensor<B, 4>`.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{Font2FontError, Result};

/// A batch of images in `(batch, channels, height, width)` layout, values in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub data: Vec<f32>,
    pub shape: [usize; 4],
}

impl ImageBatch {
    pub fn new(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Font2FontError::Data(format!(
                "batch of shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    /// Stack single images of shape `(channels, height, width)`.
    pub fn from_images(images: &[&[f32]], image_shape: [usize; 3]) -> Result<Self> {
        if images.is_empty() {
            return Err(Font2FontError::Data("cannot build an empty batch".into()));
        }
        let per_image: usize = image_shape.iter().product();
        let mut data = Vec::with_capacity(per_image * images.len());
        for (i, image) in images.iter().enumerate() {
            if image.len() != per_image {
                return Err(Font2FontError::Data(format!(
                    "image {i} has {} values, expected {per_image}",
                    image.len()
                )));
            }
            data.extend_from_slice(image);
        }
        let [channels, height, width] = image_shape;
        Self::new(data, [images.len(), channels, height, width])
    }

    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.shape[0] == 0
    }

    /// `(channels, height, width)` of each image.
    pub fn image_shape(&self) -> [usize; 3] {
        [self.shape[1], self.shape[2], self.shape[3]]
    }

    /// Values of the `index`-th image.
    pub fn image(&self, index: usize) -> &[f32] {
        let per_image = self.shape[1] * self.shape[2] * self.shape[3];
        &self.data[index * per_image..(index + 1) * per_image]
    }
}

/// Upload a host batch to `device`.
pub fn batch_to_tensor<B: Backend>(batch: &ImageBatch, device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_data(TensorData::new(batch.data.clone(), batch.shape), device)
}

/// Download a 4D tensor into a host batch.
pub fn tensor_to_batch<B: Backend>(tensor: Tensor<B, 4>) -> Result<ImageBatch> {
    let shape = tensor.dims();
    let data = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Font2FontError::Data(format!("failed to read tensor data: {e:?}")))?;
    ImageBatch::new(data, shape)
}

/// Extract f64 values from a burn 1D tensor.
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Result<Vec<f64>> {
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Font2FontError::Data(format!("failed to read tensor data: {e:?}")))?;
    Ok(values.into_iter().map(|v| v as f64).collect())
}

/// Extract a single f64 scalar from a burn 1D tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_batch_round_trip() {
        let device = Default::default();
        let data: Vec<f32> = (0..24).map(|v| v as f32 / 24.0).collect();
        let batch = ImageBatch::new(data.clone(), [2, 3, 2, 2]).unwrap();

        let tensor = batch_to_tensor::<TestBackend>(&batch, &device);
        assert_eq!(tensor.dims(), [2, 3, 2, 2]);

        // Second image, first channel, top-left pixel.
        let val: f32 = tensor.clone().slice([1..2, 0..1, 0..1, 0..1]).into_scalar().elem();
        assert!((val - 12.0 / 24.0).abs() < 1e-6);

        let back = tensor_to_batch(tensor).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        assert!(ImageBatch::new(vec![0.0; 7], [2, 1, 2, 2]).is_err());

        let a = vec![0.0_f32; 4];
        let b = vec![0.0_f32; 3];
        assert!(ImageBatch::from_images(&[&a, &b], [1, 2, 2]).is_err());
        assert!(ImageBatch::from_images(&[], [1, 2, 2]).is_err());
    }

    #[test]
    fn test_image_slices() {
        let a = vec![1.0_f32; 4];
        let b = vec![2.0_f32; 4];
        let batch = ImageBatch::from_images(&[&a, &b], [1, 2, 2]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.image_shape(), [1, 2, 2]);
        assert_eq!(batch.image(1), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_tensor_to_vec() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 1>::from_data(TensorData::from([1.0_f32, 2.5, -3.0]), &device);

        let values = tensor_to_vec::<TestBackend>(tensor).unwrap();
        assert_eq!(values.len(), 3);
        assert!((values[1] - 2.5).abs() < 1e-5);

        let scalar = Tensor::<TestBackend, 1>::from_data(TensorData::from([42.0_f32]), &device);
        assert!((tensor_to_f64::<TestBackend>(scalar) - 42.0).abs() < 1e-5);
    }
}
