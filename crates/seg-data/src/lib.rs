//! Data access for the segmentation experiments: fixed-length indexed
//! collections of `(image, label)` pairs ready for a 2D model.

pub mod brats;
pub mod error;
pub mod resize;

pub use brats::{BratsMidAxialBinary, DEFAULT_BASE_PATH, DEFAULT_OUT_SHAPE};
pub use error::DatasetError;

use ndarray::Array3;

#[derive(Debug, Clone)]
pub struct Sample {
    pub case_id: String,
    /// `(1, H, W)` single-channel image.
    pub image: Array3<f32>,
    /// `(1, H, W)` binary mask, values in `{0, 1}`.
    pub label: Array3<u8>,
}

pub trait SegmentationDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError>;

    fn num_image_channels(&self) -> usize;

    fn num_classes(&self) -> usize;
}
