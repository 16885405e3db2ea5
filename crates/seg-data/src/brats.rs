use crate::error::DatasetError;
use crate::resize::{resize_cubic, resize_nearest};
use crate::{Sample, SegmentationDataset};
use ndarray::{Array2, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_BASE_PATH: &str = "../../data/testbrats/";
pub const DEFAULT_OUT_SHAPE: (usize, usize) = (128, 128);

const CASE_PREFIX: &str = "BraTS-GLI-";
const NORM_EPS: f64 = 1e-8;

/// BraTS glioma cases reduced to binary 2D segmentation: the mid axial slice
/// of the FLAIR volume against the Whole Tumor mask.
#[derive(Debug, Clone)]
pub struct BratsMidAxialBinary {
    case_dirs: Vec<PathBuf>,
    out_shape: (usize, usize),
    normalize: bool,
}

impl BratsMidAxialBinary {
    /// Indexes every `BraTS-GLI-*` directory under `base_path`. `out_shape`
    /// is `(height, width)`, the order of the returned `(1, H, W)` arrays.
    /// OpenCV-style `dsize` tuples are `(width, height)`; swap them when
    /// passing a non-square shape from such code.
    pub fn new(
        base_path: impl AsRef<Path>,
        out_shape: (usize, usize),
        normalize: bool,
    ) -> Result<Self, DatasetError> {
        let base = base_path.as_ref();
        info!(base = %base.display(), "loading BraTS cases");
        let pattern = format!(
            "{}/{}*",
            glob::Pattern::escape(&base.to_string_lossy()),
            CASE_PREFIX
        );
        let mut case_dirs = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry.map_err(std::io::Error::from)?;
            if path.is_dir() {
                case_dirs.push(path);
            }
        }
        if case_dirs.is_empty() {
            return Err(DatasetError::NoCases {
                base: base.to_path_buf(),
            });
        }
        case_dirs.sort();
        debug!(cases = case_dirs.len(), "indexed BraTS cases");
        Ok(Self {
            case_dirs,
            out_shape,
            normalize,
        })
    }

    pub fn out_shape(&self) -> (usize, usize) {
        self.out_shape
    }

    pub fn case_ids(&self) -> impl Iterator<Item = String> + '_ {
        self.case_dirs.iter().map(|dir| case_id(dir))
    }
}

impl SegmentationDataset for BratsMidAxialBinary {
    fn len(&self) -> usize {
        self.case_dirs.len()
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        let case_dir = self
            .case_dirs
            .get(index)
            .ok_or(DatasetError::IndexOutOfRange {
                index,
                len: self.case_dirs.len(),
            })?;
        let id = case_id(case_dir);
        let flair_path = case_dir.join(format!("{}-t2f.nii.gz", id));
        let seg_path = case_dir.join(format!("{}-seg.nii.gz", id));

        let mut image = mid_axial_slice(&flair_path)?;
        let label = mid_axial_slice(&seg_path)?.mapv(|v| u8::from(v > 0.0));

        if self.normalize {
            normalize_foreground(&mut image);
        }

        let image = resize_cubic(image.view(), self.out_shape).mapv(|v| v as f32);
        let label = resize_nearest(label.view(), self.out_shape);

        Ok(Sample {
            case_id: id,
            image: image.insert_axis(Axis(0)),
            label: label.insert_axis(Axis(0)),
        })
    }

    fn num_image_channels(&self) -> usize {
        1
    }

    fn num_classes(&self) -> usize {
        1
    }
}

fn case_id(case_dir: &Path) -> String {
    case_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn load_volume(path: &Path) -> Result<ndarray::Array3<f64>, DatasetError> {
    let nifti_err = |source: nifti::NiftiError| DatasetError::Nifti {
        path: path.to_path_buf(),
        source,
    };
    let object = ReaderOptions::new().read_file(path).map_err(nifti_err)?;
    let data = object
        .into_volume()
        .into_ndarray::<f64>()
        .map_err(nifti_err)?;
    let ndim = data.ndim();
    data.into_dimensionality::<Ix3>()
        .map_err(|_| DatasetError::NotAVolume {
            path: path.to_path_buf(),
            ndim,
        })
}

/// The slice at `depth / 2` along the third axis.
fn mid_axial_slice(path: &Path) -> Result<Array2<f64>, DatasetError> {
    let volume = load_volume(path)?;
    let depth = volume.len_of(Axis(2));
    if depth == 0 {
        return Err(DatasetError::EmptyVolume {
            path: path.to_path_buf(),
        });
    }
    Ok(volume.index_axis(Axis(2), depth / 2).to_owned())
}

/// Z-scores the strictly positive pixels in place; background stays as is.
fn normalize_foreground(image: &mut Array2<f64>) {
    let (sum, count) = image
        .iter()
        .filter(|v| **v > 0.0)
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        return;
    }
    let mean = sum / count as f64;
    let var = image
        .iter()
        .filter(|v| **v > 0.0)
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / count as f64;
    let denom = var.sqrt() + NORM_EPS;
    image.mapv_inplace(|v| if v > 0.0 { (v - mean) / denom } else { v });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn normalize_only_touches_foreground() {
        let mut image = array![[0.0, 2.0], [4.0, 0.0]];
        normalize_foreground(&mut image);
        assert_eq!(image[[0, 0]], 0.0);
        assert_eq!(image[[1, 1]], 0.0);
        assert!((image[[0, 1]] + 1.0).abs() < 1e-6);
        assert!((image[[1, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_empty_foreground_alone() {
        let mut image = array![[0.0, -1.0], [0.0, 0.0]];
        normalize_foreground(&mut image);
        assert_eq!(image, array![[0.0, -1.0], [0.0, 0.0]]);
    }

    #[test]
    fn case_id_is_directory_name() {
        assert_eq!(
            case_id(Path::new("/data/BraTS-GLI-00001-000")),
            "BraTS-GLI-00001-000"
        );
    }
}
