use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("no BraTS cases found under {base}")]
    NoCases { base: PathBuf },

    #[error("index {index} out of range for dataset of {len} cases")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("{path} is not a 3D volume (found {ndim} dimensions)")]
    NotAVolume { path: PathBuf, ndim: usize },

    #[error("{path} has zero depth")]
    EmptyVolume { path: PathBuf },

    #[error("invalid case pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to list cases: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read {path}: {source}")]
    Nifti {
        path: PathBuf,
        #[source]
        source: nifti::NiftiError,
    },
}
