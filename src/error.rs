use thiserror::Error;

/// Failure while fetching or decoding the remote dataset resources.
///
/// A load error is fatal to the whole run; a partially decoded dataset is
/// never usable.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("sprite decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("sprite width is {found} pixels, expected {expected}")]
    SpriteLayout { expected: usize, found: usize },

    #[error("label buffer length {0} is not a multiple of the class count")]
    LabelLayout(usize),

    #[error("sprite holds {images} examples but labels describe {labels}")]
    SizeMismatch { images: usize, labels: usize },
}

/// Top-level error type for the load/train/evaluate pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load dataset: {0}")]
    Load(#[from] LoadError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("training failed: {0}")]
    Training(String),
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
