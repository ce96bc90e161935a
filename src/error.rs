use thiserror::Error;

/// Errors raised by the persistent group store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying read/write failure.
    #[error("I/O failure: {0}")]
    Io(String),

    /// A group or dataset that was expected to exist is absent.
    #[error("missing entry: {0}")]
    Missing(String),

    /// A group was created twice at the same path.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Collective dataset creation disagreed between workers.
    #[error("collective mismatch at {path}: dataset exists with length {actual}, requested {requested}")]
    CollectiveMismatch {
        path: String,
        requested: u64,
        actual: u64,
    },

    /// Attribute present but with an unexpected type.
    #[error("attribute {name} at {path} has unexpected type")]
    AttrType { path: String, name: String },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors raised by the image codec adapter.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The decoder rejected the input bytes.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The encoder failed to produce output.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The compressor returned zero bytes.
    #[error("zero-length compressed image")]
    EmptyOutput,

    /// Requested image format is not one of JPEG, PNG, TIFF.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Top-level error for all container-building operations.
#[derive(Debug, Error)]
pub enum BbicError {
    /// Bad axis, level, index or size argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Block or tile size ratios that do not divide evenly.
    #[error("incompatible size: {0}")]
    IncompatibleSize(String),

    /// Block or tile indices outside the grid.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Requested stack, volume, level or tile not present.
    #[error("missing entity: {0}")]
    MissingEntity(String),

    /// Creating a stack or volume that already exists at the given index.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Cooperative abort requested through the cluster interface.
    #[error("interrupted")]
    Interrupted,

    /// Image compression or decompression failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Store read/write failure, including collective mismatches.
    #[error(transparent)]
    Store(#[from] StoreError),
}
