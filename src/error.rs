use crate::boxes::FourCC;

/// Errors raised while walking, muxing or verifying a container.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Clean end of stream at a box boundary.
    #[error("end of stream")]
    EndOfStream,

    #[error("truncated input in '{tag}' at offset {offset:#x}")]
    Truncated { tag: FourCC, offset: u64 },

    #[error("structural error in '{tag}' at offset {offset:#x}: {reason}")]
    Structural {
        tag: FourCC,
        offset: u64,
        reason: String,
    },

    #[error("unsupported file variant: major brand '{major}' minor version {minor:#x}")]
    UnsupportedVariant { major: FourCC, minor: u32 },

    #[error("schema load failed: {0}")]
    SchemaLoad(String),

    #[error("mux invariant violated: {0}")]
    MuxInvariant(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("output is not seekable: {0}")]
    NotSeekable(String),

    /// Raised by field decoders; the walker rewraps it with tag and offset.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn malformed(reason: impl Into<String>) -> Error {
    Error::Malformed(reason.into())
}

impl From<bitreader::BitReaderError> for Error {
    fn from(err: bitreader::BitReaderError) -> Self {
        Error::Malformed(format!("bitstream: {err}"))
    }
}

impl Error {
    pub(crate) fn structural(tag: FourCC, offset: u64, reason: impl Into<String>) -> Self {
        Error::Structural {
            tag,
            offset,
            reason: reason.into(),
        }
    }
}
