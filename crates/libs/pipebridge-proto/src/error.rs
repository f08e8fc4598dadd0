/// Errors from envelope and framing operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtoError {
    #[error("invalid frame length prefix: {0}")]
    InvalidFrameLength(u32),

    #[error("frame length {0} exceeds maximum")]
    FrameTooLarge(usize),

    #[error("envelope encode error: {0}")]
    Encode(String),

    #[error("envelope decode error: {0}")]
    Decode(String),
}
