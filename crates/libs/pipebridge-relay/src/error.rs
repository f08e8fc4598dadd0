use pipebridge_proto::ProtoError;

/// Errors raised inside the relay core.
///
/// Nothing here is allowed to cross the event-loop boundary: transport
/// errors surface as a boolean send failure, decode errors drop the
/// message, RPC errors become an `error_message` reply. Only `Config` is
/// fatal, and only to bootstrap.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}
