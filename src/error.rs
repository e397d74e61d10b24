use thiserror::Error;

/// Errors internal to the TFTP protocol engine.
///
/// Distinct from the `anyhow::Error` used at the outer seams (CLI
/// parsing, socket bind failures): handlers need to branch on *which*
/// kind of failure occurred so they can pick the right wire ERROR code,
/// or no code at all for transport faults.
#[derive(Debug, Error)]
pub enum TftpError {
    #[error("malformed packet")]
    MalformedPacket,

    #[error("unsupported mode {0:?}")]
    UnsupportedMode(String),

    #[error("peer sent error {code}: {msg}")]
    PeerAborted { code: u16, msg: String },

    #[error("receive timed out after {0} retries")]
    RetriesExceeded(u32),

    #[error("unexpected packet type on this transfer")]
    UnexpectedPacket,

    #[error("out of sequence block (expected {expected}, got {got})")]
    OutOfSequence { expected: u16, got: u16 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TftpError>;

/// Well-known TFTP ERROR codes this server emits (RFC 1350 §5).
pub mod wire_code {
    pub const UNDEFINED: u16 = 0;
    pub const FILE_NOT_FOUND: u16 = 1;
    pub const ILLEGAL_OPERATION: u16 = 4;
    pub const FILE_ALREADY_EXISTS: u16 = 6;
}
