//! Protocol error types

use thiserror::Error;

/// Errors raised while framing, decoding, or driving a repair session.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] zipatch_formats::Error),

    #[error(transparent)]
    Install(#[from] zipatch_install::Error),

    #[error("unknown message opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("message ends before its declared fields")]
    TruncatedMessage,

    #[error("message carries trailing bytes after its declared fields")]
    OversizedMessage,

    #[error("invalid UTF-8 in message string: {0}")]
    InvalidString(String),

    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(u64),

    #[error("channel closed by peer")]
    ChannelClosed,

    #[error("peer sent {got} while {expected}")]
    UnexpectedMessage {
        got: &'static str,
        expected: &'static str,
    },

    #[error("peer referenced unknown patch set {0}")]
    UnknownPatchSet(u32),

    #[error("peer referenced unknown source file {0}")]
    UnknownSourceFile(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
