pub mod common;
pub mod enums;
pub mod header;
pub mod packet;
pub mod question;
pub mod resource;

pub use header::DNSHeader;
pub use packet::DNSPacket;
pub use question::DNSQuestion;
pub use resource::DNSResource;

use thiserror::Error;

/// Errors produced while reading or writing DNS wire format.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid resource record")]
    InvalidResourceRecord,
    #[error("Invalid bit stream: {0}")]
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::InvalidBitStream(err.to_string())
    }
}
