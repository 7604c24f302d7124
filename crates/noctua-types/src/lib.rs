#![forbid(unsafe_code)]

use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxnId(pub u64);

#[derive(thiserror::Error, Debug)]
pub enum NoctuaError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("log manager shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, NoctuaError>;

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TxnId {
    fn from(value: u64) -> Self {
        TxnId(value)
    }
}

impl From<TxnId> for u64 {
    fn from(value: TxnId) -> Self {
        value.0
    }
}
