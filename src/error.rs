// error.rs

use crate::region::RegionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {preset} record at line {line}: {reason}")]
    ParseRecord {
        preset: &'static str,
        line: u64,
        reason: String,
    },

    #[error("Line {line} appears to be UTF-16 encoded text")]
    Utf16Detected { line: u64 },

    #[error(
        "Unsorted input: record (tid {tid}, pos {pos}) after (tid {last_tid}, pos {last_pos})"
    )]
    UnsortedInput {
        tid: usize,
        pos: i64,
        last_tid: usize,
        last_pos: i64,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid index file: {0}")]
    InvalidIndexFile(String),

    #[error("Bad region {region:?}: {source}")]
    BadRegion {
        region: String,
        source: RegionError,
    },

    #[error("Unknown reference {0:?}")]
    ReferenceUnknown(String),

    #[error("Index has already been finished")]
    AlreadyFinished,
}

impl IndexError {
    pub(crate) fn invalid_index(msg: impl Into<String>) -> Self {
        IndexError::InvalidIndexFile(msg.into())
    }

    pub(crate) fn invalid_record(msg: impl Into<String>) -> Self {
        IndexError::InvalidRecord(msg.into())
    }
}
