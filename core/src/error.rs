//! Error types shared by the pipeline crates.

use std::path::PathBuf;

use thiserror::Error;

use crate::DocId;

/// Failure to build the dictionary. Always fatal at startup.
#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("failed to read dictionary {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dictionary {path:?} has no parsable lines ({malformed} malformed)")]
    Malformed { path: PathBuf, malformed: usize },
    #[error("no dictionary entries loaded from {0} file(s)")]
    Empty(usize),
    #[error("dictionary loading task stopped before completion")]
    Interrupted,
}

/// Failure of the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt record in tree `{tree}`: {message}")]
    Corrupt { tree: &'static str, message: String },
    #[error("crawl target not found: {0}")]
    TargetNotFound(String),
}

/// Failure to index one document. The prior index state is left intact.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("document {0} not found in store")]
    MissingDocument(DocId),
    #[error("index persistence failed: {0}")]
    Storage(#[from] StoreError),
}

impl From<sled::Error> for IndexError {
    fn from(e: sled::Error) -> Self {
        IndexError::Storage(StoreError::Sled(e))
    }
}

impl From<bincode::Error> for IndexError {
    fn from(e: bincode::Error) -> Self {
        IndexError::Storage(StoreError::Codec(e))
    }
}

/// Failure to read or parse the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
