//! Hard failures that abort a pipeline run.
//!
//! Data-quality conditions (unmapped values, missing coordinates, bad rows)
//! are never errors; they are collected as diagnostics. Everything here is
//! wrapped in `anyhow::Error` by the loaders and can be recovered with
//! `downcast_ref::<PipelineError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// File could not be opened, read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid UTF-8
    #[error("{path} is not valid UTF-8 (first invalid byte at offset {offset})")]
    Encoding { path: PathBuf, offset: usize },

    /// File has no header row
    #[error("{path} is empty (no header row)")]
    EmptyFile { path: PathBuf },

    /// Header lacks a column the stage needs
    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },

    /// Two coordinate rows share a country
    #[error("duplicate coordinate entry for '{country}' (lines {first_line} and {second_line})")]
    DuplicateCoordinateKey {
        country: String,
        first_line: usize,
        second_line: usize,
    },

    /// Mapping table asset failed validation
    #[error("invalid mapping tables: {0}")]
    InvalidMappings(String),

    /// A stage needs a path that was not configured
    #[error("no {0} configured (set it in the config file or pass it on the command line)")]
    MissingPath(&'static str),
}
