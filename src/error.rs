use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CrawlError {
    #[error("invalid product id: {0}")]
    InvalidProductId(String),

    #[error("invalid product id {value:?} in {path} at row {row}")]
    #[diagnostic(help("ids must be positive integers; clean the input file and re-run"))]
    InvalidInputRow {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("input file not found: {0}")]
    #[diagnostic(help("pass --input or set \"input\" in prodfetch.json"))]
    InputNotFound(PathBuf),

    #[error("failed to read input file {path}: {message}")]
    InputRead { path: PathBuf, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("product API request failed: {0}")]
    ProductHttp(String),

    #[error("concurrency gate closed")]
    GateClosed,

    #[error("output store error: {0}")]
    Store(String),

    #[error("failure log error: {0}")]
    FailureLog(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
