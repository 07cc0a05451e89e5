use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse ELF: {0}")]
    Elf(#[from] goblin::error::Error),

    /// A literal the analysis depends on is missing from the file.
    #[error("file {path} doesn't contain string {literal:?}, not glibc?")]
    StringNotFound { path: String, literal: String },

    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    #[error("disassembler error: {0}")]
    Disassembler(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
