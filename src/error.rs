use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DlisError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected end of file")]
    Eof,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("I/O operation on closed file")]
    Closed,
}

pub type Result<T> = std::result::Result<T, DlisError>;
