use std::{fmt::Display, sync::PoisonError};

use bincode::ErrorKind;
use serde::{Deserialize, Serialize};

// 自定义 Result 类型
pub type RSKVResult<T> = std::result::Result<T, RSKVError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RSKVError {
    Parse(String),
    Internal(String),
    KeyNotFound(String),
    WriteConflict,
    ReadConflict,
}

impl<T> From<PoisonError<T>> for RSKVError {
    fn from(value: PoisonError<T>) -> Self {
        RSKVError::Internal(value.to_string())
    }
}

impl From<Box<ErrorKind>> for RSKVError {
    fn from(value: Box<ErrorKind>) -> Self {
        RSKVError::Internal(value.to_string())
    }
}

impl From<std::io::Error> for RSKVError {
    fn from(value: std::io::Error) -> Self {
        RSKVError::Internal(value.to_string())
    }
}

impl std::error::Error for RSKVError {}

impl Display for RSKVError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RSKVError::Parse(err) => write!(f, "parse error: {}", err),
            RSKVError::Internal(err) => write!(f, "internal error: {}", err),
            RSKVError::KeyNotFound(err) => write!(f, "{}", err),
            RSKVError::WriteConflict => write!(f, "write-write conflict"),
            RSKVError::ReadConflict => write!(f, "read-write conflict"),
        }
    }
}
