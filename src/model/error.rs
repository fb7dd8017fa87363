use thiserror::Error;

/// Failure reported by a storage collaborator (bucket or object service).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    Unauthorized(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn message(&self) -> &str {
        match self {
            StorageError::NotFound(msg)
            | StorageError::Unauthorized(msg)
            | StorageError::Unavailable(msg)
            | StorageError::Other(msg) => msg,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("file missing: {name}")]
    FileMissing {
        name: String,
        #[source]
        source: StorageError,
    },
    #[error("transfer of {key} failed: {message}")]
    Transfer { key: String, message: String },
    #[error("test connection failed: {0}")]
    Connectivity(String),
    #[error("backend has already been disposed")]
    InvalidState,
    #[error("upload of {0} was cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transfer(key: &str, message: impl Into<String>) -> Self {
        Error::Transfer {
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn file_missing(name: &str, source: StorageError) -> Self {
        Error::FileMissing {
            name: name.to_string(),
            source,
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unauthorized(msg) => Error::Authorization(msg),
            StorageError::Unavailable(msg) | StorageError::Other(msg) => Error::Unavailable(msg),
            StorageError::NotFound(name) => Error::FileMissing {
                name: name.clone(),
                source: StorageError::NotFound(name),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            Error::from(StorageError::Unauthorized("bad key".into())),
            Error::Authorization(msg) if msg == "bad key"
        ));
        assert!(matches!(
            Error::from(StorageError::Unavailable("timeout".into())),
            Error::Unavailable(_)
        ));
        assert!(matches!(
            Error::from(StorageError::NotFound("a.txt".into())),
            Error::FileMissing { name, .. } if name == "a.txt"
        ));
    }

    #[test]
    fn test_file_missing_keeps_cause() {
        let err = Error::file_missing("a.txt", StorageError::Unavailable("reset".into()));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("service unavailable: reset"));
    }
}
