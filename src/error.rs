use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorCode {
    Argument,
    Constraint,
    StoreNotFound,
    IndexNotFound,
    NotImplemented,
    Connection,
    Parse,
    InvalidRange,
    ReadOnly,
    Backend,
    Aborted,
    Unresolved,
}

impl DbErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DbErrorCode::Argument => "argument",
            DbErrorCode::Constraint => "constraint",
            DbErrorCode::StoreNotFound => "store_not_found",
            DbErrorCode::IndexNotFound => "index_not_found",
            DbErrorCode::NotImplemented => "not_implemented",
            DbErrorCode::Connection => "connection",
            DbErrorCode::Parse => "parse",
            DbErrorCode::InvalidRange => "invalid_range",
            DbErrorCode::ReadOnly => "read_only",
            DbErrorCode::Backend => "backend",
            DbErrorCode::Aborted => "aborted",
            DbErrorCode::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    #[error("argument error: {0}")]
    Argument(String),
    #[error("constraint error: {0}")]
    Constraint(String),
    #[error("store '{store}' not found")]
    StoreNotFound { store: String },
    #[error("index '{index}' not found in store '{store}'")]
    IndexNotFound { store: String, index: String },
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("connection error: {message}")]
    Connection { message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid key range: {0}")]
    InvalidRange(String),
    #[error("store '{store}' is not writable in a read-only transaction")]
    ReadOnly { store: String },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("request aborted: {0}")]
    Aborted(String),
    #[error("{pending} pushed key(s) unresolved at flush")]
    Unresolved { pending: usize },
}

impl DbError {
    pub fn code(&self) -> DbErrorCode {
        match self {
            DbError::Argument(_) => DbErrorCode::Argument,
            DbError::Constraint(_) => DbErrorCode::Constraint,
            DbError::StoreNotFound { .. } => DbErrorCode::StoreNotFound,
            DbError::IndexNotFound { .. } => DbErrorCode::IndexNotFound,
            DbError::NotImplemented(_) => DbErrorCode::NotImplemented,
            DbError::Connection { .. } => DbErrorCode::Connection,
            DbError::Parse(_) => DbErrorCode::Parse,
            DbError::InvalidRange(_) => DbErrorCode::InvalidRange,
            DbError::ReadOnly { .. } => DbErrorCode::ReadOnly,
            DbError::Backend(_) => DbErrorCode::Backend,
            DbError::Aborted(_) => DbErrorCode::Aborted,
            DbError::Unresolved { .. } => DbErrorCode::Unresolved,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn store_not_found(store: &str) -> Self {
        DbError::StoreNotFound {
            store: store.to_string(),
        }
    }

    pub fn index_not_found(store: &str, index: &str) -> Self {
        DbError::IndexNotFound {
            store: store.to_string(),
            index: index.to_string(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        DbError::Connection {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DbError, DbErrorCode};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(DbErrorCode::StoreNotFound.as_str(), "store_not_found");
        assert_eq!(DbErrorCode::InvalidRange.as_str(), "invalid_range");
        assert_eq!(DbErrorCode::NotImplemented.as_str(), "not_implemented");
    }

    #[test]
    fn error_code_str_matches_variant_mapping() {
        let err = DbError::index_not_found("t1", "value");
        assert_eq!(err.code(), DbErrorCode::IndexNotFound);
        assert_eq!(err.code_str(), "index_not_found");
        assert_eq!(err.to_string(), "index 'value' not found in store 't1'");
    }
}
