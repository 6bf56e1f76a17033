use anyhow::anyhow;

use crate::cipher::CipherError;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cipher,
    Database,
    Forbidden,
    InvalidInput,
    NotFound,
    Unknown,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Database,
            code: "database_error",
            public,
            source,
        }
    }

    pub fn cipher(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Cipher,
            code: "cipher_error",
            public,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            source,
        }
    }

    pub fn forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Forbidden,
            code: "forbidden",
            public,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }
}

impl From<CipherError> for LibError {
    fn from(value: CipherError) -> Self {
        Self::cipher("Credential cipher operation failed", anyhow!(value))
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::database("Database request failed", anyhow!(value))
    }
}

/// Stable per-element error codes surfaced in bulk response arrays.
///
/// `status` is the per-element HTTP-class status. The enclosing call itself
/// is 200 whenever the batch machinery ran; per-element failures live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: &'static str,
    pub status: u16,
    pub message: &'static str,
}

pub const ENTITY_NOT_FOUND: ErrorCode = ErrorCode {
    code: "ENTITY_NOT_FOUND",
    status: 404,
    message: "The requested entity does not exist",
};

pub const ENTITY_NOT_CREATED: ErrorCode = ErrorCode {
    code: "ENTITY_NOT_CREATED",
    status: 400,
    message: "The entity could not be created",
};

pub const VALIDATION_FAILED: ErrorCode = ErrorCode {
    code: "VALIDATION_FAILED",
    status: 400,
    message: "The request failed validation",
};

pub const MAX_REQUESTS_EXCEEDED: ErrorCode = ErrorCode {
    code: "MAX_REQUESTS_EXCEEDED",
    status: 400,
    message: "Too many operations in one batch for this endpoint",
};

pub const ACCESS_DENIED: ErrorCode = ErrorCode {
    code: "ACCESS_DENIED",
    status: 403,
    message: "The requestor is not authorized for this operation",
};

pub const OPERATION_ABORTED: ErrorCode = ErrorCode {
    code: "OPERATION_ABORTED",
    status: 500,
    message: "The operation was aborted because a sibling operation failed",
};

pub const INTERNAL_ERROR: ErrorCode = ErrorCode {
    code: "INTERNAL_ERROR",
    status: 500,
    message: "Internal server error",
};
