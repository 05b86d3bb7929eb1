//! Multicast manager error types and status handling.
//!
//! Every mutating call reports failure as an [`McError`]. The C shim turns
//! those back into [`McStatus`] codes, which carry the same values as the
//! driver's `bf_status_t`.

use std::fmt;
use thiserror::Error;

/// Status codes matching `bf_status_t`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McStatus {
    Success = 0,
    NotReady = 1,
    NoSysResources = 2,
    InvalidArg = 3,
    AlreadyExists = 4,
    HwCommFail = 5,
    ObjectNotFound = 6,
    MaxSessionsExceeded = 7,
    SessionNotFound = 8,
    NoSpace = 9,
    TryAgain = 10,
    InitError = 11,
    TxnNotSupported = 12,
    TableLocked = 13,
    Io = 14,
    Unexpected = 15,
    EntryReferencesExist = 16,
    NotSupported = 17,
    HwUpdateFailed = 18,
    InUse = 24,
    NotImplemented = 25,
}

impl McStatus {
    /// Creates a status from a raw `bf_status_t` value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => McStatus::Success,
            1 => McStatus::NotReady,
            2 => McStatus::NoSysResources,
            3 => McStatus::InvalidArg,
            4 => McStatus::AlreadyExists,
            5 => McStatus::HwCommFail,
            6 => McStatus::ObjectNotFound,
            7 => McStatus::MaxSessionsExceeded,
            8 => McStatus::SessionNotFound,
            9 => McStatus::NoSpace,
            10 => McStatus::TryAgain,
            11 => McStatus::InitError,
            12 => McStatus::TxnNotSupported,
            13 => McStatus::TableLocked,
            14 => McStatus::Io,
            16 => McStatus::EntryReferencesExist,
            17 => McStatus::NotSupported,
            18 => McStatus::HwUpdateFailed,
            24 => McStatus::InUse,
            25 => McStatus::NotImplemented,
            _ => McStatus::Unexpected,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == McStatus::Success
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> McResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(McError::from_status(self))
        }
    }
}

impl fmt::Display for McStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            McStatus::Success => "BF_SUCCESS",
            McStatus::NotReady => "BF_NOT_READY",
            McStatus::NoSysResources => "BF_NO_SYS_RESOURCES",
            McStatus::InvalidArg => "BF_INVALID_ARG",
            McStatus::AlreadyExists => "BF_ALREADY_EXISTS",
            McStatus::HwCommFail => "BF_HW_COMM_FAIL",
            McStatus::ObjectNotFound => "BF_OBJECT_NOT_FOUND",
            McStatus::MaxSessionsExceeded => "BF_MAX_SESSIONS_EXCEEDED",
            McStatus::SessionNotFound => "BF_SESSION_NOT_FOUND",
            McStatus::NoSpace => "BF_NO_SPACE",
            McStatus::TryAgain => "BF_EAGAIN",
            McStatus::InitError => "BF_INIT_ERROR",
            McStatus::TxnNotSupported => "BF_TXN_NOT_SUPPORTED",
            McStatus::TableLocked => "BF_TABLE_LOCKED",
            McStatus::Io => "BF_IO",
            McStatus::Unexpected => "BF_UNEXPECTED",
            McStatus::EntryReferencesExist => "BF_ENTRY_REFERENCES_EXIST",
            McStatus::NotSupported => "BF_NOT_SUPPORTED",
            McStatus::HwUpdateFailed => "BF_HW_UPDATE_FAILED",
            McStatus::InUse => "BF_IN_USE",
            McStatus::NotImplemented => "BF_NOT_IMPLEMENTED",
        };
        write!(f, "{}", s)
    }
}

/// Error type for multicast manager operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McError {
    /// Duplicate group id, or re-association of an already associated object.
    #[error("Already exists: {item}")]
    AlreadyExists { item: String },

    /// A handle, device or table entry is not present.
    #[error("Object not found: {item}")]
    ObjectNotFound { item: String },

    /// Destroy attempted while the object is still referenced.
    #[error("Object in use: {object}")]
    InUse { object: String },

    /// Destroy attempted while dependent entries still exist.
    #[error("Entry references exist: {object}")]
    EntryReferencesExist { object: String },

    /// Malformed bitmap, out-of-range id or inconsistent argument.
    #[error("Invalid argument: {message}")]
    InvalidArg { message: String },

    /// Handle space or table capacity exhausted.
    #[error("No system resources: {resource}")]
    NoSystemResources { resource: String },

    /// The device did not acknowledge pushed writes.
    #[error("Hardware communication failed: {message}")]
    HwCommFail { message: String },

    /// Staging succeeded but pushing the writes to hardware failed.
    #[error("Hardware update failed: {message}")]
    HwUpdateFailed { message: String },

    /// The resource is held by another session's open transaction.
    #[error("Table locked by session {owner}")]
    TableLocked { owner: u32 },

    #[error("Session not found: {0}")]
    SessionNotFound(u32),

    #[error("Maximum number of sessions ({0}) exceeded")]
    MaxSessionsExceeded(u32),

    /// Batch and transaction scopes cannot be nested in each other.
    #[error("Transaction not supported: {message}")]
    TxnNotSupported { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl McError {
    /// Creates an error from a status code.
    pub fn from_status(status: McStatus) -> Self {
        let detail = format!("driver returned {}", status);
        match status {
            McStatus::Success => McError::Internal {
                message: "from_status called with success status".to_string(),
            },
            McStatus::AlreadyExists => McError::already_exists(detail),
            McStatus::ObjectNotFound => McError::not_found(detail),
            McStatus::InUse => McError::in_use(detail),
            McStatus::EntryReferencesExist => McError::EntryReferencesExist { object: detail },
            McStatus::InvalidArg => McError::invalid_arg(detail),
            McStatus::NoSysResources | McStatus::NoSpace => McError::no_resources(detail),
            McStatus::HwCommFail => McError::HwCommFail { message: detail },
            McStatus::HwUpdateFailed => McError::hw_update_failed(detail),
            McStatus::TableLocked => McError::TableLocked { owner: 0 },
            McStatus::TxnNotSupported => McError::TxnNotSupported { message: detail },
            _ => McError::internal(detail),
        }
    }

    pub fn already_exists(item: impl Into<String>) -> Self {
        McError::AlreadyExists { item: item.into() }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        McError::ObjectNotFound { item: item.into() }
    }

    pub fn in_use(object: impl Into<String>) -> Self {
        McError::InUse {
            object: object.into(),
        }
    }

    pub fn invalid_arg(message: impl Into<String>) -> Self {
        McError::InvalidArg {
            message: message.into(),
        }
    }

    pub fn no_resources(resource: impl Into<String>) -> Self {
        McError::NoSystemResources {
            resource: resource.into(),
        }
    }

    pub fn hw_update_failed(message: impl Into<String>) -> Self {
        McError::HwUpdateFailed {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        McError::Internal {
            message: message.into(),
        }
    }

    /// Status code reported through the C shim.
    pub fn status(&self) -> McStatus {
        match self {
            McError::AlreadyExists { .. } => McStatus::AlreadyExists,
            McError::ObjectNotFound { .. } => McStatus::ObjectNotFound,
            McError::InUse { .. } => McStatus::InUse,
            McError::EntryReferencesExist { .. } => McStatus::EntryReferencesExist,
            McError::InvalidArg { .. } => McStatus::InvalidArg,
            McError::NoSystemResources { .. } => McStatus::NoSysResources,
            McError::HwCommFail { .. } => McStatus::HwCommFail,
            McError::HwUpdateFailed { .. } => McStatus::HwUpdateFailed,
            McError::TableLocked { .. } => McStatus::TableLocked,
            McError::SessionNotFound(_) => McStatus::SessionNotFound,
            McError::MaxSessionsExceeded(_) => McStatus::MaxSessionsExceeded,
            McError::TxnNotSupported { .. } => McStatus::TxnNotSupported,
            McError::Internal { .. } => McStatus::Unexpected,
        }
    }

    /// Returns true if the caller can retry after releasing a conflicting
    /// reference or waiting for another session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            McError::InUse { .. } | McError::TableLocked { .. } | McError::AlreadyExists { .. }
        )
    }
}

impl From<bf_types::ParseError> for McError {
    fn from(err: bf_types::ParseError) -> Self {
        McError::invalid_arg(err.to_string())
    }
}

/// Result type for multicast manager operations.
pub type McResult<T> = Result<T, McError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(McStatus::Success.is_success());
        assert!(McStatus::Success.into_result().is_ok());
        assert!(McStatus::InUse.into_result().is_err());
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(McStatus::from_raw(0), McStatus::Success);
        assert_eq!(McStatus::from_raw(4), McStatus::AlreadyExists);
        assert_eq!(McStatus::from_raw(24), McStatus::InUse);
        assert_eq!(McStatus::from_raw(-999), McStatus::Unexpected);
    }

    #[test]
    fn test_error_status_round_trip() {
        for status in [
            McStatus::AlreadyExists,
            McStatus::ObjectNotFound,
            McStatus::InUse,
            McStatus::InvalidArg,
            McStatus::HwUpdateFailed,
            McStatus::TableLocked,
        ] {
            assert_eq!(McError::from_status(status).status(), status);
        }
    }

    #[test]
    fn test_error_retryable() {
        assert!(McError::in_use("node").is_retryable());
        assert!(McError::TableLocked { owner: 2 }.is_retryable());
        assert!(!McError::not_found("node").is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(McStatus::TableLocked.to_string(), "BF_TABLE_LOCKED");
        assert_eq!(
            McError::not_found("mgrp 0x10000001").to_string(),
            "Object not found: mgrp 0x10000001"
        );
    }
}
