/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The error taxonomy of the client core.

use ndregion::RegionError;

use crate::tags::TagError;

/// Errors returned by client operations. Every error is reported by
/// the call that detects it; nothing is retried or replaced with a
/// default value.
///
/// Errors are `Clone` so that completed handles can hand out the same
/// failure on every `wait()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Malformed arguments, detected before any remote call.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Negative or out-of-range integers.
    #[error("value out of range: {0}")]
    Overflow(String),

    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },

    /// A remote read or write failed.
    #[error("transfer on object `{object}` failed: {reason}")]
    Transfer { object: String, reason: String },

    /// The backend refused the operation, for example deleting a tag
    /// on a persistent entity.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Teardown was attempted while asynchronous operations are still
    /// outstanding.
    #[error("cannot close {what}: {outstanding} outstanding operation(s)")]
    Lifetime { what: String, outstanding: usize },

    /// Use of a session or object after it was closed.
    #[error("{0} is closed")]
    Closed(String),

    /// Asynchronous machinery failed: work was submitted outside of a
    /// tokio runtime, or the backend broke its contract.
    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}

impl From<RegionError> for Error {
    fn from(err: RegionError) -> Self {
        if err.is_overflow() {
            Self::Overflow(err.to_string())
        } else {
            Self::Validation(err.to_string())
        }
    }
}

impl From<TagError> for Error {
    fn from(err: TagError) -> Self {
        match err {
            TagError::Overflow { .. } => Self::Overflow(err.to_string()),
            _ => Self::Validation(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
