//! The error taxonomy surfaced externally (spec.md §6) and carried
//! internally as `Value::Error`.
//!
//! `seq-runtime/src/error.rs` reports failures through a thread-local
//! "last error" string because it sits behind an
//! `extern "C"` boundary that cannot propagate a typed `Result` to
//! LLVM-generated callers. SPIRAL has no such boundary — documents are
//! untrusted data evaluated by a safe library — so failures are ordinary
//! `Result<_, SpiralError>` values, and `ErrorKind` is the same closed
//! enum whether it is travelling as a Rust `Err` or as an IR-level error
//! `Value` flowing through `try`/`catch` (spec.md §7).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed taxonomy from spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    TypeError,
    ArityError,
    DomainError,
    DivideByZero,
    UnknownOperator,
    UnknownDefinition,
    UnboundIdentifier,
    NonTermination,
    ValidationError,
    MissingRequiredField,
    InvalidIdFormat,
    InvalidTypeFormat,
    InvalidExprFormat,
    DuplicateNodeId,
    InvalidResultReference,
    CyclicReference,
    ChannelClosed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ArityError => "ArityError",
            ErrorKind::DomainError => "DomainError",
            ErrorKind::DivideByZero => "DivideByZero",
            ErrorKind::UnknownOperator => "UnknownOperator",
            ErrorKind::UnknownDefinition => "UnknownDefinition",
            ErrorKind::UnboundIdentifier => "UnboundIdentifier",
            ErrorKind::NonTermination => "NonTermination",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::MissingRequiredField => "MissingRequiredField",
            ErrorKind::InvalidIdFormat => "InvalidIdFormat",
            ErrorKind::InvalidTypeFormat => "InvalidTypeFormat",
            ErrorKind::InvalidExprFormat => "InvalidExprFormat",
            ErrorKind::DuplicateNodeId => "DuplicateNodeId",
            ErrorKind::InvalidResultReference => "InvalidResultReference",
            ErrorKind::CyclicReference => "CyclicReference",
            ErrorKind::ChannelClosed => "ChannelClosed",
        };
        f.write_str(s)
    }
}

/// An error value: the kind, a human-readable message, and optional
/// structured metadata (spec.md §3's `error` tag: "error kind, message,
/// optional metadata").
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct SpiralError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SpiralError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        SpiralError {
            kind,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn arity_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArityError, message)
    }

    pub fn domain_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DomainError, message)
    }

    pub fn divide_by_zero(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DivideByZero, message)
    }

    pub fn unknown_operator(ns: &str, name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownOperator,
            format!("unknown operator {ns}:{name}"),
        )
    }

    pub fn unknown_definition(name: &str) -> Self {
        Self::new(ErrorKind::UnknownDefinition, format!("unknown definition {name}"))
    }

    pub fn unbound_identifier(name: &str) -> Self {
        Self::new(ErrorKind::UnboundIdentifier, format!("unbound identifier {name}"))
    }

    pub fn non_termination(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonTermination, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn channel_closed() -> Self {
        Self::new(ErrorKind::ChannelClosed, "channel is closed")
    }
}
