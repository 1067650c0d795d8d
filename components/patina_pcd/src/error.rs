//! Error definitions for the PCD service.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt::Display;

use r_efi::efi;

/// Result type used throughout the PCD service.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The token number is outside of the namespace it was used in.
    InvalidToken(usize),
    /// The enumeration cursor is past the end of the flat namespace.
    TokenNotFound(usize),
    /// The `{Guid, ExTokenNumber}` pair does not resolve to a token.
    ExTokenNotFound,
    /// The GUID does not name a token space of the database.
    UnknownTokenSpace,
    /// VPD and HII backed tokens cannot be modified in PEI.
    ReadOnly,
    /// The access width does not match the declared datum size of the token.
    SizeMismatch { expected: usize, actual: usize },
    /// The buffer exceeds the declared maximum size of a pointer token.
    BufferTooLarge { max: usize },
    /// Every callback slot of the token is in use.
    CallbackTableFull,
    /// The callback was never registered on the token.
    CallbackNotFound,
    /// The HII variable does not cover the value at its declared offset.
    HiiVariableTooSmall { required: usize, actual: usize },
    /// The database image violates its own layout.
    MalformedDatabase(&'static str),
    /// A VPD token was read but no VPD region is configured.
    VpdRegionMissing,
    /// The service feature is disabled by configuration.
    Unsupported,
    /// The database was accessed while another access was still in progress.
    Reentrant,
    /// The Read-Only Variable service failed.
    Variable(efi::Status),
    /// The configuration or the token definitions handed to the builder are invalid.
    InvalidConfig(&'static str),
}

impl From<scroll::Error> for Error {
    fn from(_value: scroll::Error) -> Self {
        Error::MalformedDatabase("table access out of bounds")
    }
}

impl From<Error> for efi::Status {
    fn from(value: Error) -> Self {
        match value {
            Error::InvalidToken(_)
            | Error::ReadOnly
            | Error::SizeMismatch { .. }
            | Error::BufferTooLarge { .. }
            | Error::InvalidConfig(_) => efi::Status::INVALID_PARAMETER,
            Error::TokenNotFound(_) | Error::ExTokenNotFound | Error::UnknownTokenSpace | Error::CallbackNotFound => {
                efi::Status::NOT_FOUND
            }
            Error::CallbackTableFull => efi::Status::OUT_OF_RESOURCES,
            Error::HiiVariableTooSmall { .. } => efi::Status::BAD_BUFFER_SIZE,
            Error::MalformedDatabase(_) => efi::Status::VOLUME_CORRUPTED,
            Error::VpdRegionMissing => efi::Status::NOT_READY,
            Error::Unsupported => efi::Status::UNSUPPORTED,
            Error::Reentrant => efi::Status::ACCESS_DENIED,
            Error::Variable(status) => status,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidToken(token) => write!(f, "Token number {token} is out of range."),
            Error::TokenNotFound(token) => write!(f, "Token number {token} is past the end of the flat namespace."),
            Error::ExTokenNotFound => write!(f, "Dynamic-Ex token not found in its token space."),
            Error::UnknownTokenSpace => write!(f, "Token space GUID is not present in the database."),
            Error::ReadOnly => write!(f, "VPD and HII tokens are read-only in PEI."),
            Error::SizeMismatch { expected, actual } => {
                write!(f, "Access size {actual} does not match the token size {expected}.")
            }
            Error::BufferTooLarge { max } => write!(f, "Buffer exceeds the maximum token size of {max} bytes."),
            Error::CallbackTableFull => write!(f, "No free callback slot for the token."),
            Error::CallbackNotFound => write!(f, "Callback is not registered on the token."),
            Error::HiiVariableTooSmall { required, actual } => {
                write!(f, "HII variable holds {actual} bytes, {required} required.")
            }
            Error::MalformedDatabase(msg) => write!(f, "Malformed PCD database: {msg}"),
            Error::VpdRegionMissing => write!(f, "No VPD region configured."),
            Error::Unsupported => write!(f, "Operation disabled by the PCD configuration."),
            Error::Reentrant => write!(f, "PCD database accessed re-entrantly."),
            Error::Variable(status) => write!(f, "Read-Only Variable service failed: {status:?}"),
            Error::InvalidConfig(msg) => write!(f, "Invalid PCD configuration: {msg}"),
        }
    }
}

impl core::error::Error for Error {}
