// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The error taxonomy of the update client.
//!
//! [`Error`] is the service-level result of a whole `update`/`install` call.
//! [`ErrorCategory`] plus a category-specific code describe how a single
//! component's run terminated; they travel on [`crate::common::CrxUpdateItem`]
//! and in pings.

use serde_repr::Serialize_repr;
use thiserror::Error;

/// Service-level errors returned from [`crate::UpdateClient`] operations.
///
/// These never describe a per-component outcome; a failing component leaves
/// the overall call successful and reports through its update item and ping.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A run for the same id is already in flight.
    #[error("an update for this id is already in progress")]
    UpdateInProgress,
    /// The run was canceled before it completed.
    #[error("the update was canceled")]
    UpdateCanceled,
    /// The server asked for backoff and the window has not elapsed.
    #[error("update checks are throttled, retry later")]
    RetryLater,
    /// An internal service failure.
    #[error("service error")]
    ServiceError,
    /// The update check could not be completed.
    #[error("the update check failed")]
    UpdateCheckError,
    /// The data callback returned no `CrxComponent` for a requested id.
    #[error("no component data was provided for this id")]
    CrxNotFound,
    /// A malformed argument, such as an empty id list.
    #[error("invalid argument")]
    InvalidArgument,
}

impl Error {
    pub fn code(self) -> i32 {
        match self {
            Error::UpdateInProgress => 1,
            Error::UpdateCanceled => 2,
            Error::RetryLater => 3,
            Error::ServiceError => 4,
            Error::UpdateCheckError => 5,
            Error::CrxNotFound => 6,
            Error::InvalidArgument => 7,
        }
    }
}

/// Which stage of a component's run produced its error code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize_repr)]
#[repr(i32)]
pub enum ErrorCategory {
    #[default]
    None = 0,
    Download = 1,
    Unpack = 2,
    Install = 3,
    UpdateCheck = 4,
    Service = 5,
}

/// Codes used with [`ErrorCategory::Service`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ServiceErrorCode {
    /// Updates for the component are disabled by group policy.
    UpdateDisabled = 2,
    Canceled = 3,
}

impl ServiceErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}
