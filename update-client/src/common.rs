// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Core value types shared between the orchestrating client, the per-component
//! state machine and the embedder-facing callbacks.

use crate::error::ErrorCategory;
use crate::installer::{ActionHandler, Installer};
use crate::version::Version;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use typed_builder::TypedBuilder;

/// CRX container format a package must satisfy before it is unpacked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrxFormat {
    /// CRX3: `Cr24` magic, format version 3, signed protobuf header.
    Crx3,
}

/// Immutable description of one updatable component, supplied fresh by the
/// embedder for every run through the data callback.
#[derive(Clone, TypedBuilder)]
pub struct CrxComponent {
    /// Human-readable component name, used only for logging.
    #[builder(setter(into))]
    pub name: String,

    /// SHA-256 hash of the DER-encoded public key the package must carry a
    /// proof from.
    pub pk_hash: Vec<u8>,

    /// The currently installed version, reported to the server.
    pub version: Version,

    /// Fingerprint of the installed payload, if a previous run recorded one.
    /// Sent to the server so it can offer a differential package.
    #[builder(default, setter(strip_option, into))]
    pub fingerprint: Option<String>,

    /// Applies unpacked payloads. The same handle survives across the
    /// diff-then-full cycles of one run.
    pub installer: Rc<dyn Installer>,

    /// Runs server-specified actions after a successful update.
    #[builder(default, setter(strip_option))]
    pub action_handler: Option<Rc<dyn ActionHandler>>,

    #[builder(default = CrxFormat::Crx3)]
    pub crx_format_requirement: CrxFormat,

    /// Group-policy opt-in. When false the component is short-circuited to an
    /// error before any download starts.
    #[builder(default = true)]
    pub updates_enabled: bool,
}

impl fmt::Debug for CrxComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrxComponent")
            .field("name", &self.name)
            .field("pk_hash", &hex::encode(&self.pk_hash))
            .field("version", &self.version)
            .field("fingerprint", &self.fingerprint)
            .field("crx_format_requirement", &self.crx_format_requirement)
            .field("updates_enabled", &self.updates_enabled)
            .finish_non_exhaustive()
    }
}

/// States a component moves through during a run.
///
/// `Updated`, `UpToDate` and `UpdateError` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentState {
    New,
    Checking,
    CanUpdate,
    DownloadingDiff,
    Downloading,
    UpdatingDiff,
    Updating,
    Updated,
    UpToDate,
    UpdateError,
    Wait,
}

impl ComponentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ComponentState::Updated | ComponentState::UpToDate | ComponentState::UpdateError
        )
    }
}

/// Mutable per-component run state, snapshotted to the state-change receiver
/// on every transition and progress notification.
#[derive(Clone, Debug, PartialEq)]
pub struct CrxUpdateItem {
    pub id: String,
    pub state: ComponentState,
    /// The installed version when the run started; `None` if the embedder
    /// withheld the component data.
    pub previous_version: Option<Version>,
    /// Set once the server returns an `ok` status with a manifest.
    pub next_version: Option<Version>,
    /// Bytes fetched so far, -1 when no download has started.
    pub downloaded_bytes: i64,
    /// Total bytes expected, -1 when unknown.
    pub total_bytes: i64,
    /// Installer progress in percent, -1 when unknown.
    pub install_progress: i32,
    pub error_category: ErrorCategory,
    pub error_code: i32,
    pub extra_code1: i32,
    /// Server-defined `_`-prefixed attributes from the update check.
    pub custom_attributes: BTreeMap<String, String>,
}

impl CrxUpdateItem {
    pub(crate) fn new(id: &str) -> Self {
        CrxUpdateItem {
            id: id.to_string(),
            state: ComponentState::New,
            previous_version: None,
            next_version: None,
            downloaded_bytes: -1,
            total_bytes: -1,
            install_progress: -1,
            error_category: ErrorCategory::None,
            error_code: 0,
            extra_code1: 0,
            custom_attributes: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ComponentState::Updated.is_terminal());
        assert!(ComponentState::UpToDate.is_terminal());
        assert!(ComponentState::UpdateError.is_terminal());
        assert!(!ComponentState::New.is_terminal());
        assert!(!ComponentState::DownloadingDiff.is_terminal());
        assert!(!ComponentState::Wait.is_terminal());
    }

    #[test]
    fn test_new_item_defaults() {
        let item = CrxUpdateItem::new("jebgalgnebhfojomionfpkfelancnnkf");
        assert_eq!(item.state, ComponentState::New);
        assert_eq!(item.downloaded_bytes, -1);
        assert_eq!(item.total_bytes, -1);
        assert_eq!(item.install_progress, -1);
        assert_eq!(item.error_category, ErrorCategory::None);
    }
}
