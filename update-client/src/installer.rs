// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The installer seam: the embedder moves the verified payload into place.

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;

/// Server-supplied run parameters forwarded from the update manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallParams {
    pub run: String,
    pub arguments: String,
}

#[derive(Clone, Debug, Error)]
pub enum InstallError {
    #[error("could not write the installation fingerprint")]
    FingerprintWriteFailed,
    #[error("package manifest missing or malformed")]
    BadManifest,
    #[error("install failed")]
    GenericError,
    #[error("install failed with embedder code {0}")]
    Custom(i32),
}

impl InstallError {
    pub fn code(&self) -> i32 {
        match self {
            InstallError::FingerprintWriteFailed => 2,
            InstallError::BadManifest => 3,
            InstallError::GenericError => 9,
            InstallError::Custom(code) => *code,
        }
    }
}

pub trait Installer {
    /// Installs the payload unpacked at `unpack_path`. The directory is
    /// deleted once the returned future resolves, so the installer must copy
    /// what it wants to keep. `progress` takes a percentage in `0..=100`.
    fn install(
        &self,
        unpack_path: PathBuf,
        params: Option<InstallParams>,
        progress: Rc<dyn Fn(i32)>,
    ) -> LocalBoxFuture<'_, Result<(), InstallError>>;
}

/// Runs a server-specified recovery or cleanup action after installation.
pub trait ActionHandler {
    fn run(&self, action: &str, session_id: &str) -> LocalBoxFuture<'_, Result<(), InstallError>>;
}

pub mod stub {
    //! No-op implementations for tests and embedders without side effects.

    use super::*;

    #[derive(Debug, Default)]
    pub struct StubInstaller {
        /// When set, every install fails with this code.
        pub fail_with: Option<i32>,
    }

    impl Installer for StubInstaller {
        fn install(
            &self,
            _unpack_path: PathBuf,
            _params: Option<InstallParams>,
            progress: Rc<dyn Fn(i32)>,
        ) -> LocalBoxFuture<'_, Result<(), InstallError>> {
            let fail_with = self.fail_with;
            async move {
                match fail_with {
                    Some(code) => Err(InstallError::Custom(code)),
                    None => {
                        progress(100);
                        Ok(())
                    }
                }
            }
            .boxed_local()
        }
    }

    #[derive(Debug, Default)]
    pub struct StubActionHandler;

    impl ActionHandler for StubActionHandler {
        fn run(
            &self,
            _action: &str,
            _session_id: &str,
        ) -> LocalBoxFuture<'_, Result<(), InstallError>> {
            async { Ok(()) }.boxed_local()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubInstaller;
    use super::*;
    use assert_matches::assert_matches;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_stub_installer_reports_progress() {
        let progress = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&progress);
        StubInstaller::default()
            .install(
                PathBuf::from("/unpacked"),
                None,
                Rc::new(move |percent| log.borrow_mut().push(percent)),
            )
            .await
            .unwrap();
        assert_eq!(*progress.borrow(), vec![100]);
    }

    #[tokio::test]
    async fn test_stub_installer_failure_code() {
        let installer = StubInstaller { fail_with: Some(42) };
        let error = installer
            .install(PathBuf::from("/unpacked"), None, Rc::new(|_| {}))
            .await
            .unwrap_err();
        assert_matches!(error, InstallError::Custom(42));
        assert_eq!(error.code(), 42);
    }
}
