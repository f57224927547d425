// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Differential-update patching seam.
//!
//! A diff package unpacks into a directory of patch instructions against the
//! currently installed payload. Producing the full payload from those
//! instructions is embedder-specific, so it lives behind a trait; the
//! default [`StubPatcher`] rejects every diff, which makes the engine fall
//! back to a full update.

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The embedder provides no patching support.
pub const ERROR_UNSUPPORTED: i32 = 1;

#[derive(Clone, Debug, Error)]
#[error("patch failed with code {code}")]
pub struct PatchError {
    pub code: i32,
}

pub trait Patcher {
    /// Applies the patch instructions unpacked at `diff_dir` and resolves
    /// with a directory holding the reconstructed full payload.
    fn patch(&self, diff_dir: &Path) -> LocalBoxFuture<'_, Result<PathBuf, PatchError>>;
}

#[derive(Debug, Default)]
pub struct StubPatcher;

impl Patcher for StubPatcher {
    fn patch(&self, _diff_dir: &Path) -> LocalBoxFuture<'_, Result<PathBuf, PatchError>> {
        async { Err(PatchError { code: ERROR_UNSUPPORTED }) }.boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_rejects_diffs() {
        let error = StubPatcher.patch(Path::new("/nonexistent")).await.unwrap_err();
        assert_eq!(error.code, ERROR_UNSUPPORTED);
    }
}
