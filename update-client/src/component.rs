// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The per-component state machine.
//!
//! One [`Component`] tracks one id through a run: `New` to `Checking`, then
//! either straight to a terminal state or through the download/unpack/install
//! pipeline. A differential package gets one cycle; if any stage of it fails
//! the failure is recorded and a single full-package cycle follows.

use crate::common::{ComponentState, CrxComponent, CrxUpdateItem};
use crate::download::{CrxDownloader, DownloadMetrics, ProgressFn, ERROR_NO_HASH};
use crate::error::{Error, ErrorCategory, ServiceErrorCode};
use crate::installer::InstallParams;
use crate::observer::Events;
use crate::patcher::Patcher;
use crate::ping::PingData;
use crate::protocol::response;
use crate::storage::PersistedData;
use crate::unpacker::Unpacker;
use crate::update_check::{CheckResult, UpdateCheckStatus, ERROR_PARSE};
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use std::rc::Rc;
use tracing::{error, info, warn};
use url::Url;

/// The seams one run shares across all of its components.
pub(crate) struct Engine {
    pub downloader: Rc<dyn CrxDownloader>,
    pub unpacker: Rc<dyn Unpacker>,
    pub patcher: Rc<dyn Patcher>,
    pub persisted: PersistedData,
    pub session_id: String,
    /// Fans state snapshots out to observers and the caller's receiver.
    pub notify: Rc<dyn Fn(Events, &CrxUpdateItem)>,
}

struct CycleError {
    category: ErrorCategory,
    code: i32,
}

pub(crate) struct Component {
    pub item: CrxUpdateItem,
    crx: Option<CrxComponent>,
    check: Option<CheckResult>,
    ping: PingData,
    /// Pings are only owed for components the server offered an update to.
    reached_can_update: bool,
}

impl Component {
    pub fn new(id: &str, crx: Option<CrxComponent>) -> Self {
        let mut item = CrxUpdateItem::new(id);
        let mut ping = PingData { id: id.to_string(), ..Default::default() };
        if let Some(crx) = &crx {
            item.previous_version = Some(crx.version.clone());
            ping.previous_version = crx.version.to_string();
            ping.previous_fingerprint = crx.fingerprint.clone();
        }
        Component { item, crx, check: None, ping, reached_can_update: false }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }

    pub fn has_data(&self) -> bool {
        self.crx.is_some()
    }

    pub fn state(&self) -> ComponentState {
        self.item.state
    }

    /// The terminal report, owed only once the server offered an update.
    pub fn ping_data(&self) -> Option<&PingData> {
        self.reached_can_update.then_some(&self.ping)
    }

    /// The checker's view of this component; `None` when data was withheld.
    pub fn check_app(&self, install_source: Option<String>) -> Option<crate::update_check::CheckApp> {
        let crx = self.crx.as_ref()?;
        Some(crate::update_check::CheckApp {
            id: self.item.id.clone(),
            version: crx.version.clone(),
            fingerprint: crx.fingerprint.clone(),
            updates_enabled: crx.updates_enabled,
            install_source,
        })
    }

    fn set_state(&mut self, state: ComponentState, engine: &Engine) {
        self.item.state = state;
        let event = match state {
            ComponentState::Checking => Events::ComponentCheckingForUpdates,
            ComponentState::CanUpdate => Events::ComponentUpdateFound,
            ComponentState::Wait => Events::ComponentWait,
            ComponentState::Downloading | ComponentState::DownloadingDiff => {
                Events::ComponentUpdateDownloading
            }
            ComponentState::Updating | ComponentState::UpdatingDiff => {
                Events::ComponentUpdateReady
            }
            ComponentState::Updated => Events::ComponentUpdated,
            ComponentState::UpToDate => Events::ComponentNotUpdated,
            ComponentState::UpdateError => Events::ComponentUpdateError,
            ComponentState::New => return,
        };
        (engine.notify)(event, &self.item);
    }

    fn fail(&mut self, category: ErrorCategory, code: i32, engine: &Engine) {
        self.item.error_category = category;
        self.item.error_code = code;
        self.ping.error_category = category;
        self.ping.error_code = code;
        self.set_state(ComponentState::UpdateError, engine);
    }

    /// The embedder's data callback withheld this component.
    pub fn fail_withheld(&mut self, engine: &Engine) {
        warn!("no component data for {}", self.id());
        self.fail(ErrorCategory::Service, Error::CrxNotFound.code(), engine);
    }

    /// The run is queued behind another for the same id.
    pub fn wait(&mut self, engine: &Engine) {
        self.set_state(ComponentState::Wait, engine);
    }

    /// The client was stopped before this component could start.
    pub fn fail_canceled(&mut self, engine: &Engine) {
        self.fail(ErrorCategory::Service, ServiceErrorCode::Canceled.code(), engine);
    }

    pub fn begin_checking(&mut self, engine: &Engine) {
        self.set_state(ComponentState::Checking, engine);
    }

    /// The whole check round trip failed; no verdict exists for anyone.
    pub fn fail_check(&mut self, code: i32, engine: &Engine) {
        self.fail(ErrorCategory::UpdateCheck, code, engine);
    }

    pub fn apply_check_result(&mut self, result: CheckResult, engine: &Engine) {
        self.item.custom_attributes = result.custom_attributes.clone();
        match &result.status {
            UpdateCheckStatus::NoUpdate => {
                info!("{} is up to date", self.id());
                self.set_state(ComponentState::UpToDate, engine);
            }
            UpdateCheckStatus::Error(code) => {
                self.fail(ErrorCategory::UpdateCheck, *code, engine);
            }
            UpdateCheckStatus::Ok => {
                let Some(next_version) =
                    result.manifest.as_ref().and_then(|m| m.version.parse().ok())
                else {
                    warn!("{}: ok verdict without a usable manifest", self.id());
                    self.fail(ErrorCategory::UpdateCheck, ERROR_PARSE, engine);
                    return;
                };
                self.ping.next_version = result
                    .manifest
                    .as_ref()
                    .map(|m| m.version.clone())
                    .unwrap_or_default();
                self.item.next_version = Some(next_version);
                self.check = Some(result);
                self.reached_can_update = true;
                self.set_state(ComponentState::CanUpdate, engine);
            }
        }
    }

    /// Runs the download/unpack/install pipeline. Only valid in `CanUpdate`.
    pub async fn run_update(&mut self, engine: &Engine) {
        debug_assert_eq!(self.item.state, ComponentState::CanUpdate);
        let Some(crx) = self.crx.clone() else {
            self.fail(ErrorCategory::Service, Error::CrxNotFound.code(), engine);
            return;
        };
        if !crx.updates_enabled {
            info!("updates are disabled for {}", self.id());
            self.fail(
                ErrorCategory::Service,
                ServiceErrorCode::UpdateDisabled.code(),
                engine,
            );
            return;
        }
        let Some(check) = self.check.clone() else {
            self.fail(ErrorCategory::Service, Error::ServiceError.code(), engine);
            return;
        };
        let Some(package) = first_package(&check) else {
            self.fail(ErrorCategory::UpdateCheck, ERROR_PARSE, engine);
            return;
        };

        if package.namediff.is_some() && package.hashdiff_sha256.is_some() {
            match self.try_cycle(engine, &crx, &check, &package, true).await {
                Ok(()) => {
                    self.finish_success(engine, &crx, &check, &package).await;
                    return;
                }
                Err(cycle_error) => {
                    info!(
                        "diff update for {} failed ({:?} {}), falling back to full package",
                        self.id(),
                        cycle_error.category,
                        cycle_error.code
                    );
                    self.ping.diff_error_category = cycle_error.category;
                    self.ping.diff_error_code = cycle_error.code;
                    self.ping.diff_update_failed = true;
                }
            }
        }

        match self.try_cycle(engine, &crx, &check, &package, false).await {
            Ok(()) => self.finish_success(engine, &crx, &check, &package).await,
            Err(cycle_error) => {
                error!(
                    "update for {} failed: {:?} {}",
                    self.id(),
                    cycle_error.category,
                    cycle_error.code
                );
                self.fail(cycle_error.category, cycle_error.code, engine);
            }
        }
    }

    /// One download-unpack-install pass over either the diff or the full
    /// package.
    async fn try_cycle(
        &mut self,
        engine: &Engine,
        crx: &CrxComponent,
        check: &CheckResult,
        package: &response::Package,
        diff: bool,
    ) -> Result<(), CycleError> {
        let missing_hash =
            CycleError { category: ErrorCategory::Download, code: ERROR_NO_HASH };
        let (name, hash) = if diff {
            match (package.namediff.as_deref(), package.hashdiff_sha256.as_deref()) {
                (Some(name), Some(hash)) => (name, hash),
                _ => return Err(missing_hash),
            }
        } else {
            match package.hash_sha256.as_deref() {
                Some(hash) => (package.name.as_str(), hash),
                None => return Err(missing_hash),
            }
        };
        let urls = resolve_urls(&check.urls, name);

        self.set_state(
            if diff { ComponentState::DownloadingDiff } else { ComponentState::Downloading },
            engine,
        );
        let downloaded = self.download_with_progress(engine, urls, hash).await?;
        let crx_bytes = std::fs::read(&downloaded.path);
        // The on-disk copy goes away whether or not the read succeeded.
        let _ = std::fs::remove_file(&downloaded.path);
        let crx_bytes = crx_bytes.map_err(|e| {
            error!("could not read downloaded package: {e}");
            CycleError { category: ErrorCategory::Download, code: crate::download::ERROR_IO }
        })?;

        self.set_state(
            if diff { ComponentState::UpdatingDiff } else { ComponentState::Updating },
            engine,
        );
        let unpacked = engine
            .unpacker
            .unpack(crx_bytes, crx.pk_hash.clone(), crx.crx_format_requirement)
            .await
            .map_err(|e| {
                warn!("package for {} failed verification: {e}", self.id());
                CycleError { category: ErrorCategory::Unpack, code: e.code() }
            })?;

        let install_path = if diff {
            let patched = engine.patcher.patch(unpacked.path()).await.map_err(|e| {
                CycleError { category: ErrorCategory::Unpack, code: e.code }
            })?;
            patched
        } else {
            unpacked.path().to_owned()
        };

        let params = check.manifest.as_ref().and_then(|manifest| {
            manifest.run.as_ref().map(|run| InstallParams {
                run: run.clone(),
                arguments: manifest.arguments.clone().unwrap_or_default(),
            })
        });
        let install_result = self.install_with_progress(engine, crx, install_path.clone(), params).await;
        if diff {
            let _ = std::fs::remove_dir_all(&install_path);
        }
        drop(unpacked);
        install_result.map_err(|code| CycleError { category: ErrorCategory::Install, code })
    }

    /// Drives the download while folding progress into the update item.
    async fn download_with_progress(
        &mut self,
        engine: &Engine,
        urls: Vec<Url>,
        hash: &str,
    ) -> Result<crate::download::DownloadedFile, CycleError> {
        let (sender, mut receiver) = mpsc::unbounded();
        let progress: ProgressFn = Rc::new(move |downloaded, total| {
            let _ = sender.unbounded_send((downloaded, total));
        });

        let mut download = engine.downloader.download(urls, hash.to_string(), progress).fuse();
        let result = loop {
            futures::select! {
                progress = receiver.next() => {
                    if let Some((downloaded, total)) = progress {
                        self.item.downloaded_bytes = downloaded;
                        self.item.total_bytes = total;
                        (engine.notify)(Events::ComponentUpdateDownloading, &self.item);
                    }
                }
                result = download => break result,
            }
        };
        // Progress that raced completion still belongs to this item.
        while let Ok(Some((downloaded, total))) = receiver.try_next() {
            self.item.downloaded_bytes = downloaded;
            self.item.total_bytes = total;
            (engine.notify)(Events::ComponentUpdateDownloading, &self.item);
        }

        match result {
            Ok(downloaded) => {
                self.ping.download_metrics.push(downloaded.metrics.clone());
                Ok(downloaded)
            }
            Err(e) => {
                self.ping.download_metrics.push(DownloadMetrics {
                    error: e.code,
                    ..Default::default()
                });
                Err(CycleError { category: ErrorCategory::Download, code: e.code })
            }
        }
    }

    async fn install_with_progress(
        &mut self,
        engine: &Engine,
        crx: &CrxComponent,
        path: std::path::PathBuf,
        params: Option<InstallParams>,
    ) -> Result<(), i32> {
        let (sender, mut receiver) = mpsc::unbounded();
        let progress = Rc::new(move |percent: i32| {
            let _ = sender.unbounded_send(percent);
        });

        let mut install = crx.installer.install(path, params, progress).fuse();
        let result = loop {
            futures::select! {
                percent = receiver.next() => {
                    if let Some(percent) = percent {
                        self.item.install_progress = percent;
                        (engine.notify)(Events::ComponentUpdateUpdating, &self.item);
                    }
                }
                result = install => break result,
            }
        };
        while let Ok(Some(percent)) = receiver.try_next() {
            self.item.install_progress = percent;
            (engine.notify)(Events::ComponentUpdateUpdating, &self.item);
        }
        result.map_err(|e| e.code())
    }

    async fn finish_success(
        &mut self,
        engine: &Engine,
        crx: &CrxComponent,
        check: &CheckResult,
        package: &response::Package,
    ) {
        let next_version = self.ping.next_version.clone();
        engine
            .persisted
            .set_product_version_and_fingerprint(
                self.id(),
                &next_version,
                package.fp.as_deref(),
            )
            .await;
        self.ping.next_fingerprint = package.fp.clone();

        if let Some(handler) = &crx.action_handler {
            let mut all_ok = true;
            for action in &check.actions {
                if let Err(e) = handler.run(action, &engine.session_id).await {
                    warn!("action {action:?} for {} failed: {e}", self.id());
                    all_ok = false;
                }
            }
            if !check.actions.is_empty() {
                self.ping.action_run = Some(all_ok);
            }
        }

        info!("{} updated to {}", self.id(), next_version);
        self.set_state(ComponentState::Updated, engine);
    }
}

fn first_package(check: &CheckResult) -> Option<response::Package> {
    check
        .manifest
        .as_ref()?
        .packages
        .as_ref()?
        .packages
        .first()
        .cloned()
}

/// Joins a package name onto each ranked codebase.
fn resolve_urls(codebases: &[Url], name: &str) -> Vec<Url> {
    codebases
        .iter()
        .filter_map(|codebase| match codebase.join(name) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("cannot resolve {name:?} against {codebase}: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{DownloadError, DownloadedFile};
    use crate::installer::stub::StubInstaller;
    use crate::patcher::StubPatcher;
    use crate::storage::{MemStorage, Storage};
    use crate::unpacker::{test_support, CrxUnpacker};
    use crate::update_check::CheckResult;
    use assert_matches::assert_matches;
    use futures::future::LocalBoxFuture;
    use pretty_assertions::assert_eq;
    use sha2::{Digest, Sha256};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};
    use std::io::Write;

    /// Serves scripted payloads, or an error code, one per call.
    struct FakeDownloader {
        payloads: RefCell<VecDeque<Result<Vec<u8>, i32>>>,
    }

    impl FakeDownloader {
        fn serving(payloads: Vec<Result<Vec<u8>, i32>>) -> Self {
            FakeDownloader { payloads: RefCell::new(payloads.into()) }
        }
    }

    impl CrxDownloader for FakeDownloader {
        fn download(
            &self,
            urls: Vec<Url>,
            _expected_sha256: String,
            progress: ProgressFn,
        ) -> LocalBoxFuture<'_, Result<DownloadedFile, DownloadError>> {
            let next = self.payloads.borrow_mut().pop_front().expect("unscripted download");
            async move {
                let payload = next.map_err(|code| DownloadError { code })?;
                let size = payload.len() as i64;
                progress(size, size);
                let mut file = tempfile::NamedTempFile::new().unwrap();
                file.write_all(&payload).unwrap();
                let (_file, path) = file.keep().unwrap();
                Ok(DownloadedFile {
                    path,
                    metrics: DownloadMetrics {
                        url: urls[0].to_string(),
                        downloaded_bytes: size,
                        total_bytes: size,
                        ..Default::default()
                    },
                })
            }
            .boxed_local()
        }
    }

    /// Hands out a fixed path instead of fetching anything.
    struct FixedPathDownloader {
        path: std::path::PathBuf,
    }

    impl CrxDownloader for FixedPathDownloader {
        fn download(
            &self,
            _urls: Vec<Url>,
            _expected_sha256: String,
            _progress: ProgressFn,
        ) -> LocalBoxFuture<'_, Result<DownloadedFile, DownloadError>> {
            let path = self.path.clone();
            async move { Ok(DownloadedFile { path, metrics: DownloadMetrics::default() }) }
                .boxed_local()
        }
    }

    struct Fixture {
        engine: Engine,
        events: Rc<RefCell<Vec<(Events, ComponentState)>>>,
        storage: Rc<futures::lock::Mutex<Box<dyn Storage>>>,
    }

    fn fixture(downloader: impl CrxDownloader + 'static) -> Fixture {
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        let storage: Rc<futures::lock::Mutex<Box<dyn Storage>>> =
            Rc::new(futures::lock::Mutex::new(Box::new(MemStorage::new())));
        let engine = Engine {
            downloader: Rc::new(downloader),
            unpacker: Rc::new(CrxUnpacker),
            patcher: Rc::new(StubPatcher),
            persisted: PersistedData::new(Rc::clone(&storage)),
            session_id: "{sid}".to_string(),
            notify: Rc::new(move |event, item: &CrxUpdateItem| {
                log.borrow_mut().push((event, item.state));
            }),
        };
        Fixture { engine, events, storage }
    }

    fn crx_component() -> CrxComponent {
        CrxComponent::builder()
            .name("test-component")
            .pk_hash(test_support::pk_hash())
            .version("0.9".parse().unwrap())
            .fingerprint("fp1")
            .installer(Rc::new(StubInstaller::default()) as Rc<dyn crate::installer::Installer>)
            .build()
    }

    fn check_ok(payload: &[u8], diff: bool) -> CheckResult {
        let hash = hex::encode(Sha256::digest(payload));
        let package = response::Package {
            name: "pkg.crx".to_string(),
            hash_sha256: Some(hash.clone()),
            namediff: diff.then(|| "pkg_diff.crx".to_string()),
            hashdiff_sha256: diff.then_some(hash),
            fp: Some("fp2".to_string()),
        };
        CheckResult {
            id: "abc".to_string(),
            status: UpdateCheckStatus::Ok,
            manifest: Some(response::Manifest {
                version: "1.0".to_string(),
                run: None,
                arguments: None,
                packages: Some(response::Packages { packages: vec![package] }),
            }),
            urls: vec![Url::parse("http://localhost/pkg/").unwrap()],
            actions: Vec::new(),
            custom_attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_full_update_success() {
        let crx_bytes = test_support::make_crx(&[("manifest.json", b"{}")]);
        let Fixture { engine, events, storage } =
            fixture(FakeDownloader::serving(vec![Ok(crx_bytes.clone())]));

        let mut component = Component::new("abc", Some(crx_component()));
        component.begin_checking(&engine);
        component.apply_check_result(check_ok(&crx_bytes, false), &engine);
        assert_eq!(component.state(), ComponentState::CanUpdate);
        component.run_update(&engine).await;

        assert_eq!(component.state(), ComponentState::Updated);
        assert_eq!(
            events.borrow().iter().map(|(event, _)| *event).collect::<Vec<_>>(),
            vec![
                Events::ComponentCheckingForUpdates,
                Events::ComponentUpdateFound,
                Events::ComponentUpdateDownloading,
                Events::ComponentUpdateDownloading,
                Events::ComponentUpdateReady,
                Events::ComponentUpdateUpdating,
                Events::ComponentUpdated,
            ]
        );
        assert_eq!(component.item.install_progress, 100);
        assert_eq!(component.item.downloaded_bytes, crx_bytes.len() as i64);

        let ping = component.ping_data().unwrap();
        assert_eq!(ping.previous_version, "0.9");
        assert_eq!(ping.next_version, "1.0");
        assert_eq!(ping.next_fingerprint.as_deref(), Some("fp2"));
        assert!(ping.succeeded());
        assert_eq!(ping.download_metrics.len(), 1);

        let storage = storage.lock().await;
        assert_eq!(
            storage.get_string("updateclientdata.apps.abc.pv").await.as_deref(),
            Some("1.0")
        );
        assert_eq!(
            storage.get_string("updateclientdata.apps.abc.fp").await.as_deref(),
            Some("fp2")
        );
    }

    #[tokio::test]
    async fn test_noupdate_is_terminal_without_ping() {
        let Fixture { engine, .. } = fixture(FakeDownloader::serving(vec![]));
        let mut component = Component::new("abc", Some(crx_component()));
        component.begin_checking(&engine);
        component.apply_check_result(
            CheckResult {
                id: "abc".to_string(),
                status: UpdateCheckStatus::NoUpdate,
                manifest: None,
                urls: Vec::new(),
                actions: Vec::new(),
                custom_attributes: BTreeMap::new(),
            },
            &engine,
        );
        assert_eq!(component.state(), ComponentState::UpToDate);
        assert_matches!(component.ping_data(), None);
    }

    #[tokio::test]
    async fn test_download_failure_is_a_download_error() {
        let crx_bytes = test_support::make_crx(&[("a", b"b")]);
        let Fixture { engine, .. } =
            fixture(FakeDownloader::serving(vec![Err(crate::download::ERROR_BAD_HASH)]));

        let mut component = Component::new("abc", Some(crx_component()));
        component.begin_checking(&engine);
        component.apply_check_result(check_ok(&crx_bytes, false), &engine);
        component.run_update(&engine).await;

        assert_eq!(component.state(), ComponentState::UpdateError);
        assert_eq!(component.item.error_category, ErrorCategory::Download);
        assert_eq!(component.item.error_code, crate::download::ERROR_BAD_HASH);

        let ping = component.ping_data().unwrap();
        assert!(!ping.succeeded());
        assert_eq!(ping.download_metrics[0].error, crate::download::ERROR_BAD_HASH);
    }

    #[tokio::test]
    async fn test_unreadable_download_is_removed_before_failing() {
        let crx_bytes = test_support::make_crx(&[("a", b"b")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.crx");
        // A symlink to itself exists on disk but cannot be read.
        std::os::unix::fs::symlink(&path, &path).unwrap();
        let Fixture { engine, .. } = fixture(FixedPathDownloader { path: path.clone() });

        let mut component = Component::new("abc", Some(crx_component()));
        component.begin_checking(&engine);
        component.apply_check_result(check_ok(&crx_bytes, false), &engine);
        component.run_update(&engine).await;

        assert_eq!(component.state(), ComponentState::UpdateError);
        assert_eq!(component.item.error_category, ErrorCategory::Download);
        assert_eq!(component.item.error_code, crate::download::ERROR_IO);
        // The unreadable payload was cleaned up, not left behind.
        assert!(std::fs::symlink_metadata(&path).is_err());
    }

    #[tokio::test]
    async fn test_diff_failure_falls_back_to_full_package() {
        let crx_bytes = test_support::make_crx(&[("manifest.json", b"{}")]);
        // First download is the diff package; the stub patcher rejects it and
        // the second download serves the full package.
        let Fixture { engine, events, .. } = fixture(FakeDownloader::serving(vec![
            Ok(crx_bytes.clone()),
            Ok(crx_bytes.clone()),
        ]));

        let mut component = Component::new("abc", Some(crx_component()));
        component.begin_checking(&engine);
        component.apply_check_result(check_ok(&crx_bytes, true), &engine);
        component.run_update(&engine).await;

        assert_eq!(component.state(), ComponentState::Updated);
        let ping = component.ping_data().unwrap();
        assert!(ping.diff_update_failed);
        assert_eq!(ping.diff_error_category, ErrorCategory::Unpack);
        assert_eq!(ping.diff_error_code, crate::patcher::ERROR_UNSUPPORTED);
        assert!(ping.succeeded());
        assert_eq!(ping.download_metrics.len(), 2);

        let states: Vec<_> = events.borrow().iter().map(|(_, state)| *state).collect();
        assert!(states.contains(&ComponentState::DownloadingDiff));
        assert!(states.contains(&ComponentState::UpdatingDiff));
        assert!(states.contains(&ComponentState::Downloading));
        assert!(states.contains(&ComponentState::Updating));
    }

    #[tokio::test]
    async fn test_updates_disabled_short_circuits() {
        let crx_bytes = test_support::make_crx(&[("a", b"b")]);
        let Fixture { engine, .. } = fixture(FakeDownloader::serving(vec![]));

        let mut crx = crx_component();
        crx.updates_enabled = false;
        let mut component = Component::new("abc", Some(crx));
        component.begin_checking(&engine);
        component.apply_check_result(check_ok(&crx_bytes, false), &engine);
        component.run_update(&engine).await;

        assert_eq!(component.state(), ComponentState::UpdateError);
        assert_eq!(component.item.error_category, ErrorCategory::Service);
        assert_eq!(component.item.error_code, ServiceErrorCode::UpdateDisabled.code());
        // The server did offer an update, so a ping is still owed.
        assert!(component.ping_data().is_some());
    }

    #[tokio::test]
    async fn test_withheld_component_fails_without_checking() {
        let Fixture { engine, events, .. } = fixture(FakeDownloader::serving(vec![]));
        let mut component = Component::new("abc", None);
        component.fail_withheld(&engine);

        assert_eq!(component.state(), ComponentState::UpdateError);
        assert_eq!(component.item.error_category, ErrorCategory::Service);
        assert_eq!(component.item.error_code, Error::CrxNotFound.code());
        assert_eq!(component.item.previous_version, None);
        assert_matches!(component.ping_data(), None);
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_resolve_urls_joins_package_names() {
        let urls = resolve_urls(
            &[
                Url::parse("http://a.example/pkg/").unwrap(),
                Url::parse("http://b.example/pkg/").unwrap(),
            ],
            "c.crx",
        );
        assert_eq!(urls[0].as_str(), "http://a.example/pkg/c.crx");
        assert_eq!(urls[1].as_str(), "http://b.example/pkg/c.crx");
    }
}
