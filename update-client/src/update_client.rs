// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The embedder-facing orchestrator.
//!
//! One [`UpdateClient`] serializes runs per component id: a second `update`
//! for a busy id queues behind the first, a second `install` fails fast with
//! [`Error::UpdateInProgress`]. All work happens on the caller's task; the
//! client is single-threaded by construction and shares its seams through
//! `Rc`.

use crate::clock;
use crate::common::{ComponentState, CrxComponent, CrxUpdateItem};
use crate::component::{Component, Engine};
use crate::download::CrxDownloader;
use crate::error::Error;
use crate::metrics::{Metrics, MetricsReporter, StubMetricsReporter};
use crate::observer::{Events, Observer};
use crate::patcher::{Patcher, StubPatcher};
use crate::ping::PingSender;
use crate::storage::{MemStorage, PersistedData, Storage};
use crate::unpacker::{CrxUnpacker, Unpacker};
use crate::update_check::{CheckRequest, UpdateChecker};
use crate::version::Version;
use futures::channel::oneshot;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Supplies fresh component data for the requested ids, in order. Returning
/// `None` for an id withholds the component and fails it immediately.
pub type CrxDataCallback = Box<dyn FnOnce(&[String]) -> Vec<Option<CrxComponent>>>;

/// Receives a snapshot of a component's update item on every change.
pub type CrxStateChangeCallback = Box<dyn Fn(CrxUpdateItem)>;

/// Server-driven backoff window shared by all background runs.
#[derive(Debug, Default)]
struct ThrottleState {
    until: Option<SystemTime>,
}

#[derive(TypedBuilder)]
pub struct UpdateClientConfig {
    pub checker: Rc<dyn UpdateChecker>,
    pub downloader: Rc<dyn CrxDownloader>,
    pub pinger: Rc<dyn PingSender>,
    #[builder(default = Rc::new(CrxUnpacker) as Rc<dyn Unpacker>)]
    pub unpacker: Rc<dyn Unpacker>,
    #[builder(default = Rc::new(StubPatcher) as Rc<dyn Patcher>)]
    pub patcher: Rc<dyn Patcher>,
    #[builder(
        default = Rc::new(futures::lock::Mutex::new(Box::new(MemStorage::new()) as Box<dyn Storage>))
    )]
    pub storage: Rc<futures::lock::Mutex<Box<dyn Storage>>>,
    #[builder(default = Box::new(StubMetricsReporter) as Box<dyn MetricsReporter>)]
    pub metrics_reporter: Box<dyn MetricsReporter>,
}

#[derive(Clone)]
pub struct UpdateClient {
    inner: Rc<Inner>,
}

struct Inner {
    checker: Rc<dyn UpdateChecker>,
    downloader: Rc<dyn CrxDownloader>,
    unpacker: Rc<dyn Unpacker>,
    patcher: Rc<dyn Patcher>,
    pinger: Rc<dyn PingSender>,
    persisted: PersistedData,
    metrics: RefCell<Box<dyn MetricsReporter>>,
    observers: RefCell<Vec<Rc<dyn Observer>>>,
    throttle: RefCell<ThrottleState>,
    in_flight: RefCell<HashSet<String>>,
    waiters: RefCell<HashMap<String, Vec<oneshot::Sender<()>>>>,
    stopped: Cell<bool>,
}

impl Inner {
    fn throttled(&self) -> bool {
        self.throttle.borrow().until.map_or(false, |until| clock::now() < until)
    }

    /// `Some(0)` clears the window, a positive value replaces it, `None`
    /// leaves it untouched.
    fn observe_retry_after(&self, retry_after_sec: Option<i64>) {
        match retry_after_sec {
            Some(0) => self.throttle.borrow_mut().until = None,
            Some(seconds) if seconds > 0 => {
                info!("server requested {seconds}s of update check backoff");
                self.throttle.borrow_mut().until =
                    Some(clock::now() + Duration::from_secs(seconds as u64));
            }
            _ => {}
        }
    }

    fn release(&self, ids: &[String]) {
        let mut in_flight = self.in_flight.borrow_mut();
        let mut waiters = self.waiters.borrow_mut();
        for id in ids {
            in_flight.remove(id);
            for waiter in waiters.remove(id).unwrap_or_default() {
                let _ = waiter.send(());
            }
        }
    }
}

/// Releases the ids of one run and wakes anything queued behind them.
struct InFlightGuard {
    inner: Rc<Inner>,
    ids: Vec<String>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.release(&self.ids);
    }
}

#[derive(Clone, Copy)]
enum RunMode {
    Update { is_foreground: bool },
    Install,
}

impl RunMode {
    fn is_foreground(self) -> bool {
        match self {
            RunMode::Update { is_foreground } => is_foreground,
            RunMode::Install => true,
        }
    }

    /// Queued runs wait for the busy id; installs fail fast instead.
    fn queues(self) -> bool {
        matches!(self, RunMode::Update { .. })
    }

    fn install_source(self) -> Option<String> {
        match self {
            RunMode::Update { .. } => None,
            RunMode::Install => Some("ondemand".to_string()),
        }
    }
}

fn new_session_id() -> String {
    format!("{{{}}}", Uuid::new_v4())
}

impl UpdateClient {
    pub fn new(config: UpdateClientConfig) -> Self {
        UpdateClient {
            inner: Rc::new(Inner {
                checker: config.checker,
                downloader: config.downloader,
                unpacker: config.unpacker,
                patcher: config.patcher,
                pinger: config.pinger,
                persisted: PersistedData::new(config.storage),
                metrics: RefCell::new(config.metrics_reporter),
                observers: RefCell::new(Vec::new()),
                throttle: RefCell::new(ThrottleState::default()),
                in_flight: RefCell::new(HashSet::new()),
                waiters: RefCell::new(HashMap::new()),
                stopped: Cell::new(false),
            }),
        }
    }

    pub fn add_observer(&self, observer: Rc<dyn Observer>) {
        self.inner.observers.borrow_mut().push(observer);
    }

    /// Refuses new runs. Runs already queued terminate with
    /// [`Error::UpdateCanceled`] when they would otherwise start.
    pub fn stop(&self) {
        self.inner.stopped.set(true);
    }

    /// Checks and, where offered, updates `ids` in one batched run.
    ///
    /// Returns `Ok(())` once every component reached a terminal state, even
    /// if some of them failed; per-component outcomes travel through the
    /// state-change callback. The error cases are whole-run failures only.
    pub async fn update(
        &self,
        ids: Vec<String>,
        data_callback: CrxDataCallback,
        state_change: Option<CrxStateChangeCallback>,
        is_foreground: bool,
    ) -> Result<(), Error> {
        self.run(ids, data_callback, state_change, RunMode::Update { is_foreground }).await
    }

    /// On-demand foreground install of a single component. Exempt from
    /// throttling, but fails fast if the id is busy.
    pub async fn install(
        &self,
        id: String,
        data_callback: CrxDataCallback,
        state_change: Option<CrxStateChangeCallback>,
    ) -> Result<(), Error> {
        self.run(vec![id], data_callback, state_change, RunMode::Install).await
    }

    /// Reports an uninstalled component and drops its registration data.
    pub async fn send_uninstall_ping(&self, id: &str, version: &Version, reason: i32) {
        let session_id = new_session_id();
        self.inner
            .pinger
            .send_uninstall_ping(&session_id, id, &version.to_string(), reason)
            .await;
        self.inner.persisted.remove_registration(id).await;
    }

    async fn run(
        &self,
        ids: Vec<String>,
        data_callback: CrxDataCallback,
        state_change: Option<CrxStateChangeCallback>,
        mode: RunMode,
    ) -> Result<(), Error> {
        let inner = Rc::clone(&self.inner);
        if inner.stopped.get() {
            return Err(Error::UpdateCanceled);
        }
        if ids.is_empty() || ids.iter().collect::<HashSet<_>>().len() != ids.len() {
            return Err(Error::InvalidArgument);
        }
        if !mode.is_foreground() && inner.throttled() {
            info!("update check suppressed, server backoff in effect");
            return Err(Error::RetryLater);
        }

        let data = data_callback(&ids);
        if data.len() != ids.len() {
            warn!("data callback returned {} entries for {} ids", data.len(), ids.len());
            return Err(Error::InvalidArgument);
        }

        let session_id = new_session_id();
        let notify = {
            let inner = Rc::clone(&inner);
            Rc::new(move |event: Events, item: &CrxUpdateItem| {
                for observer in inner.observers.borrow().iter() {
                    observer.on_event(event, &item.id);
                }
                if let Some(callback) = &state_change {
                    callback(item.clone());
                }
            }) as Rc<dyn Fn(Events, &CrxUpdateItem)>
        };
        let engine = Engine {
            downloader: Rc::clone(&inner.downloader),
            unpacker: Rc::clone(&inner.unpacker),
            patcher: Rc::clone(&inner.patcher),
            persisted: inner.persisted.clone(),
            session_id: session_id.clone(),
            notify,
        };

        let mut components: Vec<Component> = ids
            .iter()
            .zip(data)
            .map(|(id, crx)| Component::new(id, crx))
            .collect();

        let _guard = self.acquire(&ids, mode, &mut components, &engine).await?;

        for component in &mut components {
            if !component.has_data() {
                component.fail_withheld(&engine);
            }
        }
        let checking: Vec<usize> = components
            .iter()
            .enumerate()
            .filter(|(_, component)| component.has_data())
            .map(|(index, _)| index)
            .collect();
        if checking.is_empty() {
            return Ok(());
        }

        let apps = checking
            .iter()
            .filter_map(|&index| components[index].check_app(mode.install_source()))
            .collect();
        for &index in &checking {
            components[index].begin_checking(&engine);
        }
        let request = CheckRequest {
            session_id: session_id.clone(),
            is_foreground: mode.is_foreground(),
            apps,
        };
        let check_started = Instant::now();
        let check_result = inner.checker.check_for_updates(request).await;
        inner.metrics.borrow_mut().report_metrics(Metrics::UpdateCheckResponseTime {
            response_time: check_started.elapsed(),
            successful: check_result.is_ok(),
        });

        let response = match check_result {
            Ok(response) => {
                inner.observe_retry_after(response.retry_after_sec);
                response
            }
            Err(check_error) => {
                warn!("update check failed with code {}", check_error.code);
                inner.observe_retry_after(check_error.retry_after_sec);
                for &index in &checking {
                    components[index].fail_check(check_error.code, &engine);
                }
                return Err(Error::UpdateCheckError);
            }
        };

        // The checker guarantees one result per requested app, in order.
        for (&index, result) in checking.iter().zip(response.results) {
            components[index].apply_check_result(result, &engine);
        }
        for component in &mut components {
            if component.state() == ComponentState::CanUpdate {
                component.run_update(&engine).await;
            }
        }

        for component in &components {
            if let Some(ping) = component.ping_data() {
                for metrics in &ping.download_metrics {
                    inner.metrics.borrow_mut().report_metrics(Metrics::Download(metrics.clone()));
                }
                inner.pinger.send_ping(&session_id, mode.is_foreground(), ping).await;
            }
        }
        Ok(())
    }

    /// Claims every id for this run, queueing or failing fast per `mode`.
    async fn acquire(
        &self,
        ids: &[String],
        mode: RunMode,
        components: &mut [Component],
        engine: &Engine,
    ) -> Result<InFlightGuard, Error> {
        let inner = &self.inner;
        let mut waited = false;
        loop {
            if inner.stopped.get() {
                for component in components.iter_mut() {
                    if !component.state().is_terminal() {
                        component.fail_canceled(engine);
                    }
                }
                return Err(Error::UpdateCanceled);
            }
            let busy = {
                let in_flight = inner.in_flight.borrow();
                ids.iter().find(|id| in_flight.contains(*id)).cloned()
            };
            let Some(busy) = busy else {
                inner.in_flight.borrow_mut().extend(ids.iter().cloned());
                return Ok(InFlightGuard { inner: Rc::clone(inner), ids: ids.to_vec() });
            };
            if !mode.queues() {
                return Err(Error::UpdateInProgress);
            }
            if !waited {
                waited = true;
                for component in components.iter_mut() {
                    component.wait(engine);
                }
            }
            let (sender, receiver) = oneshot::channel();
            inner.waiters.borrow_mut().entry(busy).or_default().push(sender);
            let _ = receiver.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock as mock_clock;
    use crate::download::HttpCrxDownloader;
    use crate::error::ErrorCategory;
    use crate::http_request::mock::MockHttpRequest;
    use crate::installer::stub::StubInstaller;
    use crate::ping::PingData;
    use crate::protocol::response;
    use crate::unpacker::test_support;
    use crate::update_check::{
        CheckError, CheckResponse, CheckResult, UpdateCheckStatus, ERROR_TRANSPORT,
    };
    use assert_matches::assert_matches;
    use futures::future::LocalBoxFuture;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use sha2::{Digest, Sha256};
    use std::collections::{BTreeMap, VecDeque};
    use url::Url;

    /// Scripted checker. An optional gate keeps the first check pending so
    /// tests can overlap two runs deterministically.
    #[derive(Default)]
    struct MockChecker {
        responses: RefCell<VecDeque<Result<CheckResponse, CheckError>>>,
        calls: Cell<usize>,
        gate: RefCell<Option<oneshot::Receiver<()>>>,
    }

    impl MockChecker {
        fn push(&self, response: Result<CheckResponse, CheckError>) {
            self.responses.borrow_mut().push_back(response);
        }
    }

    impl UpdateChecker for MockChecker {
        fn check_for_updates(
            &self,
            _request: CheckRequest,
        ) -> LocalBoxFuture<'_, Result<CheckResponse, CheckError>> {
            self.calls.set(self.calls.get() + 1);
            let gate = self.gate.borrow_mut().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                self.responses.borrow_mut().pop_front().expect("unscripted update check")
            }
            .boxed_local()
        }
    }

    #[derive(Default)]
    struct MockPinger {
        pings: RefCell<Vec<PingData>>,
        uninstalls: RefCell<Vec<(String, String, i32)>>,
    }

    impl PingSender for MockPinger {
        fn send_ping(
            &self,
            _session_id: &str,
            _is_foreground: bool,
            data: &PingData,
        ) -> LocalBoxFuture<'_, ()> {
            self.pings.borrow_mut().push(data.clone());
            async {}.boxed_local()
        }

        fn send_uninstall_ping(
            &self,
            _session_id: &str,
            id: &str,
            version: &str,
            reason: i32,
        ) -> LocalBoxFuture<'_, ()> {
            self.uninstalls.borrow_mut().push((id.to_string(), version.to_string(), reason));
            async {}.boxed_local()
        }
    }

    struct RecordingObserver {
        events: RefCell<Vec<(Events, String)>>,
    }

    impl Observer for RecordingObserver {
        fn on_event(&self, event: Events, id: &str) {
            self.events.borrow_mut().push((event, id.to_string()));
        }
    }

    struct Fixture {
        client: UpdateClient,
        checker: Rc<MockChecker>,
        pinger: Rc<MockPinger>,
        storage: Rc<futures::lock::Mutex<Box<dyn Storage>>>,
        /// Scripted package payload responses for the downloader.
        http: Rc<RefCell<MockHttpRequest>>,
    }

    fn fixture() -> Fixture {
        let checker = Rc::new(MockChecker::default());
        let pinger = Rc::new(MockPinger::default());
        let storage: Rc<futures::lock::Mutex<Box<dyn Storage>>> =
            Rc::new(futures::lock::Mutex::new(Box::new(MemStorage::new())));
        let http = Rc::new(RefCell::new(MockHttpRequest::new()));
        Fixture {
            client: UpdateClient::new(
                UpdateClientConfig::builder()
                    .checker(Rc::clone(&checker) as Rc<dyn UpdateChecker>)
                    .downloader(Rc::new(HttpCrxDownloader::new(Box::new(TeeHttp {
                        http: Rc::clone(&http),
                    }))) as Rc<dyn CrxDownloader>)
                    .pinger(Rc::clone(&pinger) as Rc<dyn PingSender>)
                    .storage(Rc::clone(&storage))
                    .build(),
            ),
            checker,
            pinger,
            storage,
            http,
        }
    }

    /// Forwards to the shared mock so tests can keep scripting it after the
    /// downloader takes ownership of the transport.
    struct TeeHttp {
        http: Rc<RefCell<MockHttpRequest>>,
    }

    impl crate::http_request::HttpRequest for TeeHttp {
        fn request(
            &mut self,
            req: hyper::Request<hyper::Body>,
        ) -> LocalBoxFuture<'_, Result<hyper::Response<Vec<u8>>, crate::http_request::Error>>
        {
            async move { self.http.borrow_mut().request(req).await }.boxed_local()
        }
    }

    fn crx_component() -> CrxComponent {
        CrxComponent::builder()
            .name("test-component")
            .pk_hash(test_support::pk_hash())
            .version("0.9".parse().unwrap())
            .installer(Rc::new(StubInstaller::default()) as Rc<dyn crate::installer::Installer>)
            .build()
    }

    fn data_callback(entries: Vec<Option<CrxComponent>>) -> CrxDataCallback {
        Box::new(move |_ids| entries)
    }

    fn ok_result(id: &str, payload: &[u8]) -> CheckResult {
        CheckResult {
            id: id.to_string(),
            status: UpdateCheckStatus::Ok,
            manifest: Some(response::Manifest {
                version: "1.0".to_string(),
                run: None,
                arguments: None,
                packages: Some(response::Packages {
                    packages: vec![response::Package {
                        name: format!("{id}.crx"),
                        hash_sha256: Some(hex::encode(Sha256::digest(payload))),
                        namediff: None,
                        hashdiff_sha256: None,
                        fp: Some("fp2".to_string()),
                    }],
                }),
            }),
            urls: vec![Url::parse("http://localhost/pkg/").unwrap()],
            actions: Vec::new(),
            custom_attributes: BTreeMap::new(),
        }
    }

    fn noupdate_result(id: &str) -> CheckResult {
        CheckResult {
            id: id.to_string(),
            status: UpdateCheckStatus::NoUpdate,
            manifest: None,
            urls: Vec::new(),
            actions: Vec::new(),
            custom_attributes: BTreeMap::new(),
        }
    }

    fn response_with(results: Vec<CheckResult>) -> CheckResponse {
        CheckResponse { results, retry_after_sec: None }
    }

    fn crx_payload_response(payload: &[u8]) -> http::Response<Vec<u8>> {
        http::Response::builder().status(200).body(payload.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_update_success_end_to_end() {
        let fixture = fixture();
        let crx_bytes = test_support::make_crx(&[("manifest.json", b"{}")]);
        fixture.checker.push(Ok(response_with(vec![ok_result("abc", &crx_bytes)])));
        fixture.http.borrow_mut().add_response(crx_payload_response(&crx_bytes));

        let observer = Rc::new(RecordingObserver { events: RefCell::new(Vec::new()) });
        fixture.client.add_observer(Rc::clone(&observer) as Rc<dyn Observer>);

        let states = Rc::new(RefCell::new(Vec::new()));
        let states_log = Rc::clone(&states);
        let result = fixture
            .client
            .update(
                vec!["abc".to_string()],
                data_callback(vec![Some(crx_component())]),
                Some(Box::new(move |item| states_log.borrow_mut().push(item))),
                false,
            )
            .await;
        assert_matches!(result, Ok(()));

        let observed: Vec<Events> =
            observer.events.borrow().iter().map(|(event, _)| *event).collect();
        assert_eq!(observed.first(), Some(&Events::ComponentCheckingForUpdates));
        assert_eq!(observed.last(), Some(&Events::ComponentUpdated));
        assert!(observed.contains(&Events::ComponentUpdateFound));
        assert!(observed.contains(&Events::ComponentUpdateDownloading));
        assert!(observed.contains(&Events::ComponentUpdateReady));

        let states = states.borrow();
        let last = states.last().unwrap();
        assert_eq!(last.state, ComponentState::Updated);
        assert_eq!(last.next_version, Some("1.0".parse().unwrap()));

        let pings = fixture.pinger.pings.borrow();
        assert_eq!(pings.len(), 1);
        assert!(pings[0].succeeded());
        assert_eq!(pings[0].next_version, "1.0");

        let storage = fixture.storage.lock().await;
        assert_eq!(
            storage.get_string("updateclientdata.apps.abc.pv").await.as_deref(),
            Some("1.0")
        );
    }

    #[tokio::test]
    async fn test_mixed_verdicts_ping_only_the_updated_component() {
        let fixture = fixture();
        let crx_bytes = test_support::make_crx(&[("manifest.json", b"{}")]);
        fixture.checker.push(Ok(response_with(vec![
            ok_result("abc", &crx_bytes),
            noupdate_result("def"),
        ])));
        fixture.http.borrow_mut().add_response(crx_payload_response(&crx_bytes));

        let states = Rc::new(RefCell::new(Vec::new()));
        let states_log = Rc::clone(&states);
        let result = fixture
            .client
            .update(
                vec!["abc".to_string(), "def".to_string()],
                data_callback(vec![Some(crx_component()), Some(crx_component())]),
                Some(Box::new(move |item| states_log.borrow_mut().push(item))),
                false,
            )
            .await;
        assert_matches!(result, Ok(()));

        let states = states.borrow();
        let last_for = |id: &str| {
            states.iter().rev().find(|item| item.id == id).map(|item| item.state)
        };
        assert_eq!(last_for("abc"), Some(ComponentState::Updated));
        assert_eq!(last_for("def"), Some(ComponentState::UpToDate));

        let pings = fixture.pinger.pings.borrow();
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].id, "abc");
    }

    #[tokio::test]
    async fn test_noupdate_sends_no_ping() {
        let fixture = fixture();
        fixture.checker.push(Ok(response_with(vec![noupdate_result("abc")])));

        let result = fixture
            .client
            .update(
                vec!["abc".to_string()],
                data_callback(vec![Some(crx_component())]),
                None,
                false,
            )
            .await;
        assert_matches!(result, Ok(()));
        assert!(fixture.pinger.pings.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_withheld_data_fails_without_check() {
        let fixture = fixture();
        let states = Rc::new(RefCell::new(Vec::new()));
        let states_log = Rc::clone(&states);

        let result = fixture
            .client
            .update(
                vec!["abc".to_string()],
                data_callback(vec![None]),
                Some(Box::new(move |item| states_log.borrow_mut().push(item))),
                false,
            )
            .await;
        assert_matches!(result, Ok(()));
        assert_eq!(fixture.checker.calls.get(), 0);
        assert!(fixture.pinger.pings.borrow().is_empty());

        let states = states.borrow();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state, ComponentState::UpdateError);
        assert_eq!(states[0].error_category, ErrorCategory::Service);
        assert_eq!(states[0].error_code, Error::CrxNotFound.code());
        assert_eq!(states[0].previous_version, None);
    }

    #[tokio::test]
    async fn test_invalid_id_lists() {
        let fixture = fixture();
        assert_matches!(
            fixture.client.update(vec![], data_callback(vec![]), None, false).await,
            Err(Error::InvalidArgument)
        );
        assert_matches!(
            fixture
                .client
                .update(
                    vec!["abc".to_string(), "abc".to_string()],
                    data_callback(vec![Some(crx_component()), Some(crx_component())]),
                    None,
                    false,
                )
                .await,
            Err(Error::InvalidArgument)
        );
        // A short data callback answer is the embedder's bug, not ours.
        assert_matches!(
            fixture
                .client
                .update(vec!["abc".to_string()], data_callback(vec![]), None, false)
                .await,
            Err(Error::InvalidArgument)
        );
        assert_eq!(fixture.checker.calls.get(), 0);
    }

    #[tokio::test]
    async fn test_check_failure_fails_every_component() {
        let fixture = fixture();
        fixture
            .checker
            .push(Err(CheckError { code: ERROR_TRANSPORT, retry_after_sec: None }));

        let states = Rc::new(RefCell::new(Vec::new()));
        let states_log = Rc::clone(&states);
        let result = fixture
            .client
            .update(
                vec!["abc".to_string(), "def".to_string()],
                data_callback(vec![Some(crx_component()), Some(crx_component())]),
                Some(Box::new(move |item| states_log.borrow_mut().push(item))),
                false,
            )
            .await;
        assert_matches!(result, Err(Error::UpdateCheckError));

        let states = states.borrow();
        let terminal: Vec<_> =
            states.iter().filter(|item| item.state == ComponentState::UpdateError).collect();
        assert_eq!(terminal.len(), 2);
        for item in terminal {
            assert_eq!(item.error_category, ErrorCategory::UpdateCheck);
            assert_eq!(item.error_code, ERROR_TRANSPORT);
        }
        // Nothing reached CanUpdate, so nothing pings.
        assert!(fixture.pinger.pings.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_throttles_background_updates() {
        mock_clock::set(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
        let fixture = fixture();
        fixture
            .checker
            .push(Err(CheckError { code: 503, retry_after_sec: Some(600) }));

        let result = fixture
            .client
            .update(
                vec!["abc".to_string()],
                data_callback(vec![Some(crx_component())]),
                None,
                false,
            )
            .await;
        assert_matches!(result, Err(Error::UpdateCheckError));

        // Inside the window: refused before the data callback runs.
        assert_matches!(
            fixture
                .client
                .update(
                    vec!["abc".to_string()],
                    data_callback(vec![Some(crx_component())]),
                    None,
                    false,
                )
                .await,
            Err(Error::RetryLater)
        );
        assert_eq!(fixture.checker.calls.get(), 1);

        mock_clock::advance(Duration::from_secs(601));
        fixture.checker.push(Ok(response_with(vec![noupdate_result("abc")])));
        assert_matches!(
            fixture
                .client
                .update(
                    vec!["abc".to_string()],
                    data_callback(vec![Some(crx_component())]),
                    None,
                    false,
                )
                .await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_install_is_exempt_from_throttle() {
        mock_clock::set(SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000));
        let fixture = fixture();
        fixture
            .checker
            .push(Err(CheckError { code: 503, retry_after_sec: Some(600) }));
        let _ = fixture
            .client
            .update(
                vec!["abc".to_string()],
                data_callback(vec![Some(crx_component())]),
                None,
                false,
            )
            .await;

        // A response with Retry-After 0 clears the window.
        let mut cleared = response_with(vec![noupdate_result("abc")]);
        cleared.retry_after_sec = Some(0);
        fixture.checker.push(Ok(cleared));
        assert_matches!(
            fixture
                .client
                .install("abc".to_string(), data_callback(vec![Some(crx_component())]), None)
                .await,
            Ok(())
        );

        fixture.checker.push(Ok(response_with(vec![noupdate_result("abc")])));
        assert_matches!(
            fixture
                .client
                .update(
                    vec!["abc".to_string()],
                    data_callback(vec![Some(crx_component())]),
                    None,
                    false,
                )
                .await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_update_queues_behind_busy_id() {
        let fixture = fixture();
        let (gate_sender, gate_receiver) = oneshot::channel();
        *fixture.checker.gate.borrow_mut() = Some(gate_receiver);
        fixture.checker.push(Ok(response_with(vec![noupdate_result("abc")])));
        fixture.checker.push(Ok(response_with(vec![noupdate_result("abc")])));

        let observer = Rc::new(RecordingObserver { events: RefCell::new(Vec::new()) });
        fixture.client.add_observer(Rc::clone(&observer) as Rc<dyn Observer>);

        let first = fixture.client.update(
            vec!["abc".to_string()],
            data_callback(vec![Some(crx_component())]),
            None,
            false,
        );
        let second = fixture.client.update(
            vec!["abc".to_string()],
            data_callback(vec![Some(crx_component())]),
            None,
            false,
        );
        let (first, second, _) = futures::join!(first, second, async move {
            let _ = gate_sender.send(());
        });
        assert_matches!(first, Ok(()));
        assert_matches!(second, Ok(()));
        assert!(observer
            .events
            .borrow()
            .iter()
            .any(|(event, _)| *event == Events::ComponentWait));
        assert_eq!(fixture.checker.calls.get(), 2);
    }

    #[tokio::test]
    async fn test_install_fails_fast_when_busy() {
        let fixture = fixture();
        let (gate_sender, gate_receiver) = oneshot::channel();
        *fixture.checker.gate.borrow_mut() = Some(gate_receiver);
        fixture.checker.push(Ok(response_with(vec![noupdate_result("abc")])));

        let first = fixture.client.update(
            vec!["abc".to_string()],
            data_callback(vec![Some(crx_component())]),
            None,
            false,
        );
        let second = fixture
            .client
            .install("abc".to_string(), data_callback(vec![Some(crx_component())]), None);
        let (first, second, _) = futures::join!(first, second, async move {
            let _ = gate_sender.send(());
        });
        assert_matches!(first, Ok(()));
        assert_matches!(second, Err(Error::UpdateInProgress));
        assert_eq!(fixture.checker.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_stop_refuses_new_runs() {
        let fixture = fixture();
        fixture.client.stop();
        assert_matches!(
            fixture
                .client
                .update(
                    vec!["abc".to_string()],
                    data_callback(vec![Some(crx_component())]),
                    None,
                    false,
                )
                .await,
            Err(Error::UpdateCanceled)
        );
        assert_eq!(fixture.checker.calls.get(), 0);
    }

    #[tokio::test]
    async fn test_uninstall_ping_drops_registration() {
        let fixture = fixture();
        {
            let mut storage = fixture.storage.lock().await;
            storage.set_string("updateclientdata.apps.abc.pv", "1.0").await.unwrap();
            storage.commit().await.unwrap();
        }

        fixture
            .client
            .send_uninstall_ping("abc", &"1.0".parse().unwrap(), 1)
            .await;

        assert_eq!(
            *fixture.pinger.uninstalls.borrow(),
            vec![("abc".to_string(), "1.0".to_string(), 1)]
        );
        let storage = fixture.storage.lock().await;
        assert_eq!(storage.get_string("updateclientdata.apps.abc.pv").await, None);
    }
}
