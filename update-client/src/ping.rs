// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Event pings: the terminal report the server receives for every update
//! attempt that got past the check. Pings are fire-and-forget; a ping that
//! cannot be delivered never changes the outcome of an update.

use crate::download::DownloadMetrics;
use crate::error::ErrorCategory;
use crate::http_request::HttpRequest;
use crate::protocol::request::{App, Event, EventType};
use crate::request_builder::{RequestBuilder, RequestParams};
use futures::future::LocalBoxFuture;
use futures::lock::Mutex;
use futures::FutureExt;
use tracing::{info, warn};

/// Everything one component collected for its terminal report.
#[derive(Clone, Debug, Default)]
pub struct PingData {
    pub id: String,
    pub previous_version: String,
    pub next_version: String,
    pub previous_fingerprint: Option<String>,
    pub next_fingerprint: Option<String>,
    pub error_category: ErrorCategory,
    pub error_code: i32,
    pub extra_code1: i32,
    pub diff_error_category: ErrorCategory,
    pub diff_error_code: i32,
    pub diff_update_failed: bool,
    pub download_metrics: Vec<DownloadMetrics>,
    /// Set when a post-install action ran; carries its result.
    pub action_run: Option<bool>,
}

impl PingData {
    pub fn succeeded(&self) -> bool {
        self.error_code == 0 && self.error_category == ErrorCategory::None
    }
}

pub trait PingSender {
    fn send_ping(
        &self,
        session_id: &str,
        is_foreground: bool,
        data: &PingData,
    ) -> LocalBoxFuture<'_, ()>;

    /// Reports that a registered component was uninstalled.
    fn send_uninstall_ping(
        &self,
        session_id: &str,
        id: &str,
        version: &str,
        reason: i32,
    ) -> LocalBoxFuture<'_, ()>;
}

pub struct HttpPingSender {
    // Async Mutex: overlapping runs may flush pings through one sender.
    http: Mutex<Box<dyn HttpRequest>>,
    url: String,
}

impl HttpPingSender {
    pub fn new(http: Box<dyn HttpRequest>, url: impl Into<String>) -> Self {
        HttpPingSender { http: Mutex::new(http), url: url.into() }
    }

    async fn send(&self, session_id: &str, is_foreground: bool, app: App) {
        let builder = RequestBuilder::new(RequestParams {
            session_id: session_id.to_string(),
            is_foreground,
        })
        .add_app(app);
        let request = match builder.build(&self.url) {
            Ok(request) => request,
            Err(e) => {
                warn!("could not build ping request: {e}");
                return;
            }
        };
        let result = self.http.lock().await.request(request).await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => info!("ping rejected with status {}", response.status()),
            Err(e) => info!("ping delivery failed: {e}"),
        }
    }
}

/// Flattens [`PingData`] into the protocol events for one app entry.
fn build_events(data: &PingData) -> Vec<Event> {
    let mut events = Vec::new();
    for metrics in &data.download_metrics {
        events.push(Event {
            eventtype: EventType::Download,
            eventresult: i32::from(metrics.error == 0),
            errorcode: (metrics.error != 0).then_some(metrics.error),
            url: Some(metrics.url.clone()),
            downloaded: Some(metrics.downloaded_bytes),
            total: Some(metrics.total_bytes),
            download_time_ms: Some(metrics.download_time_ms),
            ..Default::default()
        });
    }
    if let Some(succeeded) = data.action_run {
        events.push(Event {
            eventtype: EventType::ActionRun,
            eventresult: i32::from(succeeded),
            ..Default::default()
        });
    }
    events.push(Event {
        eventtype: EventType::UpdateComplete,
        eventresult: i32::from(data.succeeded()),
        errorcat: (data.error_category != ErrorCategory::None)
            .then_some(data.error_category as i32),
        errorcode: (data.error_code != 0).then_some(data.error_code),
        extracode1: (data.extra_code1 != 0).then_some(data.extra_code1),
        diffresult: data.diff_update_failed.then_some(0),
        differrorcat: (data.diff_error_category != ErrorCategory::None)
            .then_some(data.diff_error_category as i32),
        differrorcode: (data.diff_error_code != 0).then_some(data.diff_error_code),
        previousversion: Some(data.previous_version.clone()),
        nextversion: Some(data.next_version.clone()),
        previousfp: data.previous_fingerprint.clone(),
        nextfp: data.next_fingerprint.clone(),
        ..Default::default()
    });
    events
}

impl PingSender for HttpPingSender {
    fn send_ping(
        &self,
        session_id: &str,
        is_foreground: bool,
        data: &PingData,
    ) -> LocalBoxFuture<'_, ()> {
        let session_id = session_id.to_string();
        let app = App {
            appid: data.id.clone(),
            version: data.previous_version.clone(),
            events: build_events(data),
            ..Default::default()
        };
        async move { self.send(&session_id, is_foreground, app).await }.boxed_local()
    }

    fn send_uninstall_ping(
        &self,
        session_id: &str,
        id: &str,
        version: &str,
        reason: i32,
    ) -> LocalBoxFuture<'_, ()> {
        let session_id = session_id.to_string();
        let app = App {
            appid: id.to_string(),
            version: version.to_string(),
            events: vec![Event {
                eventtype: EventType::Uninstall,
                eventresult: 1,
                reason: Some(reason),
                ..Default::default()
            }],
            ..Default::default()
        };
        async move { self.send(&session_id, false, app).await }.boxed_local()
    }
}
