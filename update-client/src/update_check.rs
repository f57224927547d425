// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The update checker: one batched protocol round trip per run, returning a
//! verdict per component id in the caller's order.

use crate::http_request::HttpRequest;
use crate::protocol::{request, response};
use crate::request_builder::{RequestBuilder, RequestParams};
use crate::version::Version;
use futures::future::LocalBoxFuture;
use futures::lock::Mutex;
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Checker-internal error codes, negative so they cannot collide with HTTP
/// statuses or protocol error codes.
pub const ERROR_REQUEST_MALFORMED: i32 = -1;
pub const ERROR_TRANSPORT: i32 = -2;
pub const ERROR_PARSE: i32 = -3;
pub const ERROR_APP_MISSING: i32 = -4;
pub const ERROR_APP_STATUS: i32 = -5;

/// Server backoff longer than this is clamped.
const MAX_RETRY_AFTER_SEC: i64 = 24 * 60 * 60;

const HEADER_RETRY_AFTER: &str = "X-Retry-After";

/// Per-component snapshot the checker needs; installer handles stay behind.
#[derive(Clone, Debug)]
pub struct CheckApp {
    pub id: String,
    pub version: Version,
    pub fingerprint: Option<String>,
    pub updates_enabled: bool,
    /// `Some("ondemand")` for installs.
    pub install_source: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CheckRequest {
    pub session_id: String,
    pub is_foreground: bool,
    pub apps: Vec<CheckApp>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateCheckStatus {
    Ok,
    NoUpdate,
    Error(i32),
}

/// One server verdict for one component id.
#[derive(Clone, Debug)]
pub struct CheckResult {
    pub id: String,
    pub status: UpdateCheckStatus,
    pub manifest: Option<response::Manifest>,
    /// Ranked codebase URLs the package names are resolved against.
    pub urls: Vec<Url>,
    /// `run` values of server-specified actions.
    pub actions: Vec<String>,
    pub custom_attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct CheckResponse {
    /// One entry per requested id, in request order.
    pub results: Vec<CheckResult>,
    pub retry_after_sec: Option<i64>,
}

/// The whole check failed; no per-component verdicts are available.
#[derive(Clone, Debug, Error)]
#[error("update check failed with code {code}")]
pub struct CheckError {
    pub code: i32,
    pub retry_after_sec: Option<i64>,
}

pub trait UpdateChecker {
    fn check_for_updates(
        &self,
        request: CheckRequest,
    ) -> LocalBoxFuture<'_, Result<CheckResponse, CheckError>>;
}

/// Checker speaking the JSON protocol over an [`HttpRequest`] transport.
pub struct HttpUpdateChecker {
    // An async Mutex: the transport is held across the request await, and one
    // checker may serve overlapping runs for disjoint ids.
    http: Mutex<Box<dyn HttpRequest>>,
    url: String,
}

impl HttpUpdateChecker {
    pub fn new(http: Box<dyn HttpRequest>, url: impl Into<String>) -> Self {
        HttpUpdateChecker { http: Mutex::new(http), url: url.into() }
    }
}

impl UpdateChecker for HttpUpdateChecker {
    fn check_for_updates(
        &self,
        request: CheckRequest,
    ) -> LocalBoxFuture<'_, Result<CheckResponse, CheckError>> {
        async move {
            let params = RequestParams {
                session_id: request.session_id.clone(),
                is_foreground: request.is_foreground,
            };
            let mut builder = RequestBuilder::new(params);
            for app in &request.apps {
                builder = builder.add_app(request::App {
                    appid: app.id.clone(),
                    version: app.version.to_string(),
                    fp: app.fingerprint.clone(),
                    installsource: app.install_source.clone(),
                    enabled: Some(app.updates_enabled),
                    updatecheck: Some(request::UpdateCheck {
                        updatedisabled: Some(!app.updates_enabled),
                    }),
                    events: Vec::new(),
                });
            }
            let http_request = builder.build(&self.url).map_err(|e| {
                warn!("could not build update check request: {e}");
                CheckError { code: ERROR_REQUEST_MALFORMED, retry_after_sec: None }
            })?;

            let result = self.http.lock().await.request(http_request).await;
            let http_response = result.map_err(|e| {
                warn!("update check transport failed: {e}");
                CheckError { code: ERROR_TRANSPORT, retry_after_sec: None }
            })?;

            let retry_after_sec = parse_retry_after(http_response.headers());
            if !http_response.status().is_success() {
                return Err(CheckError {
                    code: i32::from(http_response.status().as_u16()),
                    retry_after_sec,
                });
            }

            let response = response::parse(http_response.body()).map_err(|e| {
                warn!("update check response unparseable: {e}");
                CheckError { code: ERROR_PARSE, retry_after_sec }
            })?;

            let by_id: HashMap<&str, &response::App> =
                response.apps.iter().map(|app| (app.appid.as_str(), app)).collect();
            // The response is rebuilt in the caller's id order; the server's
            // ordering is not trusted.
            let results = request
                .apps
                .iter()
                .map(|app| match by_id.get(app.id.as_str()) {
                    Some(entry) => result_for_app(entry),
                    None => error_result(&app.id, ERROR_APP_MISSING),
                })
                .collect();
            Ok(CheckResponse { results, retry_after_sec })
        }
        .boxed_local()
    }
}

fn error_result(id: &str, code: i32) -> CheckResult {
    CheckResult {
        id: id.to_string(),
        status: UpdateCheckStatus::Error(code),
        manifest: None,
        urls: Vec::new(),
        actions: Vec::new(),
        custom_attributes: BTreeMap::new(),
    }
}

fn result_for_app(app: &response::App) -> CheckResult {
    if app.status != "ok" {
        warn!("app {} rejected by server: {}", app.appid, app.status);
        return error_result(&app.appid, ERROR_APP_STATUS);
    }
    let Some(updatecheck) = app.updatecheck.as_ref() else {
        return error_result(&app.appid, ERROR_APP_MISSING);
    };

    let status = parse_status(&updatecheck.status);
    let urls = updatecheck
        .urls
        .as_ref()
        .map(|urls| {
            urls.urls
                .iter()
                .filter_map(|entry| match Url::parse(&entry.codebase) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!("discarding malformed codebase {:?}: {e}", entry.codebase);
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    let actions = updatecheck
        .actions
        .as_ref()
        .map(|actions| actions.actions.iter().filter_map(|action| action.run.clone()).collect())
        .unwrap_or_default();

    CheckResult {
        id: app.appid.clone(),
        status,
        manifest: updatecheck.manifest.clone(),
        urls,
        actions,
        custom_attributes: updatecheck.custom_attributes(),
    }
}

fn parse_status(status: &str) -> UpdateCheckStatus {
    match status {
        "ok" => UpdateCheckStatus::Ok,
        "noupdate" => UpdateCheckStatus::NoUpdate,
        "error-internal" => UpdateCheckStatus::Error(1),
        "error-hash" => UpdateCheckStatus::Error(2),
        "error-osnotsupported" => UpdateCheckStatus::Error(3),
        "error-hwnotsupported" => UpdateCheckStatus::Error(4),
        "error-unsupportedprotocol" => UpdateCheckStatus::Error(5),
        other => {
            warn!("unknown updatecheck status {other:?}");
            UpdateCheckStatus::Error(0)
        }
    }
}

fn parse_retry_after(headers: &http::HeaderMap) -> Option<i64> {
    let value = headers.get(HEADER_RETRY_AFTER)?.to_str().ok()?;
    let seconds: i64 = value.trim().parse().ok()?;
    Some(seconds.clamp(0, MAX_RETRY_AFTER_SEC))
}
