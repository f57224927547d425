// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! A scriptable server end of the component update protocol.
//!
//! The server answers batched update checks with a configured verdict per
//! appid, serves package payloads under `/pkg/`, and accepts new response
//! scripts at runtime through `POST /set_responses_by_appid`. Package URLs in
//! update responses are derived from the request's `Host` header, so clients
//! reach back to whatever address they contacted.

use anyhow::Error;
use derive_builder::Builder;
use hyper::server::Server;
use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const RETRY_AFTER_HEADER: &str = "X-Retry-After";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum ServedUpdate {
    NoUpdate,
    /// Offers the full package only.
    Update,
    /// Offers both the differential and the full package.
    DiffUpdate,
    /// An `error-internal` updatecheck verdict.
    Error,
    /// A body the client cannot make sense of.
    InvalidResponse,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResponseAndMetadata {
    pub response: ServedUpdate,
    pub version: String,
    pub package_name: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Defaults to `diff_<package_name>` when a diff update is served.
    #[serde(default)]
    pub diff_package_name: Option<String>,
}

impl Default for ResponseAndMetadata {
    fn default() -> ResponseAndMetadata {
        ResponseAndMetadata {
            response: ServedUpdate::NoUpdate,
            version: "1.0".to_string(),
            package_name: "update.crx".to_string(),
            fingerprint: Some("fp2".to_string()),
            diff_package_name: None,
        }
    }
}

pub type ResponseMap = HashMap<String, ResponseAndMetadata>;

/// What every incoming update check is asserted to declare.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum UpdateCheckAssertion {
    #[default]
    UpdatesEnabled,
    UpdatesDisabled,
}

#[derive(Clone, Debug, Builder)]
#[builder(pattern = "owned")]
#[builder(derive(Debug))]
pub struct MockUpdateServer {
    #[builder(default, setter(into))]
    pub responses_by_appid: ResponseMap,
    /// Payloads served under `/pkg/<name>`. Package hashes in update
    /// responses are computed from these bytes.
    #[builder(default, setter(into))]
    pub packages_by_name: HashMap<String, Vec<u8>>,
    /// When set, every protocol response carries this backoff header.
    #[builder(default = "None")]
    pub retry_after_sec: Option<i64>,
    #[builder(default)]
    pub update_check_assertion: UpdateCheckAssertion,
}

impl MockUpdateServer {
    /// Start the server detached, returning its address.
    pub async fn start_and_detach(
        server: Arc<Mutex<MockUpdateServer>>,
        addr: Option<SocketAddr>,
    ) -> Result<String, Error> {
        let (addr, _task) = MockUpdateServer::start(server, addr).await?;
        Ok(addr)
    }

    /// Spawn the server on the current executor, returning its address and
    /// its JoinHandle.
    pub async fn start(
        server: Arc<Mutex<MockUpdateServer>>,
        addr: Option<SocketAddr>,
    ) -> Result<(String, JoinHandle<()>), Error> {
        let addr = addr.unwrap_or_else(|| SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0));

        let make_svc = make_service_fn(move |_socket| {
            let server = Arc::clone(&server);
            async {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { handle_request(req, &server).await }
                }))
            }
        });

        let hyper_server = Server::try_bind(&addr)?.serve(make_svc);
        let local_addr = hyper_server.local_addr();
        let task = tokio::spawn(async move {
            if let Err(e) = hyper_server.await {
                tracing::error!("mock update server exited: {e}");
            }
        });
        Ok((format!("http://{local_addr}/"), task))
    }
}

pub async fn handle_request(
    req: Request<Body>,
    server: &Mutex<MockUpdateServer>,
) -> Result<Response<Body>, Error> {
    tracing::debug!("{:#?}", req);
    if req.method() == Method::GET && req.uri().path().starts_with("/pkg/") {
        return handle_package_request(req, server).await;
    }
    if req.uri().path() == "/set_responses_by_appid" {
        return handle_set_responses(req, server).await;
    }
    handle_update_request(req, server).await
}

async fn handle_package_request(
    req: Request<Body>,
    server: &Mutex<MockUpdateServer>,
) -> Result<Response<Body>, Error> {
    let name = req.uri().path().trim_start_matches("/pkg/").to_string();
    let server = server.lock().await;
    let (status, body) = match server.packages_by_name.get(&name) {
        Some(payload) => (StatusCode::OK, payload.clone()),
        None => {
            tracing::warn!("no package named {name:?}");
            (StatusCode::NOT_FOUND, Vec::new())
        }
    };
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap())
}

pub async fn handle_set_responses(
    req: Request<Body>,
    server: &Mutex<MockUpdateServer>,
) -> Result<Response<Body>, Error> {
    assert_eq!(req.method(), Method::POST);

    let req_body = hyper::body::to_bytes(req).await?;
    let req_json: ResponseMap = serde_json::from_slice(&req_body).expect("parse json");
    server.lock().await.responses_by_appid = req_json;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap())
}

pub async fn handle_update_request(
    req: Request<Body>,
    server: &Mutex<MockUpdateServer>,
) -> Result<Response<Body>, Error> {
    let server = server.lock().await.clone();
    assert_eq!(req.method(), Method::POST);

    if server.responses_by_appid.is_empty() {
        tracing::error!(
            "received a request before responses_by_appid was set; returning status 500"
        );
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header(header::CONTENT_LENGTH, 0)
            .body(Body::empty())
            .unwrap());
    }

    // Package URLs point back at the address this request arrived on.
    let codebase = {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{host}/pkg/")
    };

    let req_body = hyper::body::to_bytes(req).await?;
    let req_json: serde_json::Value = serde_json::from_slice(&req_body).expect("parse json");
    let request = req_json.get("request").unwrap();
    let apps = request.get("app").unwrap().as_array().unwrap();

    let apps: Vec<serde_json::Value> = apps
        .iter()
        .map(|app| {
            let appid = app.get("appid").unwrap();
            let Some(updatecheck) = app.get("updatecheck") else {
                // Event pings are acknowledged without a verdict.
                assert!(app.get("event").is_some());
                return json!({"appid": appid, "status": "ok"});
            };
            let updatedisabled =
                updatecheck.get("updatedisabled").and_then(|v| v.as_bool()).unwrap_or(false);
            match server.update_check_assertion {
                UpdateCheckAssertion::UpdatesEnabled => {
                    assert!(!updatedisabled, "expected an updates-enabled check for {appid}");
                }
                UpdateCheckAssertion::UpdatesDisabled => {
                    assert!(updatedisabled, "expected an updates-disabled check for {appid}");
                }
            }
            let Some(expected) = server.responses_by_appid.get(appid.as_str().unwrap()) else {
                return json!({"appid": appid, "status": "error-unknownApplication"});
            };
            let updatecheck = make_updatecheck(expected, &server.packages_by_name, &codebase);
            json!({"appid": appid, "status": "ok", "updatecheck": updatecheck})
        })
        .collect();

    let response = json!({
        "response": {
            "protocol": "3.1",
            "app": apps
        }
    });
    let response_data = serde_json::to_vec(&response).unwrap();

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, response_data.len());
    if let Some(seconds) = server.retry_after_sec {
        builder = builder.header(RETRY_AFTER_HEADER, seconds);
    }
    Ok(builder.body(Body::from(response_data)).unwrap())
}

fn make_updatecheck(
    expected: &ResponseAndMetadata,
    packages: &HashMap<String, Vec<u8>>,
    codebase: &str,
) -> serde_json::Value {
    let hash_of = |name: &str| packages.get(name).map(|bytes| hex::encode(Sha256::digest(bytes)));

    match expected.response {
        ServedUpdate::NoUpdate => json!({"status": "noupdate"}),
        ServedUpdate::Error => json!({"status": "error-internal"}),
        ServedUpdate::InvalidResponse => json!({"invalid_status": "invalid"}),
        ServedUpdate::Update => json!({
            "status": "ok",
            "urls": {"url": [{"codebase": codebase}]},
            "manifest": {
                "version": expected.version,
                "packages": {"package": [{
                    "name": expected.package_name,
                    "hash_sha256": hash_of(&expected.package_name),
                    "fp": expected.fingerprint,
                }]}
            }
        }),
        ServedUpdate::DiffUpdate => {
            let diff_name = expected
                .diff_package_name
                .clone()
                .unwrap_or_else(|| format!("diff_{}", expected.package_name));
            json!({
                "status": "ok",
                "urls": {"url": [{"codebase": codebase}]},
                "manifest": {
                    "version": expected.version,
                    "packages": {"package": [{
                        "name": expected.package_name,
                        "hash_sha256": hash_of(&expected.package_name),
                        "namediff": diff_name,
                        "hashdiff_sha256": hash_of(&diff_name),
                        "fp": expected.fingerprint,
                    }]}
                }
            })
        }
    }
}
