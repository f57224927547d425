// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Package downloads: ranked URL fallback, hash verification, metrics.

use crate::http_request::HttpRequest;
use futures::future::LocalBoxFuture;
use futures::lock::Mutex;
use futures::FutureExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Downloader error codes, reported in pings.
pub const ERROR_NO_URL: i32 = 10;
pub const ERROR_NO_HASH: i32 = 11;
pub const ERROR_BAD_HASH: i32 = 12;
/// Local file-system failure while persisting the payload.
pub const ERROR_IO: i32 = 13;
pub const ERROR_TRANSPORT: i32 = -2;

/// Outcome of one download attempt, successful or not.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadMetrics {
    pub url: String,
    /// 0 on success, otherwise one of the codes above or an HTTP status.
    pub error: i32,
    pub downloaded_bytes: i64,
    pub total_bytes: i64,
    pub download_time_ms: u64,
}

#[derive(Debug)]
pub struct DownloadedFile {
    /// The verified payload on disk. The caller owns the file and removes it
    /// once the component reaches a terminal state.
    pub path: PathBuf,
    /// Metrics of the attempt that succeeded.
    pub metrics: DownloadMetrics,
}

#[derive(Clone, Debug, Error)]
#[error("download failed with code {code}")]
pub struct DownloadError {
    /// Code of the last attempted URL.
    pub code: i32,
}

/// Progress observer: `(downloaded_bytes, total_bytes)`, -1 when unknown.
pub type ProgressFn = Rc<dyn Fn(i64, i64)>;

pub trait CrxDownloader {
    /// Tries `urls` in rank order until one yields a payload whose SHA-256
    /// matches `expected_sha256`. `progress` may fire zero or more times;
    /// the returned future resolves exactly once.
    fn download(
        &self,
        urls: Vec<Url>,
        expected_sha256: String,
        progress: ProgressFn,
    ) -> LocalBoxFuture<'_, Result<DownloadedFile, DownloadError>>;
}

/// Downloader fetching over the [`HttpRequest`] transport.
pub struct HttpCrxDownloader {
    // Async Mutex so overlapping runs can share one downloader; the transport
    // stays locked for the duration of each fetch.
    http: Mutex<Box<dyn HttpRequest>>,
}

impl HttpCrxDownloader {
    pub fn new(http: Box<dyn HttpRequest>) -> Self {
        HttpCrxDownloader { http: Mutex::new(http) }
    }

    async fn try_one(
        &self,
        url: &Url,
        expected_sha256: &str,
        progress: &ProgressFn,
    ) -> Result<DownloadedFile, DownloadMetrics> {
        let mut metrics = DownloadMetrics {
            url: url.to_string(),
            error: 0,
            downloaded_bytes: -1,
            total_bytes: -1,
            download_time_ms: 0,
        };
        let started = Instant::now();

        let fail = |mut metrics: DownloadMetrics, error: i32, started: Instant| {
            metrics.error = error;
            metrics.download_time_ms = started.elapsed().as_millis() as u64;
            metrics
        };

        let request = match http::Request::get(url.as_str()).body(hyper::Body::empty()) {
            Ok(request) => request,
            Err(e) => {
                warn!("could not build download request for {url}: {e}");
                return Err(fail(metrics, ERROR_NO_URL, started));
            }
        };
        let result = self.http.lock().await.request(request).await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!("download transport failed for {url}: {e}");
                return Err(fail(metrics, ERROR_TRANSPORT, started));
            }
        };
        if !response.status().is_success() {
            return Err(fail(metrics, i32::from(response.status().as_u16()), started));
        }

        let body = response.into_body();
        let size = body.len() as i64;
        metrics.downloaded_bytes = size;
        metrics.total_bytes = size;
        progress(size, size);

        let actual = hex::encode(Sha256::digest(&body));
        if !actual.eq_ignore_ascii_case(expected_sha256) {
            warn!("hash mismatch for {url}: expected {expected_sha256}, got {actual}");
            return Err(fail(metrics, ERROR_BAD_HASH, started));
        }

        let path = match persist(&body) {
            Ok(path) => path,
            Err(e) => {
                warn!("could not persist download from {url}: {e}");
                return Err(fail(metrics, ERROR_IO, started));
            }
        };

        metrics.download_time_ms = started.elapsed().as_millis() as u64;
        info!("downloaded {size} bytes from {url}");
        Ok(DownloadedFile { path, metrics })
    }
}

fn persist(body: &[u8]) -> std::io::Result<PathBuf> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(body)?;
    let (_file, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

impl CrxDownloader for HttpCrxDownloader {
    fn download(
        &self,
        urls: Vec<Url>,
        expected_sha256: String,
        progress: ProgressFn,
    ) -> LocalBoxFuture<'_, Result<DownloadedFile, DownloadError>> {
        async move {
            if urls.is_empty() {
                return Err(DownloadError { code: ERROR_NO_URL });
            }
            if expected_sha256.is_empty() {
                return Err(DownloadError { code: ERROR_NO_HASH });
            }
            let mut last_error = ERROR_NO_URL;
            for url in &urls {
                match self.try_one(url, &expected_sha256, &progress).await {
                    Ok(downloaded) => return Ok(downloaded),
                    Err(metrics) => last_error = metrics.error,
                }
            }
            Err(DownloadError { code: last_error })
        }
        .boxed_local()
    }
}
