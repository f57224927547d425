// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Assembles protocol request bodies into ready-to-send HTTP requests.

use crate::protocol::request::{App, Request, RequestWrapper};
use crate::protocol::PROTOCOL_VERSION;
use thiserror::Error;

/// Header telling the server whether a user is waiting on this request.
pub const HEADER_INTERACTIVITY: &str = "X-Goog-Update-Interactivity";

/// Per-call parameters shared by every app entry of one request.
#[derive(Clone, Debug)]
pub struct RequestParams {
    pub session_id: String,
    pub is_foreground: bool,
}

pub struct RequestBuilder {
    params: RequestParams,
    apps: Vec<App>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not serialize request body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not construct http request: {0}")]
    Http(#[from] http::Error),
}

impl RequestBuilder {
    pub fn new(params: RequestParams) -> Self {
        RequestBuilder { params, apps: Vec::new() }
    }

    pub fn add_app(mut self, app: App) -> Self {
        self.apps.push(app);
        self
    }

    /// Serializes the accumulated apps into a POST against `url`.
    pub fn build(self, url: &str) -> Result<http::Request<hyper::Body>, Error> {
        let wrapper = RequestWrapper {
            request: Request {
                protocol: PROTOCOL_VERSION.to_string(),
                sessionid: self.params.session_id,
                apps: self.apps,
            },
        };
        let body = serde_json::to_vec(&wrapper)?;
        let interactivity = if self.params.is_foreground { "fg" } else { "bg" };
        let request = http::Request::post(url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(HEADER_INTERACTIVITY, interactivity)
            .body(hyper::Body::from(body))?;
        Ok(request)
    }
}
