// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The transport seam. Checks, downloads and pings all go through
//! [`HttpRequest`], so tests can run the whole engine without a network.

use futures::future::LocalBoxFuture;
use hyper::{Body, Request, Response};
use thiserror::Error;

pub trait HttpRequest {
    /// Issues a single request and resolves with the collected response body.
    fn request(&mut self, req: Request<Body>) -> LocalBoxFuture<'_, Result<Response<Vec<u8>>, Error>>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("http transport error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("malformed request: {0}")]
    Http(#[from] http::Error),
    #[error("request timed out")]
    Timeout,
}

pub mod mock {
    //! A scripted [`HttpRequest`] for tests: canned responses out, captured
    //! requests in.

    use super::{Error, HttpRequest};
    use futures::future::LocalBoxFuture;
    use futures::FutureExt;
    use hyper::{Body, Request, Response};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Requests seen by the mock, as parts plus the collected body.
    pub type CapturedRequests = Rc<RefCell<Vec<(http::request::Parts, Vec<u8>)>>>;

    #[derive(Default)]
    pub struct MockHttpRequest {
        responses: VecDeque<Result<Response<Vec<u8>>, Error>>,
        captured: CapturedRequests,
    }

    impl MockHttpRequest {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_response(&mut self, response: Response<Vec<u8>>) {
            self.responses.push_back(Ok(response));
        }

        pub fn add_error(&mut self, error: Error) {
            self.responses.push_back(Err(error));
        }

        /// A handle to the captured requests that stays valid after the mock
        /// is boxed up and moved into the code under test.
        pub fn capture_handle(&self) -> CapturedRequests {
            Rc::clone(&self.captured)
        }

        /// Builds a 200 response with a JSON body.
        pub fn json_response(value: &serde_json::Value) -> Response<Vec<u8>> {
            Response::builder()
                .status(hyper::StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(value.to_string().into_bytes())
                .unwrap()
        }
    }

    impl HttpRequest for MockHttpRequest {
        fn request(
            &mut self,
            req: Request<Body>,
        ) -> LocalBoxFuture<'_, Result<Response<Vec<u8>>, Error>> {
            async move {
                let (parts, body) = req.into_parts();
                let bytes = hyper::body::to_bytes(body).await?;
                self.captured.borrow_mut().push((parts, bytes.to_vec()));
                // An unscripted request behaves like a dead network.
                self.responses.pop_front().unwrap_or(Err(Error::Timeout))
            }
            .boxed_local()
        }
    }

}
