// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! A client-side engine for keeping CRX-packaged components up to date.
//!
//! The embedder registers components through a data callback, and the engine
//! runs each of them through an update check, package download, signature
//! verification and install, reporting progress through observers and a
//! state-change callback and closing every attempt out with an event ping.
//! The library is executor-agnostic and single-threaded; every seam is a
//! trait so embedders and tests can swap transports, installers and storage.

#![recursion_limit = "256"]

pub mod clock;
pub mod common;
mod component;
pub mod download;
pub mod error;
pub mod http_request;
pub mod installer;
pub mod metrics;
pub mod observer;
pub mod patcher;
pub mod ping;
pub mod protocol;
pub mod request_builder;
pub mod storage;
pub mod unpacker;
pub mod update_check;
pub mod update_client;
pub mod version;

pub use common::{ComponentState, CrxComponent, CrxFormat, CrxUpdateItem};
pub use error::{Error, ErrorCategory, ServiceErrorCode};
pub use observer::{Events, Observer};
pub use update_client::{
    CrxDataCallback, CrxStateChangeCallback, UpdateClient, UpdateClientConfig,
};
pub use version::Version;
