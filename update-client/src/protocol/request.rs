// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Serializable request bodies: update checks and event pings.

use serde::Serialize;
use serde_repr::Serialize_repr;

/// Numeric event types understood by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr)]
#[repr(i32)]
pub enum EventType {
    /// Terminal report for one update attempt, success or error.
    UpdateComplete = 3,
    Uninstall = 4,
    /// One report per download attempt.
    Download = 14,
    ActionRun = 42,
}

#[derive(Debug, Serialize)]
pub struct RequestWrapper {
    pub request: Request,
}

#[derive(Debug, Serialize)]
pub struct Request {
    pub protocol: String,
    pub sessionid: String,
    #[serde(rename = "app")]
    pub apps: Vec<App>,
}

#[derive(Debug, Default, Serialize)]
pub struct App {
    pub appid: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installsource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updatecheck: Option<UpdateCheck>,
    #[serde(rename = "event", skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

#[derive(Debug, Default, Serialize)]
pub struct UpdateCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updatedisabled: Option<bool>,
}

/// One ping event. Every optional field is omitted unless it carries data,
/// keeping ping bodies minimal.
#[derive(Debug, Serialize)]
pub struct Event {
    pub eventtype: EventType,
    /// 1 on success, 0 on failure.
    pub eventresult: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errorcat: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errorcode: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracode1: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffresult: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differrorcat: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differrorcode: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previousversion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nextversion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previousfp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nextfp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<i32>,
}

impl Default for Event {
    fn default() -> Self {
        Event {
            eventtype: EventType::UpdateComplete,
            eventresult: 0,
            errorcat: None,
            errorcode: None,
            extracode1: None,
            diffresult: None,
            differrorcat: None,
            differrorcode: None,
            previousversion: None,
            nextversion: None,
            previousfp: None,
            nextfp: None,
            downloaded: None,
            total: None,
            download_time_ms: None,
            url: None,
            reason: None,
        }
    }
}
