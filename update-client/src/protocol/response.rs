// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Deserialized server responses, one verdict per `app` entry.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct ResponseWrapper {
    pub response: Response,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Response {
    pub protocol: String,
    #[serde(rename = "app", default)]
    pub apps: Vec<App>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct App {
    pub appid: String,
    #[serde(default = "default_ok")]
    pub status: String,
    #[serde(default)]
    pub updatecheck: Option<UpdateCheck>,
}

fn default_ok() -> String {
    "ok".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpdateCheck {
    pub status: String,
    #[serde(default)]
    pub urls: Option<Urls>,
    #[serde(default)]
    pub manifest: Option<Manifest>,
    #[serde(default)]
    pub actions: Option<Actions>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl UpdateCheck {
    /// Keys prefixed with `_` carry server-defined custom attributes.
    pub fn custom_attributes(&self) -> BTreeMap<String, String> {
        self.extra
            .iter()
            .filter(|(key, _)| key.starts_with('_'))
            .filter_map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some((key.clone(), text))
            })
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Urls {
    #[serde(rename = "url", default)]
    pub urls: Vec<UrlEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UrlEntry {
    pub codebase: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Manifest {
    pub version: String,
    /// Executable the installer should run after unpacking, if any.
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub packages: Option<Packages>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Packages {
    #[serde(rename = "package", default)]
    pub packages: Vec<Package>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub hash_sha256: Option<String>,
    #[serde(default)]
    pub namediff: Option<String>,
    #[serde(default)]
    pub hashdiff_sha256: Option<String>,
    #[serde(default)]
    pub fp: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Actions {
    #[serde(rename = "action", default)]
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("response is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anti-XSSI prefix some servers prepend to JSON bodies.
const SECURITY_PREFIX: &str = ")]}'";

pub fn parse(body: &[u8]) -> Result<Response, ParseError> {
    let text = std::str::from_utf8(body)?;
    let text = text.strip_prefix(SECURITY_PREFIX).unwrap_or(text).trim_start();
    let wrapper: ResponseWrapper = serde_json::from_str(text)?;
    Ok(wrapper.response)
}
