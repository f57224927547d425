// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

use argh::FromArgs;
use mock_update_server::{MockUpdateServer, MockUpdateServerBuilder, ResponseAndMetadata};
use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(FromArgs)]
/// Arguments for mock-update-server.
struct Args {
    /// A hashmap from appid to response metadata struct.
    /// Example JSON argument (the minimal set of required fields per appid):
    ///     {
    ///         "appid_01": {
    ///             "response": "NoUpdate",
    ///             "version": "1.0",
    ///             "package_name": "appid_01.crx"
    ///         },
    ///         ...
    ///     }
    #[argh(
        option,
        description = "responses and metadata keyed by appid",
        from_str_fn(parse_responses_by_appid),
        default = "parse_responses_by_appid(EXAMPLE_RESPONSES_BY_APPID).unwrap()"
    )]
    responses_by_appid: HashMap<String, ResponseAndMetadata>,

    #[argh(option, description = "which port to serve on", default = "0")]
    port: u16,

    #[argh(
        option,
        description = "which IP address to listen on. One of '::', '::1', or anything Ipv6Addr::from_str() can interpret.",
        default = "Ipv6Addr::LOCALHOST"
    )]
    listen_on: Ipv6Addr,

    #[argh(option, description = "backoff seconds to attach to every protocol response")]
    retry_after: Option<i64>,
}

fn parse_responses_by_appid(value: &str) -> Result<HashMap<String, ResponseAndMetadata>, String> {
    serde_json::from_str(value).map_err(|e| format!("Parsing failed: {e:?}"))
}

const EXAMPLE_RESPONSES_BY_APPID: &str = r#"
{
  "appid_01": {
    "response": "NoUpdate",
    "version": "1.0",
    "package_name": "appid_01.crx"
  }
}
"#;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args: Args = argh::from_env();

    let (local_addr, task) = MockUpdateServer::start(
        Arc::new(Mutex::new(
            MockUpdateServerBuilder::default()
                .responses_by_appid(args.responses_by_appid)
                .retry_after_sec(args.retry_after)
                .build()
                .expect("mock update server build"),
        )),
        Some(SocketAddr::new(args.listen_on.into(), args.port)),
    )
    .await?;

    println!("listening on {local_addr}");
    Ok(task.await?)
}
