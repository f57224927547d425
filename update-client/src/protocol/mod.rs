// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The JSON wire protocol between the client and the update server: one
//! `app` entry per component id in each direction.

pub mod request;
pub mod response;

pub const PROTOCOL_VERSION: &str = "3.1";
