// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Ambient telemetry hooks, distinct from protocol pings.

use crate::download::DownloadMetrics;
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub enum Metrics {
    /// Round-trip time of one update check.
    UpdateCheckResponseTime {
        response_time: Duration,
        successful: bool,
    },
    /// Outcome of one download attempt.
    Download(DownloadMetrics),
}

pub trait MetricsReporter {
    fn report_metrics(&mut self, metrics: Metrics);
}

/// A stub implementation of MetricsReporter which only logs metrics.
#[derive(Debug)]
pub struct StubMetricsReporter;

impl MetricsReporter for StubMetricsReporter {
    fn report_metrics(&mut self, metrics: Metrics) {
        info!("Received request to report metrics: {:?}", metrics);
    }
}
