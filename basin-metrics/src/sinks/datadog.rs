// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./datadog_test.rs"]
mod datadog_test;

use super::{Sink, SinkError};
use crate::protos::metric::FlushMetric;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

//
// SeriesEntry
//

// One entry of the upstream series body. Points carry exactly one
// (timestamp, value) pair per flush.
#[derive(Serialize)]
struct SeriesEntry<'a> {
  metric: &'a str,
  points: [(u64, f64); 1],
  tags: &'a [String],
  host: &'a str,
  #[serde(skip_serializing_if = "str::is_empty")]
  device_name: &'a str,
  #[serde(rename = "type")]
  metric_type: &'static str,
  interval: u32,
}

#[derive(Serialize)]
struct SeriesBody<'a> {
  series: Vec<SeriesEntry<'a>>,
}

fn make_body(batch: &[FlushMetric]) -> SeriesBody<'_> {
  SeriesBody {
    series: batch
      .iter()
      .map(|metric| SeriesEntry {
        metric: &metric.name,
        points: [(metric.timestamp, metric.value)],
        tags: &metric.tags,
        host: &metric.hostname,
        device_name: &metric.device_name,
        metric_type: metric.kind.as_str(),
        interval: metric.interval,
      })
      .collect(),
  }
}

//
// DatadogSink
//

// POSTs each flush batch as a single JSON series body to the upstream
// backend. The client is shared and keeps its connection pool across ticks.
pub struct DatadogSink {
  client: reqwest::Client,
  url: String,
}

impl DatadogSink {
  pub fn new(api_hostname: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
    Ok(Self {
      client: reqwest::Client::builder().timeout(timeout).build()?,
      url: format!("{api_hostname}/api/v1/series?api_key={api_key}"),
    })
  }
}

#[async_trait]
impl Sink for DatadogSink {
  fn name(&self) -> &'static str {
    "datadog"
  }

  async fn flush(
    &self,
    batch: &[FlushMetric],
    _flushed_at: OffsetDateTime,
  ) -> Result<(), SinkError> {
    let response = self
      .client
      .post(&self.url)
      .json(&make_body(batch))
      .send()
      .await?;

    let status = response.status();
    if status.is_success() {
      log::debug!("posted {} metric(s) upstream", batch.len());
      return Ok(());
    }

    let body = response
      .text()
      .await
      .unwrap_or_else(|_| "unreadable body".to_string());
    Err(SinkError::Response {
      status: status.as_u16(),
      body,
    })
  }
}
