// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

pub mod counter;
pub mod gauge;
pub mod histogram;
pub mod set;

use crate::protos::metric::{FlushMetric, MetricId, MetricKind};
use anyhow::bail;
use std::sync::Arc;
use std::time::Duration;

//
// HistogramAggregates
//

// Bitmask of the derived outputs a histogram emits on flush. The emission
// order is fixed (max, min, sum, avg, count, median, then percentiles)
// regardless of the order aggregates were configured in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HistogramAggregates(u8);

impl HistogramAggregates {
  pub const MAX: Self = Self(1);
  pub const MIN: Self = Self(1 << 1);
  pub const SUM: Self = Self(1 << 2);
  pub const AVG: Self = Self(1 << 3);
  pub const COUNT: Self = Self(1 << 4);
  pub const MEDIAN: Self = Self(1 << 5);

  pub const NONE: Self = Self(0);
  pub const ALL: Self = Self(
    Self::MAX.0 | Self::MIN.0 | Self::SUM.0 | Self::AVG.0 | Self::COUNT.0 | Self::MEDIAN.0,
  );

  #[must_use]
  pub const fn contains(self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }

  #[must_use]
  pub const fn with(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  pub fn from_names<S: AsRef<str>>(names: &[S]) -> anyhow::Result<Self> {
    let mut aggregates = Self::NONE;
    for name in names {
      aggregates = match name.as_ref() {
        "max" => aggregates.with(Self::MAX),
        "min" => aggregates.with(Self::MIN),
        "sum" => aggregates.with(Self::SUM),
        "avg" => aggregates.with(Self::AVG),
        "count" => aggregates.with(Self::COUNT),
        "median" => aggregates.with(Self::MEDIAN),
        other => bail!("unknown histogram aggregate: {other}"),
      };
    }
    Ok(aggregates)
  }
}

impl Default for HistogramAggregates {
  fn default() -> Self {
    Self::ALL
  }
}

//
// FlushCtx
//

// Per-tick flush parameters handed to every aggregator: the output timestamp,
// the flush interval (the divisor for rate-typed outputs), and the histogram
// output selection.
#[derive(Clone, Debug)]
pub struct FlushCtx {
  pub timestamp: u64,
  pub interval: Duration,
  pub percentiles: Arc<Vec<f64>>,
  pub aggregates: HistogramAggregates,
}

impl FlushCtx {
  #[must_use]
  pub fn interval_secs(&self) -> f64 {
    self.interval.as_secs_f64()
  }

  // The interval as stamped into rate-typed outputs.
  #[must_use]
  #[allow(clippy::cast_possible_truncation)]
  pub fn interval_whole_secs(&self) -> u32 {
    self.interval.as_secs() as u32
  }
}

// Create one flush-ready output. Hostname and device decoration happen later
// in the flusher, which knows the server-level configuration.
fn make_output(
  id: &MetricId,
  postfix: &str,
  value: f64,
  kind: MetricKind,
  interval: u32,
  timestamp: u64,
) -> FlushMetric {
  let mut name = String::with_capacity(id.name().len() + postfix.len());
  name.push_str(&String::from_utf8_lossy(id.name()));
  name.push_str(postfix);
  FlushMetric {
    name,
    timestamp,
    value,
    tags: id.format_tags(),
    kind,
    hostname: String::new(),
    device_name: String::new(),
    interval,
  }
}
