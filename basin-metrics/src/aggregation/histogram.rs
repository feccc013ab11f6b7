// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./histogram_test.rs"]
mod histogram_test;

use super::{make_output, FlushCtx, HistogramAggregates};
use crate::protos::metric::{FlushMetric, MetricId, MetricKind};
use crate::reservoir::{DecayingReservoir, DEFAULT_ALPHA, DEFAULT_RESERVOIR_SIZE};
use serde::{Deserialize, Serialize};

//
// ReservoirSnapshot
//

// Exported reservoir state. Only the retained values travel; on combine they
// are re-inserted through the receiving reservoir with fresh priorities,
// which keeps the structure bounded no matter how many peers merge in.
#[derive(Serialize, Deserialize)]
struct ReservoirSnapshot {
  version: u32,
  values: Vec<f64>,
}

const SNAPSHOT_VERSION: u32 = 1;

//
// SnapshotError
//

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
  #[error("malformed reservoir snapshot: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("unsupported reservoir snapshot version {0}")]
  BadVersion(u32),
}

//
// Histogram
//

// A histogram/timer: a forward-decaying reservoir for quantiles plus exact
// per-interval stats (weight, min, max, sum). The reservoir survives flushes
// so quantiles stay fleet-meaningful; the interval stats reset every flush
// and gate emission, so an interval with no samples emits nothing.
pub struct Histogram {
  id: MetricId,
  reservoir: DecayingReservoir,
  local_weight: f64,
  local_min: f64,
  local_max: f64,
  local_sum: f64,
}

impl Histogram {
  #[must_use]
  pub fn new(id: MetricId) -> Self {
    Self {
      id,
      reservoir: DecayingReservoir::new(DEFAULT_RESERVOIR_SIZE, DEFAULT_ALPHA),
      local_weight: 0.0,
      local_min: f64::INFINITY,
      local_max: f64::NEG_INFINITY,
      local_sum: 0.0,
    }
  }

  pub fn sample(&mut self, value: f64, sample_rate: f64) {
    let weight = 1.0 / sample_rate;
    self.reservoir.insert(value);
    self.local_weight += weight;
    self.local_min = self.local_min.min(value);
    self.local_max = self.local_max.max(value);
    self.local_sum += value * weight;
  }

  // Emit the configured aggregates in documented order (max, min, sum, avg,
  // count, median, then percentiles) and reset the interval stats. The count
  // output is the only rate; everything else is a gauge.
  #[must_use]
  #[allow(clippy::cast_possible_truncation)]
  pub fn flush(&mut self, ctx: &FlushCtx) -> Vec<FlushMetric> {
    if self.local_weight == 0.0 {
      return vec![];
    }

    let mut metrics = Vec::new();
    if ctx.aggregates.contains(HistogramAggregates::MAX) {
      metrics.push(make_output(
        &self.id,
        ".max",
        self.local_max,
        MetricKind::Gauge,
        0,
        ctx.timestamp,
      ));
    }
    if ctx.aggregates.contains(HistogramAggregates::MIN) {
      metrics.push(make_output(
        &self.id,
        ".min",
        self.local_min,
        MetricKind::Gauge,
        0,
        ctx.timestamp,
      ));
    }
    if ctx.aggregates.contains(HistogramAggregates::SUM) {
      metrics.push(make_output(
        &self.id,
        ".sum",
        self.local_sum,
        MetricKind::Gauge,
        0,
        ctx.timestamp,
      ));
    }
    if ctx.aggregates.contains(HistogramAggregates::AVG) {
      metrics.push(make_output(
        &self.id,
        ".avg",
        self.local_sum / self.local_weight,
        MetricKind::Gauge,
        0,
        ctx.timestamp,
      ));
    }
    if ctx.aggregates.contains(HistogramAggregates::COUNT) {
      metrics.push(make_output(
        &self.id,
        ".count",
        self.local_weight / ctx.interval_secs(),
        MetricKind::Rate,
        ctx.interval_whole_secs(),
        ctx.timestamp,
      ));
    }
    if ctx.aggregates.contains(HistogramAggregates::MEDIAN) {
      metrics.push(make_output(
        &self.id,
        ".median",
        self.reservoir.quantile(0.5),
        MetricKind::Gauge,
        0,
        ctx.timestamp,
      ));
    }
    for percentile in ctx.percentiles.iter() {
      metrics.push(make_output(
        &self.id,
        &format!(".{}percentile", (percentile * 100.0) as u32),
        self.reservoir.quantile(*percentile),
        MetricKind::Gauge,
        0,
        ctx.timestamp,
      ));
    }

    self.local_weight = 0.0;
    self.local_min = f64::INFINITY;
    self.local_max = f64::NEG_INFINITY;
    self.local_sum = 0.0;
    metrics
  }

  pub fn export(&self) -> Result<Vec<u8>, SnapshotError> {
    Ok(serde_json::to_vec(&ReservoirSnapshot {
      version: SNAPSHOT_VERSION,
      values: self.reservoir.values(),
    })?)
  }

  // Merge an exported snapshot. Only the reservoir is touched: the interval
  // stats stay unset until the next local sample arrives.
  pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), SnapshotError> {
    let snapshot: ReservoirSnapshot = serde_json::from_slice(snapshot)?;
    if snapshot.version != SNAPSHOT_VERSION {
      return Err(SnapshotError::BadVersion(snapshot.version));
    }
    for value in snapshot.values {
      self.reservoir.insert(value);
    }
    Ok(())
  }

  #[must_use]
  pub fn quantile(&self, q: f64) -> f64 {
    self.reservoir.quantile(q)
  }

  #[must_use]
  pub const fn local_weight(&self) -> f64 {
    self.local_weight
  }

  #[must_use]
  pub const fn local_min(&self) -> f64 {
    self.local_min
  }

  #[must_use]
  pub const fn local_max(&self) -> f64 {
    self.local_max
  }
}
