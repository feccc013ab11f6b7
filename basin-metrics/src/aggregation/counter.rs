// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./counter_test.rs"]
mod counter_test;

use super::{make_output, FlushCtx};
use crate::protos::metric::{FlushMetric, MetricId, MetricKind};

//
// Counter
//

// A monotonic accumulator of weighted increments. Each sample adds
// value / sample_rate; the flush output is the per-second rate over the
// flush interval. Counters are drained by the worker on every flush, so a
// fresh interval starts from zero.
pub struct Counter {
  id: MetricId,
  sum: f64,
}

impl Counter {
  #[must_use]
  pub const fn new(id: MetricId) -> Self {
    Self { id, sum: 0.0 }
  }

  pub fn sample(&mut self, value: f64, sample_rate: f64) {
    self.sum += value / sample_rate;
  }

  #[must_use]
  pub fn flush(&self, ctx: &FlushCtx) -> FlushMetric {
    make_output(
      &self.id,
      "",
      self.sum / ctx.interval_secs(),
      MetricKind::Rate,
      ctx.interval_whole_secs(),
      ctx.timestamp,
    )
  }
}
