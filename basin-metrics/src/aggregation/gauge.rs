// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./gauge_test.rs"]
mod gauge_test;

use super::{make_output, FlushCtx};
use crate::protos::metric::{FlushMetric, MetricId, MetricKind};

//
// Gauge
//

// Last-writer-wins scalar. The worker retains gauges across flushes, so the
// last observed value is re-emitted every interval until the gauge expires.
pub struct Gauge {
  id: MetricId,
  last: f64,
}

impl Gauge {
  #[must_use]
  pub const fn new(id: MetricId) -> Self {
    Self { id, last: 0.0 }
  }

  pub fn sample(&mut self, value: f64) {
    self.last = value;
  }

  #[must_use]
  pub fn flush(&self, ctx: &FlushCtx) -> FlushMetric {
    // Interval carries no meaning for a point-in-time value.
    make_output(&self.id, "", self.last, MetricKind::Gauge, 0, ctx.timestamp)
  }
}
