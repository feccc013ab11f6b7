// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./set_test.rs"]
mod set_test;

use super::{make_output, FlushCtx};
use crate::hll::{HllError, HyperLogLog};
use crate::protos::metric::{FlushMetric, MetricId, MetricKind};

//
// Set
//

// Approximate distinct count backed by a HyperLogLog sketch. The sketch is
// retained across flushes; every interval re-emits the current estimate.
// Export and combine move the raw sketch bytes so that sets aggregated on
// different nodes union losslessly.
pub struct Set {
  id: MetricId,
  hll: HyperLogLog,
}

impl Set {
  #[must_use]
  pub fn new(id: MetricId) -> Self {
    Self {
      id,
      hll: HyperLogLog::new(),
    }
  }

  pub fn sample(&mut self, member: &[u8]) {
    self.hll.insert(member);
  }

  #[must_use]
  #[allow(clippy::cast_precision_loss)]
  pub fn flush(&self, ctx: &FlushCtx) -> FlushMetric {
    make_output(
      &self.id,
      "",
      self.hll.count() as f64,
      MetricKind::Gauge,
      0,
      ctx.timestamp,
    )
  }

  #[must_use]
  pub fn export(&self) -> Vec<u8> {
    self.hll.export()
  }

  pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), HllError> {
    self.hll.combine(snapshot)
  }

  #[must_use]
  pub fn count(&self) -> u64 {
    self.hll.count()
  }
}
