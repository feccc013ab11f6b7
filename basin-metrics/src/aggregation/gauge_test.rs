// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::aggregation::HistogramAggregates;
use crate::protos::metric::{MetricType, TagValue};
use std::sync::Arc;
use std::time::Duration;

fn ctx() -> FlushCtx {
  FlushCtx {
    timestamp: 1_476_119_058,
    interval: Duration::from_secs(10),
    percentiles: Arc::new(vec![]),
    aggregates: HistogramAggregates::ALL,
  }
}

#[test]
fn last_writer_wins() {
  let id = MetricId::new(
    "a.b.c".into(),
    MetricType::Gauge,
    vec![TagValue {
      tag: "a".into(),
      value: "b".into(),
    }],
    false,
  )
  .unwrap();
  let mut gauge = Gauge::new(id);
  gauge.sample(5.0);
  gauge.sample(-1.0);
  gauge.sample(42.5);

  let metric = gauge.flush(&ctx());
  assert_eq!(metric.name, "a.b.c");
  assert_eq!(metric.kind, MetricKind::Gauge);
  assert_eq!(metric.interval, 0);
  assert_eq!(metric.value, 42.5);
  assert_eq!(metric.tags, vec!["a:b".to_string()]);
}

#[test]
fn reemits_across_flushes() {
  let id = MetricId::new("a.b.c".into(), MetricType::Gauge, vec![], false).unwrap();
  let mut gauge = Gauge::new(id);
  gauge.sample(7.0);

  assert_eq!(gauge.flush(&ctx()).value, 7.0);
  assert_eq!(gauge.flush(&ctx()).value, 7.0);
}
