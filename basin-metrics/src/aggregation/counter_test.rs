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

fn make_id(name: &str) -> MetricId {
  MetricId::new(
    name.to_string().into(),
    MetricType::Counter,
    vec![TagValue {
      tag: "a".into(),
      value: "b".into(),
    }],
    false,
  )
  .unwrap()
}

fn ctx(interval_secs: u64) -> FlushCtx {
  FlushCtx {
    timestamp: 1_476_119_058,
    interval: Duration::from_secs(interval_secs),
    percentiles: Arc::new(vec![]),
    aggregates: HistogramAggregates::ALL,
  }
}

#[test]
fn rate_over_interval() {
  let mut counter = Counter::new(make_id("a.b.c"));
  counter.sample(5.0, 1.0);

  let metric = counter.flush(&ctx(10));
  assert_eq!(metric.name, "a.b.c");
  assert_eq!(metric.kind, MetricKind::Rate);
  assert_eq!(metric.interval, 10);
  assert_eq!(metric.value, 0.5);
  assert_eq!(metric.tags, vec!["a:b".to_string()]);
}

#[test]
fn single_increment() {
  let mut counter = Counter::new(make_id("a.b.c"));
  counter.sample(1.0, 1.0);

  let metric = counter.flush(&ctx(10));
  assert_eq!(metric.value, 0.1);
}

#[test]
fn sample_rate_compensation() {
  let mut counter = Counter::new(make_id("a.b.c"));
  counter.sample(5.0, 0.5);

  let metric = counter.flush(&ctx(10));
  assert_eq!(metric.value, 1.0);
}

#[test]
fn accumulates_weighted_increments() {
  let mut counter = Counter::new(make_id("a.b.c"));
  counter.sample(1.0, 1.0);
  counter.sample(2.0, 0.25);
  counter.sample(3.0, 1.0);

  // (1 + 8 + 3) / 10
  let metric = counter.flush(&ctx(10));
  assert_eq!(metric.value, 1.2);
}
