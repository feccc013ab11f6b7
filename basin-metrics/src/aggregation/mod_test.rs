// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;

#[test]
fn aggregates_from_names() {
  let aggregates = HistogramAggregates::from_names(&["max", "count"]).unwrap();
  assert!(aggregates.contains(HistogramAggregates::MAX));
  assert!(aggregates.contains(HistogramAggregates::COUNT));
  assert!(!aggregates.contains(HistogramAggregates::MIN));
  assert!(!aggregates.contains(HistogramAggregates::MEDIAN));
}

#[test]
fn aggregates_from_names_order_insensitive() {
  let a = HistogramAggregates::from_names(&["min", "max", "sum", "avg", "count", "median"]).unwrap();
  let b = HistogramAggregates::from_names(&["median", "count", "avg", "sum", "max", "min"]).unwrap();
  assert_eq!(a, b);
  assert_eq!(a, HistogramAggregates::ALL);
}

#[test]
fn aggregates_reject_unknown() {
  assert!(HistogramAggregates::from_names(&["p99"]).is_err());
}

#[test]
fn flush_ctx_interval() {
  let ctx = FlushCtx {
    timestamp: 0,
    interval: Duration::from_secs(10),
    percentiles: Arc::new(vec![]),
    aggregates: HistogramAggregates::ALL,
  };
  assert_eq!(ctx.interval_secs(), 10.0);
  assert_eq!(ctx.interval_whole_secs(), 10);
}
