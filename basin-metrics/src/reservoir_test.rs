// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;

#[test]
fn quantiles_without_eviction() {
  let mut reservoir = DecayingReservoir::new(DEFAULT_RESERVOIR_SIZE, DEFAULT_ALPHA);
  for value in [5.0, 10.0, 15.0, 20.0, 25.0] {
    reservoir.insert(value);
  }

  assert_eq!(reservoir.quantile(0.5), 15.0);
  assert_eq!(reservoir.quantile(0.9), 23.75);
}

#[test]
fn quantile_single_sample() {
  let mut reservoir = DecayingReservoir::new(DEFAULT_RESERVOIR_SIZE, DEFAULT_ALPHA);
  reservoir.insert(42.0);
  assert_eq!(reservoir.quantile(0.0), 42.0);
  assert_eq!(reservoir.quantile(0.5), 42.0);
  assert_eq!(reservoir.quantile(1.0), 42.0);
}

#[test]
fn quantile_empty() {
  let reservoir = DecayingReservoir::new(DEFAULT_RESERVOIR_SIZE, DEFAULT_ALPHA);
  assert_eq!(reservoir.quantile(0.5), 0.0);
}

#[test]
fn size_is_bounded() {
  let mut reservoir = DecayingReservoir::new(100, DEFAULT_ALPHA);
  for i in 0 .. 10_000 {
    reservoir.insert(f64::from(i));
  }
  assert_eq!(reservoir.len(), 100);
}

#[test]
fn eviction_biases_recent() {
  // Samples inserted "later" (relative to the landmark) carry exponentially
  // larger priorities, so after heavy over-fill the retained population
  // should skew strongly toward the most recent values.
  let mut reservoir = DecayingReservoir::new(100, DEFAULT_ALPHA);
  let start = Instant::now();
  for i in 0 .. 10_000_u64 {
    // One sample per simulated second.
    reservoir.insert_at(i as f64, start + Duration::from_secs(i / 4));
  }

  let median = reservoir.quantile(0.5);
  assert!(median > 5_000.0, "median {median} does not favor recent samples");
}

#[test]
fn rescale_preserves_quantiles() {
  let mut reservoir = DecayingReservoir::new(DEFAULT_RESERVOIR_SIZE, DEFAULT_ALPHA);
  let start = Instant::now();
  for value in [5.0, 10.0, 15.0, 20.0, 25.0] {
    reservoir.insert_at(value, start);
  }

  // Inserting two hours later forces a landmark rescale.
  reservoir.insert_at(30.0, start + Duration::from_secs(2 * 60 * 60));
  assert_eq!(reservoir.len(), 6);
  assert_eq!(reservoir.quantile(0.5), 17.5);
}

#[test]
fn values_returns_all_retained() {
  let mut reservoir = DecayingReservoir::new(10, DEFAULT_ALPHA);
  for value in [1.0, 2.0, 3.0] {
    reservoir.insert(value);
  }
  let mut values = reservoir.values();
  values.sort_unstable_by(f64::total_cmp);
  assert_eq!(values, vec![1.0, 2.0, 3.0]);
}
