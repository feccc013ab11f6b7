// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;

#[test]
fn defaults() {
  let config = Config::load_from_str("{}").unwrap();
  assert_eq!(config.api_hostname, "https://app.datadoghq.com");
  assert_eq!(config.key, "");
  assert_eq!(config.udp_address, "127.0.0.1:8126");
  assert_eq!(config.num_listeners, 1);
  assert_eq!(config.buffer_size, 65536);
  assert_eq!(config.interval, Duration::from_secs(10));
  assert_eq!(config.expiry, Duration::from_secs(300));
  assert_eq!(config.percentiles, vec![0.5, 0.75, 0.99]);
  assert_eq!(config.stats_address, "127.0.0.1:8125");
  assert_eq!(config.sample_rate, 0.1);
  assert!(!config.debug);
  assert_eq!(config.histogram_aggregates().unwrap(), HistogramAggregates::ALL);
}

#[test]
fn full_config() {
  let config = Config::load_from_str(
    r"
api_hostname: https://app.datadoghq.com
key: abc123
udp_address: 0.0.0.0:8126
num_workers: 8
num_listeners: 2
buffer_size: 1048576
interval: 10s
expiry: 2m
percentiles: [0.5, 0.9, 0.99]
aggregates: [max, min, count]
hostname: globalstats
tags: [dc:us-east-1, team:observability]
stats_address: 127.0.0.1:8125
sample_rate: 0.5
debug: true
csv_path: /tmp/basin.tsv
",
  )
  .unwrap();
  assert_eq!(config.num_workers, 8);
  assert_eq!(config.expiry, Duration::from_secs(120));
  assert_eq!(config.hostname.as_deref(), Some("globalstats"));
  assert_eq!(config.resolved_hostname(), "globalstats");
  assert_eq!(config.tags.len(), 2);
  assert_eq!(config.csv_path.as_deref(), Some(Path::new("/tmp/basin.tsv")));
  let aggregates = config.histogram_aggregates().unwrap();
  assert!(aggregates.contains(HistogramAggregates::MAX));
  assert!(!aggregates.contains(HistogramAggregates::MEDIAN));
}

#[test]
fn empty_hostname_disables_attribution() {
  let config = Config::load_from_str("hostname: \"\"").unwrap();
  assert_eq!(config.resolved_hostname(), "");
}

#[test]
fn absent_hostname_uses_os_hostname() {
  let config = Config::load_from_str("{}").unwrap();
  // Whatever the machine is called, the fallback must engage.
  assert_eq!(config.resolved_hostname().is_empty(), hostname::get().is_err());
}

#[test]
fn rejects_bad_percentile() {
  assert!(Config::load_from_str("percentiles: [1.5]").is_err());
  assert!(Config::load_from_str("percentiles: [0.0]").is_err());
  assert!(Config::load_from_str("percentiles: [1.0]").is_err());
}

#[test]
fn rejects_zero_workers() {
  assert!(Config::load_from_str("num_workers: 0").is_err());
}

#[test]
fn rejects_zero_interval() {
  assert!(Config::load_from_str("interval: 0s").is_err());
}

#[test]
fn rejects_bad_sample_rate() {
  assert!(Config::load_from_str("sample_rate: 0").is_err());
  assert!(Config::load_from_str("sample_rate: 1.5").is_err());
}

#[test]
fn rejects_unknown_aggregate() {
  assert!(Config::load_from_str("aggregates: [p99]").is_err());
}

#[test]
fn rejects_unknown_keys() {
  assert!(Config::load_from_str("no_such_option: true").is_err());
}

#[test]
fn rejects_partial_kafka_config() {
  assert!(Config::load_from_str("kafka_brokers: localhost:9092").is_err());
  assert!(Config::load_from_str("kafka_topic: metrics").is_err());
  assert!(
    Config::load_from_str("kafka_brokers: localhost:9092\nkafka_topic: metrics").is_ok()
  );
}

#[test]
fn load_from_missing_file_fails() {
  assert!(Config::load_from_file(Path::new("/nonexistent/basin.yaml")).is_err());
}
