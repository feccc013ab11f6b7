// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use anyhow::{bail, Context};
use basin_metrics::aggregation::HistogramAggregates;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_api_hostname() -> String {
  "https://app.datadoghq.com".to_string()
}

fn default_udp_address() -> String {
  "127.0.0.1:8126".to_string()
}

fn default_num_workers() -> usize {
  std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

const fn default_num_listeners() -> usize {
  1
}

const fn default_buffer_size() -> usize {
  65536
}

const fn default_interval() -> Duration {
  Duration::from_secs(10)
}

const fn default_expiry() -> Duration {
  Duration::from_secs(5 * 60)
}

const fn default_flush_worker_timeout() -> Duration {
  Duration::from_secs(5)
}

const fn default_shutdown_grace() -> Duration {
  Duration::from_secs(10)
}

fn default_percentiles() -> Vec<f64> {
  vec![0.5, 0.75, 0.99]
}

fn default_aggregates() -> Vec<String> {
  ["max", "min", "sum", "avg", "count", "median"]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_stats_address() -> String {
  "127.0.0.1:8125".to_string()
}

const fn default_sample_rate() -> f64 {
  0.1
}

//
// Config
//

// Server configuration, loaded from a single YAML file. Every key has a
// sensible default; an empty file is a valid (if not very useful) config.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  // Upstream backend.
  #[serde(default = "default_api_hostname")]
  pub api_hostname: String,
  // Upstream API key. Empty disables the upstream sink entirely.
  #[serde(default)]
  pub key: String,

  // Ingest.
  #[serde(default = "default_udp_address")]
  pub udp_address: String,
  #[serde(default = "default_num_workers")]
  pub num_workers: usize,
  #[serde(default = "default_num_listeners")]
  pub num_listeners: usize,
  #[serde(default = "default_buffer_size")]
  pub buffer_size: usize,

  // Flush pipeline.
  #[serde(default = "default_interval", with = "humantime_serde")]
  pub interval: Duration,
  #[serde(default = "default_expiry", with = "humantime_serde")]
  pub expiry: Duration,
  #[serde(default = "default_flush_worker_timeout", with = "humantime_serde")]
  pub flush_worker_timeout: Duration,
  #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
  pub shutdown_grace: Duration,
  #[serde(default = "default_percentiles")]
  pub percentiles: Vec<f64>,
  #[serde(default = "default_aggregates")]
  pub aggregates: Vec<String>,

  // Output decoration. An explicitly empty hostname disables per-host
  // attribution; absent means "use the OS hostname".
  #[serde(default)]
  pub hostname: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,

  // Self-telemetry.
  #[serde(default = "default_stats_address")]
  pub stats_address: String,
  #[serde(default = "default_sample_rate")]
  pub sample_rate: f64,
  #[serde(default)]
  pub debug: bool,

  // Optional sinks.
  #[serde(default)]
  pub csv_path: Option<PathBuf>,
  #[serde(default)]
  pub csv_time_format: Option<String>,
  #[serde(default)]
  pub kafka_brokers: Option<String>,
  #[serde(default)]
  pub kafka_topic: Option<String>,
}

impl Config {
  pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
    let contents = std::fs::read_to_string(path)
      .with_context(|| format!("cannot read config file {}", path.display()))?;
    Self::load_from_str(&contents)
  }

  pub fn load_from_str(contents: &str) -> anyhow::Result<Self> {
    let config: Self = serde_yaml::from_str(contents).context("cannot parse config")?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> anyhow::Result<()> {
    if self.num_workers == 0 {
      bail!("num_workers must be at least 1");
    }
    if self.num_listeners == 0 {
      bail!("num_listeners must be at least 1");
    }
    if self.buffer_size == 0 {
      bail!("buffer_size must be nonzero");
    }
    if self.interval.is_zero() {
      bail!("interval must be nonzero");
    }
    for percentile in &self.percentiles {
      if !(*percentile > 0.0 && *percentile < 1.0) {
        bail!("percentiles must be between 0.0 and 1.0, got {percentile}");
      }
    }
    if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
      bail!("sample_rate must be in (0, 1]");
    }
    self.histogram_aggregates()?;
    if self.kafka_brokers.is_some() != self.kafka_topic.is_some() {
      bail!("kafka_brokers and kafka_topic must be configured together");
    }
    Ok(())
  }

  pub fn histogram_aggregates(&self) -> anyhow::Result<HistogramAggregates> {
    HistogramAggregates::from_names(&self.aggregates)
  }

  // The hostname stamped on flushed metrics. Explicit empty string means the
  // deployment is host-agnostic, which is the normal mode for a global
  // aggregator.
  #[must_use]
  pub fn resolved_hostname(&self) -> String {
    self.hostname.clone().unwrap_or_else(|| {
      hostname::get().map_or_else(
        |_| String::new(),
        |h| h.to_string_lossy().into_owned(),
      )
    })
  }
}
