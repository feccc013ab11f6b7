// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./telemetry_test.rs"]
mod telemetry_test;

use bytes::BytesMut;
use rand::Rng;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

// Wire names of the server's own counters and timers. These are kept
// compatible with existing aggregator dashboards, so a basin deployment is a
// drop-in replacement for what it monitors.
pub const PACKET_ERROR_TOTAL: &str = "veneur.packet.error_total";
pub const PACKET_RECEIVED_TOTAL: &str = "veneur.packet.received_total";
pub const FLUSH_ERROR_TOTAL: &str = "veneur.flush.error_total";
pub const FLUSH_METRICS_TOTAL: &str = "veneur.flush.metrics_total";
pub const FLUSH_TRANSACTION_DURATION_NS: &str = "veneur.flush.transaction_duration_ns";
pub const FLUSH_WORKER_DURATION_NS: &str = "veneur.flush.worker_duration_ns";
pub const WORKER_DROPPED_TOTAL: &str = "veneur.worker.dropped_total";
pub const WORKER_RESTART_TOTAL: &str = "veneur.worker.restart_total";

//
// TelemetryClient
//

// A thin outbound DogStatsD emitter for the server's own counters and
// timers. Strictly best-effort: the socket is non-blocking, and any send
// failure is logged at debug level and forgotten. The hot path must never
// stall on observability.
pub struct TelemetryClient {
  socket: Option<UdpSocket>,
  sample_rate: f64,
}

impl TelemetryClient {
  #[must_use]
  pub fn new(stats_address: &str, sample_rate: f64) -> Self {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
      .and_then(|socket| {
        socket.connect(stats_address)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
      })
      .map_err(|e| {
        log::warn!("self-telemetry to {stats_address} disabled: {e}");
      })
      .ok();
    Self {
      socket,
      sample_rate,
    }
  }

  // A client that drops everything. Used by tests and by configurations with
  // no stats address.
  #[must_use]
  pub const fn disabled() -> Self {
    Self {
      socket: None,
      sample_rate: 1.0,
    }
  }

  pub fn count(&self, name: &str, value: u64, tags: &[&str]) {
    self.send_line(name, &value.to_string(), b"c", None, tags);
  }

  // Sampled counter emission for high frequency events. The configured rate
  // is declared on the wire so downstream aggregation compensates.
  pub fn count_sampled(&self, name: &str, value: u64) {
    if self.sample_rate < 1.0 && rand::thread_rng().gen::<f64>() >= self.sample_rate {
      return;
    }
    let rate = if self.sample_rate < 1.0 {
      Some(self.sample_rate)
    } else {
      None
    };
    self.send_line(name, &value.to_string(), b"c", rate, &[]);
  }

  pub fn timing_ns(&self, name: &str, elapsed: Duration, tags: &[&str]) {
    self.send_line(name, &elapsed.as_nanos().to_string(), b"h", None, tags);
  }

  fn send_line(&self, name: &str, value: &str, mtype: &[u8], rate: Option<f64>, tags: &[&str]) {
    let Some(socket) = &self.socket else {
      return;
    };

    let mut line = BytesMut::with_capacity(name.len() + value.len() + 16);
    line.extend_from_slice(name.as_bytes());
    line.extend_from_slice(b":");
    line.extend_from_slice(value.as_bytes());
    line.extend_from_slice(b"|");
    line.extend_from_slice(mtype);
    if let Some(rate) = rate {
      line.extend_from_slice(b"|@");
      line.extend_from_slice(rate.to_string().as_bytes());
    }
    if !tags.is_empty() {
      line.extend_from_slice(b"|#");
      let it = &mut tags.iter().peekable();
      while let Some(tag) = it.next() {
        line.extend_from_slice(tag.as_bytes());
        if it.peek().is_some() {
          line.extend_from_slice(b",");
        }
      }
    }

    if let Err(e) = socket.send(&line) {
      log::debug!("self-telemetry send failed: {e}");
    }
  }
}
