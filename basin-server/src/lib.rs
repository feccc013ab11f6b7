// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;

#[cfg(test)]
mod test;

use anyhow::Context;
use basin_metrics::flush::Flusher;
use basin_metrics::listener::{bind_udp, udp_reader, Router};
use basin_metrics::sinks::csv::CsvSink;
use basin_metrics::sinks::datadog::DatadogSink;
use basin_metrics::sinks::Sink;
use basin_metrics::telemetry::TelemetryClient;
use basin_metrics::worker::{run_supervised, WorkerMessage};
use config::Config;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// Per-worker inbound queue depth. Deep enough to ride out flush pauses at
// high ingest rates; overflow drops are counted, not blocked on.
const WORKER_QUEUE_DEPTH: usize = 4096;

const UPSTREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn make_sinks(config: &Config) -> anyhow::Result<Vec<Arc<dyn Sink>>> {
  let mut sinks: Vec<Arc<dyn Sink>> = vec![];
  if config.key.is_empty() {
    log::warn!("no upstream api key configured, upstream flush disabled");
  } else {
    sinks.push(Arc::new(DatadogSink::new(
      &config.api_hostname,
      &config.key,
      UPSTREAM_REQUEST_TIMEOUT,
    )?));
  }

  if let Some(csv_path) = &config.csv_path {
    sinks.push(Arc::new(CsvSink::new(
      csv_path.clone(),
      config.resolved_hostname(),
      config.csv_time_format.as_deref(),
    )?));
  }

  #[cfg(feature = "kafka")]
  if let (Some(brokers), Some(topic)) = (&config.kafka_brokers, &config.kafka_topic) {
    sinks.push(Arc::new(basin_metrics::sinks::kafka::KafkaSink::new(
      brokers,
      topic.clone(),
    )?));
  }
  #[cfg(not(feature = "kafka"))]
  if config.kafka_brokers.is_some() {
    log::warn!("kafka sink configured but this build does not include kafka support");
  }

  Ok(sinks)
}

//
// Server
//

// A running aggregation server: listener tasks, the worker pool, and the
// flusher, tied together by a shutdown watch.
pub struct Server {
  local_addr: SocketAddr,
  shutdown: watch::Sender<bool>,
  listeners: Vec<JoinHandle<()>>,
  workers: Vec<JoinHandle<()>>,
  flusher: JoinHandle<()>,
  worker_senders: Vec<mpsc::Sender<WorkerMessage>>,
  shutdown_grace: Duration,
}

impl Server {
  pub fn start(config: &Config) -> anyhow::Result<Self> {
    Self::start_with_sinks(config, make_sinks(config)?)
  }

  // Sink injection point; tests swap in capture sinks here.
  pub fn start_with_sinks(config: &Config, sinks: Vec<Arc<dyn Sink>>) -> anyhow::Result<Self> {
    let telemetry = Arc::new(TelemetryClient::new(
      &config.stats_address,
      config.sample_rate,
    ));
    let aggregates = config.histogram_aggregates()?;

    let mut worker_senders = Vec::with_capacity(config.num_workers);
    let mut workers = Vec::with_capacity(config.num_workers);
    for index in 0 .. config.num_workers {
      let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
      worker_senders.push(tx);
      workers.push(tokio::spawn(run_supervised(
        index,
        config.expiry,
        telemetry.clone(),
        rx,
      )));
    }

    let router = Arc::new(Router::new(worker_senders.clone(), telemetry.clone()));
    let (shutdown, _) = watch::channel(false);

    // Additional listeners rebind the first socket's resolved address, which
    // matters when the configured port is 0.
    let reuse_port = config.num_listeners > 1;
    let first_socket = bind_udp(&config.udp_address, reuse_port)
      .with_context(|| format!("cannot bind udp ingest socket {}", config.udp_address))?;
    let local_addr = first_socket.local_addr()?;
    log::info!("udp ingest listening on {local_addr}");

    let mut listeners = Vec::with_capacity(config.num_listeners);
    let mut sockets = vec![first_socket];
    for _ in 1 .. config.num_listeners {
      sockets.push(bind_udp(&local_addr.to_string(), reuse_port)?);
    }
    for socket in sockets {
      listeners.push(tokio::spawn(udp_reader(
        socket,
        config.buffer_size,
        router.clone(),
        telemetry.clone(),
        shutdown.subscribe(),
      )));
    }

    let flusher = Flusher::new(
      worker_senders.clone(),
      sinks,
      config.interval,
      config.flush_worker_timeout,
      config.percentiles.clone(),
      aggregates,
      config.tags.clone(),
      config.resolved_hostname(),
      telemetry,
    );
    let flusher_shutdown = shutdown.subscribe();
    let flusher = tokio::spawn(async move { flusher.run(flusher_shutdown).await });

    Ok(Self {
      local_addr,
      shutdown,
      listeners,
      workers,
      flusher,
      worker_senders,
      shutdown_grace: config.shutdown_grace,
    })
  }

  #[must_use]
  pub const fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  // Clean shutdown: listeners stop accepting, queued samples drain through
  // the workers, the flusher performs one final flush, then everything is
  // reaped. The grace period bounds the whole sequence; anything still
  // running afterwards is aborted.
  pub async fn shutdown(self) {
    log::info!("beginning shutdown");
    let _ignored = self.shutdown.send(true);

    let deadline = tokio::time::Instant::now() + self.shutdown_grace;
    for listener in self.listeners {
      if tokio::time::timeout_at(deadline, listener).await.is_err() {
        log::warn!("listener did not stop within the grace period");
      }
    }

    // The flusher reacts to the same signal with a final flush. Its flush
    // requests queue behind any samples the listeners already routed, so the
    // drain ordering is free.
    if tokio::time::timeout_at(deadline, self.flusher).await.is_err() {
      log::warn!("final flush did not finish within the grace period");
    }

    // All senders gone: worker channels close and the tasks exit.
    drop(self.worker_senders);
    for worker in self.workers {
      if tokio::time::timeout_at(deadline, worker).await.is_err() {
        log::warn!("worker did not stop within the grace period");
      }
    }
    log::info!("shutdown complete");
  }
}

/// Run until the provided signal future resolves, then shut down cleanly.
pub async fn run_server(
  config: Config,
  shutdown_signal: impl Future<Output = ()>,
) -> anyhow::Result<()> {
  let server = Server::start(&config)?;
  shutdown_signal.await;
  server.shutdown().await;
  Ok(())
}
