// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./flush_test.rs"]
mod flush_test;

use crate::aggregation::{FlushCtx, HistogramAggregates};
use crate::protos::metric::{default_timestamp, FlushMetric};
use crate::sinks::Sink;
use crate::telemetry::{
  TelemetryClient, FLUSH_ERROR_TOTAL, FLUSH_METRICS_TOTAL, FLUSH_TRANSACTION_DURATION_NS,
};
use crate::worker::{WorkerFlush, WorkerMessage};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

//
// Flusher
//

// Timer-driven flush pipeline. Every interval it snapshots all workers in
// parallel, decorates the merged batch with the server-level tags and
// hostname, and fans it out to every sink. Holds no metric state of its own:
// a failed tick is simply gone, and the next tick starts fresh.
pub struct Flusher {
  workers: Vec<mpsc::Sender<WorkerMessage>>,
  sinks: Vec<Arc<dyn Sink>>,
  interval: Duration,
  worker_timeout: Duration,
  percentiles: Arc<Vec<f64>>,
  aggregates: HistogramAggregates,
  global_tags: Vec<String>,
  hostname: String,
  telemetry: Arc<TelemetryClient>,
}

impl Flusher {
  #[allow(clippy::too_many_arguments)]
  #[must_use]
  pub fn new(
    workers: Vec<mpsc::Sender<WorkerMessage>>,
    sinks: Vec<Arc<dyn Sink>>,
    interval: Duration,
    worker_timeout: Duration,
    percentiles: Vec<f64>,
    aggregates: HistogramAggregates,
    global_tags: Vec<String>,
    hostname: String,
    telemetry: Arc<TelemetryClient>,
  ) -> Self {
    Self {
      workers,
      sinks,
      interval,
      worker_timeout,
      percentiles: Arc::new(percentiles),
      aggregates,
      global_tags,
      hostname,
      telemetry,
    }
  }

  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first real flush happens one
    // full interval after startup.
    ticker.tick().await;

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          self.flush_once().await;
        }
        _ = shutdown.changed() => {
          break;
        }
      }
    }

    log::debug!("performing shutdown flush");
    self.flush_once().await;
  }

  // One flush tick. A slow or wedged worker forfeits its batch for this tick
  // only; its state keeps accumulating and the next tick picks it up.
  pub async fn flush_once(&self) {
    let start = Instant::now();
    let ctx = FlushCtx {
      timestamp: default_timestamp(),
      interval: self.interval,
      percentiles: self.percentiles.clone(),
      aggregates: self.aggregates,
    };

    let mut requests: FuturesUnordered<_> = self
      .workers
      .iter()
      .enumerate()
      .map(|(index, sender)| request_worker_flush(index, sender, ctx.clone(), self.worker_timeout))
      .collect();

    let mut batch: Vec<FlushMetric> = Vec::new();
    while let Some(flush) = requests.next().await {
      if let Some(flush) = flush {
        batch.extend(flush.metrics);
      }
    }
    drop(requests);

    for metric in &mut batch {
      metric.tags.extend(self.global_tags.iter().cloned());
      if !self.hostname.is_empty() {
        metric.hostname.clone_from(&self.hostname);
      }
    }

    self
      .telemetry
      .count(FLUSH_METRICS_TOTAL, batch.len() as u64, &[]);

    if batch.is_empty() {
      log::debug!("nothing to flush this interval");
    } else {
      let flushed_at = time::OffsetDateTime::now_utc();
      for sink in &self.sinks {
        if let Err(e) = sink.flush(&batch, flushed_at).await {
          log::warn!("flush to {} failed: {e}", sink.name());
          let sink_tag = format!("sink:{}", sink.name());
          self
            .telemetry
            .count(FLUSH_ERROR_TOTAL, 1, &[sink_tag.as_str()]);
        }
      }
    }

    self
      .telemetry
      .timing_ns(FLUSH_TRANSACTION_DURATION_NS, start.elapsed(), &[]);
    log::debug!("flushed {} metric(s)", batch.len());
  }
}

async fn request_worker_flush(
  index: usize,
  sender: &mpsc::Sender<WorkerMessage>,
  ctx: FlushCtx,
  worker_timeout: Duration,
) -> Option<WorkerFlush> {
  let (reply, reply_rx) = oneshot::channel();
  if sender
    .send(WorkerMessage::Flush { ctx, reply })
    .await
    .is_err()
  {
    log::warn!("worker {index} is gone, skipping its batch");
    return None;
  }

  match tokio::time::timeout(worker_timeout, reply_rx).await {
    Ok(Ok(flush)) => Some(flush),
    Ok(Err(_)) => {
      log::warn!("worker {index} dropped its flush reply");
      None
    },
    Err(_) => {
      log::warn!("worker {index} timed out during flush, skipping its batch");
      None
    },
  }
}
