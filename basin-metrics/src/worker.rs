// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./worker_test.rs"]
mod worker_test;

use crate::aggregation::counter::Counter;
use crate::aggregation::gauge::Gauge;
use crate::aggregation::histogram::Histogram;
use crate::aggregation::set::Set;
use crate::aggregation::FlushCtx;
use crate::protos::metric::{FlushMetric, Metric, MetricType};
use crate::telemetry::{TelemetryClient, FLUSH_WORKER_DURATION_NS, WORKER_RESTART_TOTAL};
use ahash::AHashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

//
// WorkerFlush
//

// One worker's contribution to a flush tick: the drained output metrics and
// how long the worker was tied up producing them.
#[derive(Debug)]
pub struct WorkerFlush {
  pub metrics: Vec<FlushMetric>,
  pub elapsed: Duration,
}

//
// WorkerMessage
//

// Everything a worker consumes arrives over its single inbound channel, so
// a flush observes exactly the samples dequeued before it and nothing that
// arrives later.
pub enum WorkerMessage {
  Sample(Metric),
  Flush {
    ctx: FlushCtx,
    reply: oneshot::Sender<WorkerFlush>,
  },
}

//
// Entry
//

struct Entry<T> {
  aggregator: T,
  last_sample: Instant,
}

impl<T> Entry<T> {
  fn new(aggregator: T) -> Self {
    Self {
      aggregator,
      last_sample: Instant::now(),
    }
  }

  fn touch(&mut self) {
    self.last_sample = Instant::now();
  }
}

//
// Worker
//

// Owns one shard of the metric space: four fingerprint-keyed aggregator maps
// mutated only by this worker's task. No locks anywhere on the sample path.
pub struct Worker {
  index: usize,
  expiry: Duration,
  telemetry: Arc<TelemetryClient>,
  counters: AHashMap<u64, Entry<Counter>>,
  gauges: AHashMap<u64, Entry<Gauge>>,
  sets: AHashMap<u64, Entry<Set>>,
  histograms: AHashMap<u64, Entry<Histogram>>,
}

impl Worker {
  #[must_use]
  pub fn new(index: usize, expiry: Duration, telemetry: Arc<TelemetryClient>) -> Self {
    Self {
      index,
      expiry,
      telemetry,
      counters: AHashMap::new(),
      gauges: AHashMap::new(),
      sets: AHashMap::new(),
      histograms: AHashMap::new(),
    }
  }

  pub fn process_metric(&mut self, metric: Metric) {
    let fingerprint = metric.id().fingerprint();
    let (id, sample_rate, value) = metric.into_parts();
    match id.mtype() {
      MetricType::Counter => {
        let entry = self
          .counters
          .entry(fingerprint)
          .or_insert_with(|| Entry::new(Counter::new(id)));
        entry.aggregator.sample(value.to_simple(), sample_rate);
        entry.touch();
      },
      MetricType::Gauge => {
        let entry = self
          .gauges
          .entry(fingerprint)
          .or_insert_with(|| Entry::new(Gauge::new(id)));
        entry.aggregator.sample(value.to_simple());
        entry.touch();
      },
      MetricType::Histogram => {
        let entry = self
          .histograms
          .entry(fingerprint)
          .or_insert_with(|| Entry::new(Histogram::new(id)));
        entry.aggregator.sample(value.to_simple(), sample_rate);
        entry.touch();
      },
      MetricType::Set => {
        let entry = self
          .sets
          .entry(fingerprint)
          .or_insert_with(|| Entry::new(Set::new(id)));
        entry.aggregator.sample(value.to_set_member());
        entry.touch();
      },
    }
  }

  // Drain the shard into output metrics. Counters are consumed whole; gauges
  // and sets are retained and re-emit; histograms retain their reservoir but
  // reset interval stats. Expired aggregators are evicted first so they never
  // produce a final stale output.
  pub fn flush(&mut self, ctx: &FlushCtx) -> WorkerFlush {
    let start = Instant::now();
    self.expire(start);

    let mut metrics = Vec::with_capacity(self.counters.len() + self.gauges.len() + self.sets.len());
    for (_, entry) in self.counters.drain() {
      metrics.push(entry.aggregator.flush(ctx));
    }
    for entry in self.gauges.values() {
      metrics.push(entry.aggregator.flush(ctx));
    }
    for entry in self.sets.values() {
      metrics.push(entry.aggregator.flush(ctx));
    }
    for entry in self.histograms.values_mut() {
      metrics.extend(entry.aggregator.flush(ctx));
    }

    let elapsed = start.elapsed();
    let worker_tag = format!("worker:{}", self.index);
    self
      .telemetry
      .timing_ns(FLUSH_WORKER_DURATION_NS, elapsed, &[worker_tag.as_str()]);
    WorkerFlush { metrics, elapsed }
  }

  // Evict aggregators that have not sampled within the expiry window.
  // Counters are excluded: they are drained every flush anyway.
  pub fn expire(&mut self, now: Instant) {
    let expiry = self.expiry;
    let live = |entry_last: Instant| now.saturating_duration_since(entry_last) < expiry;
    self.gauges.retain(|_, entry| live(entry.last_sample));
    self.sets.retain(|_, entry| live(entry.last_sample));
    self.histograms.retain(|_, entry| live(entry.last_sample));
  }

  #[must_use]
  pub fn aggregator_count(&self) -> usize {
    self.counters.len() + self.gauges.len() + self.sets.len() + self.histograms.len()
  }
}

// Consume the inbound channel until every sender is gone. This is the whole
// worker: samples mutate the shard, flush requests drain it.
async fn run_worker(worker: &mut Worker, rx: &mut mpsc::Receiver<WorkerMessage>) {
  while let Some(message) = rx.recv().await {
    match message {
      WorkerMessage::Sample(metric) => worker.process_metric(metric),
      WorkerMessage::Flush { ctx, reply } => {
        // The flusher may have timed out on us; a dead receiver is fine.
        let _ignored = reply.send(worker.flush(&ctx));
      },
    }
  }
}

/// Run a worker until shutdown, containing panics. A panicking worker loses
/// its accumulated shard state but keeps its channel, so ingest continues
/// after the restart; the supervisor counter makes the loss visible.
pub async fn run_supervised(
  index: usize,
  expiry: Duration,
  telemetry: Arc<TelemetryClient>,
  mut rx: mpsc::Receiver<WorkerMessage>,
) {
  loop {
    let mut worker = Worker::new(index, expiry, telemetry.clone());
    let result = AssertUnwindSafe(run_worker(&mut worker, &mut rx))
      .catch_unwind()
      .await;
    match result {
      Ok(()) => {
        log::debug!("worker {index} channel closed, exiting");
        return;
      },
      Err(_) => {
        log::error!("worker {index} panicked, restarting with fresh state");
        let worker_tag = format!("worker:{index}");
        telemetry.count(WORKER_RESTART_TOTAL, 1, &[worker_tag.as_str()]);
      },
    }
  }
}
