// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{Sink, SinkError};
use crate::protos::metric::FlushMetric;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use time::OffsetDateTime;

//
// KafkaSink
//

// Produces one JSON message per flushed metric. This sink is explicitly
// fire-and-forget: records are handed to the async producer and the delivery
// futures are dropped, so broker-side failures are invisible here. Queue-full
// errors are the only observable failure and are logged at debug level.
pub struct KafkaSink {
  producer: FutureProducer,
  topic: String,
}

impl KafkaSink {
  pub fn new(brokers: &str, topic: String) -> anyhow::Result<Self> {
    let producer = ClientConfig::new()
      .set("bootstrap.servers", brokers)
      .set("message.timeout.ms", "5000")
      .create()?;
    Ok(Self { producer, topic })
  }
}

fn encode(metric: &FlushMetric) -> Vec<u8> {
  serde_json::json!({
    "metric": metric.name,
    "points": [[metric.timestamp, metric.value]],
    "tags": metric.tags,
    "host": metric.hostname,
    "device_name": metric.device_name,
    "type": metric.kind.as_str(),
    "interval": metric.interval,
  })
  .to_string()
  .into_bytes()
}

#[async_trait]
impl Sink for KafkaSink {
  fn name(&self) -> &'static str {
    "kafka"
  }

  async fn flush(
    &self,
    batch: &[FlushMetric],
    _flushed_at: OffsetDateTime,
  ) -> Result<(), SinkError> {
    for metric in batch {
      let payload = encode(metric);
      let record = FutureRecord::to(&self.topic)
        .key(metric.name.as_bytes())
        .payload(&payload);
      if let Err((e, _record)) = self.producer.send_result(record) {
        log::debug!("kafka enqueue failed for {}: {e}", metric.name);
      }
    }
    Ok(())
  }
}
