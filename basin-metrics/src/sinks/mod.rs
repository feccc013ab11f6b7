// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod csv;
pub mod datadog;
#[cfg(feature = "kafka")]
pub mod kafka;

use crate::protos::metric::FlushMetric;
use async_trait::async_trait;
use time::OffsetDateTime;

//
// SinkError
//

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("upstream returned {status}: {body}")]
  Response { status: u16, body: String },
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("encoding error: {0}")]
  Encode(String),
}

//
// Sink
//

// A flush destination. The flusher fans every tick's batch out to all
// configured sinks; a failing sink is counted and logged but never retried
// within the interval, and one sink's failure does not gate another's write.
#[mockall::automock]
#[async_trait]
pub trait Sink: Send + Sync {
  fn name(&self) -> &'static str;

  async fn flush(
    &self,
    batch: &[FlushMetric],
    flushed_at: OffsetDateTime,
  ) -> Result<(), SinkError>;
}
