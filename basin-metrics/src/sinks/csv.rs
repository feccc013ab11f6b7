// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./csv_test.rs"]
mod csv_test;

use super::{Sink, SinkError};
use crate::protos::metric::FlushMetric;
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use time::format_description::OwnedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

pub const DEFAULT_TIME_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

// Partition values are the flush day. Redshift-style incremental loaders key
// on this; samples flushed just after midnight land in the new day's
// partition even if they were collected before it.
fn partition(flushed_at: OffsetDateTime) -> String {
  flushed_at
    .format(format_description!("[year][month][day]"))
    .unwrap_or_default()
}

// Write one metric as a TSV row in the fixed schema: Name, Tags, MetricType,
// Hostname, VeneurHostname, DeviceName, Interval, Timestamp, Value,
// Partition. Tags render as "{a:b,c:d}"; any field containing the delimiter
// gets quoted by the writer.
pub(crate) fn encode_row<W: Write>(
  writer: &mut csv::Writer<W>,
  metric: &FlushMetric,
  server_hostname: &str,
  time_format: &OwnedFormatItem,
  partition: &str,
) -> Result<(), SinkError> {
  let timestamp = OffsetDateTime::from_unix_timestamp(i64::try_from(metric.timestamp).unwrap_or(0))
    .map_err(|e| SinkError::Encode(e.to_string()))?
    .format(time_format)
    .map_err(|e| SinkError::Encode(e.to_string()))?;
  let tags = format!("{{{}}}", metric.tags.join(","));
  let interval = metric.interval.to_string();
  let value = metric.value.to_string();

  writer
    .write_record([
      metric.name.as_str(),
      tags.as_str(),
      metric.kind.as_str(),
      metric.hostname.as_str(),
      server_hostname,
      metric.device_name.as_str(),
      interval.as_str(),
      timestamp.as_str(),
      value.as_str(),
      partition,
    ])
    .map_err(|e| SinkError::Encode(e.to_string()))?;
  Ok(())
}

//
// CsvSink
//

// Appends flushed metrics to a local TSV file, one row per metric. The rows
// are built in memory per tick and written with a single append so partially
// written flushes cannot interleave.
pub struct CsvSink {
  path: PathBuf,
  server_hostname: String,
  time_format: OwnedFormatItem,
}

impl CsvSink {
  pub fn new(
    path: PathBuf,
    server_hostname: String,
    time_format: Option<&str>,
  ) -> anyhow::Result<Self> {
    let time_format = time::format_description::parse_owned::<2>(
      time_format.unwrap_or(DEFAULT_TIME_FORMAT),
    )?;
    Ok(Self {
      path,
      server_hostname,
      time_format,
    })
  }
}

#[async_trait]
impl Sink for CsvSink {
  fn name(&self) -> &'static str {
    "csv"
  }

  async fn flush(
    &self,
    batch: &[FlushMetric],
    flushed_at: OffsetDateTime,
  ) -> Result<(), SinkError> {
    let partition = partition(flushed_at);
    let mut writer = csv::WriterBuilder::new()
      .delimiter(b'\t')
      .from_writer(Vec::new());
    for metric in batch {
      encode_row(
        &mut writer,
        metric,
        &self.server_hostname,
        &self.time_format,
        &partition,
      )?;
    }
    let rows = writer
      .into_inner()
      .map_err(|e| SinkError::Encode(e.to_string()))?;

    let mut file = std::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    file.write_all(&rows)?;
    log::debug!("appended {} row(s) to {}", batch.len(), self.path.display());
    Ok(())
  }
}
