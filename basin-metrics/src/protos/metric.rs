// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./metric_test.rs"]
mod metric_test;

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use xxhash_rust::xxh64::Xxh64;

//
// MetricType
//

// The four aggregated metric types. Timers ("ms") are parsed as histograms.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MetricType {
  Counter,
  Gauge,
  Histogram,
  Set,
}

impl MetricType {
  pub const fn from_statsd(t: &[u8]) -> Result<Self, ParseError> {
    match t {
      b"c" => Ok(Self::Counter),
      b"g" => Ok(Self::Gauge),
      b"h" | b"ms" => Ok(Self::Histogram),
      b"s" => Ok(Self::Set),
      _ => Err(ParseError::InvalidType),
    }
  }

  #[must_use]
  pub const fn to_statsd(self) -> &'static [u8] {
    match self {
      Self::Counter => b"c",
      Self::Gauge => b"g",
      Self::Histogram => b"h",
      Self::Set => b"s",
    }
  }

  // Stable discriminant mixed into the fingerprint. Wire codes are not used
  // here since "h" and "ms" must collide.
  const fn fingerprint_code(self) -> u8 {
    match self {
      Self::Counter => 1,
      Self::Gauge => 2,
      Self::Histogram => 3,
      Self::Set => 4,
    }
  }
}

//
// TagValue
//

// A metric tag. Bare tags ("#shard") carry an empty value.
#[derive(PartialOrd, Eq, Ord, Debug, Clone, PartialEq, Hash)]
pub struct TagValue {
  pub tag: bytes::Bytes,
  pub value: bytes::Bytes,
}

impl TagValue {
  // Render as the canonical "k:v" (or bare "k") form used on output.
  #[must_use]
  pub fn format(&self) -> String {
    if self.value.is_empty() {
      String::from_utf8_lossy(&self.tag).into_owned()
    } else {
      format!(
        "{}:{}",
        String::from_utf8_lossy(&self.tag),
        String::from_utf8_lossy(&self.value)
      )
    }
  }
}

impl Display for TagValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}={}",
      String::from_utf8_lossy(&self.tag),
      String::from_utf8_lossy(&self.value)
    )
  }
}

//
// MetricId
//

// A metric's identity: name, type, and sorted tags, plus the stable 64-bit
// fingerprint derived from them. Two samples with equal fingerprints land in
// the same aggregator on the same worker, so the fingerprint must not depend
// on the order in which a client happened to send its tags.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetricId {
  name: bytes::Bytes,
  mtype: MetricType,
  tags: Vec<TagValue>,
  fingerprint: u64,
}

fn tags_sorted(tags: &[TagValue]) -> bool {
  tags.windows(2).all(|w| w[0] <= w[1])
}

impl MetricId {
  // Create a new metric ID, sorting tags so that equivalent tag sets hash
  // identically. Callers that know the tags are sorted can say so to skip the
  // sort.
  pub fn new(
    name: bytes::Bytes,
    mtype: MetricType,
    mut tags: Vec<TagValue>,
    already_sorted: bool,
  ) -> Result<Self, ParseError> {
    if name.is_empty() {
      return Err(ParseError::EmptyName);
    }

    if already_sorted {
      debug_assert!(tags_sorted(&tags));
    } else {
      tags.sort_unstable();
    }

    let fingerprint = Self::compute_fingerprint(&name, mtype, &tags);
    Ok(Self {
      name,
      mtype,
      tags,
      fingerprint,
    })
  }

  // xxh64 over length-delimited (name, type, sorted tags). The layout is part
  // of the routing contract: the same digest selects the same worker across
  // restarts and across listener threads.
  fn compute_fingerprint(name: &bytes::Bytes, mtype: MetricType, tags: &[TagValue]) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(&(name.len() as u64).to_le_bytes());
    hasher.update(name);
    hasher.update(&[mtype.fingerprint_code()]);
    for tag in tags {
      hasher.update(&(tag.tag.len() as u64).to_le_bytes());
      hasher.update(&tag.tag);
      hasher.update(&(tag.value.len() as u64).to_le_bytes());
      hasher.update(&tag.value);
    }
    hasher.digest()
  }

  pub const fn mtype(&self) -> MetricType {
    self.mtype
  }

  pub const fn name(&self) -> &bytes::Bytes {
    &self.name
  }

  pub fn tags(&self) -> &[TagValue] {
    &self.tags
  }

  pub const fn fingerprint(&self) -> u64 {
    self.fingerprint
  }

  // Tags in output "k:v" form.
  #[must_use]
  pub fn format_tags(&self) -> Vec<String> {
    self.tags.iter().map(TagValue::format).collect()
  }
}

impl std::fmt::Display for MetricId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name_str = String::from_utf8_lossy(self.name.as_ref());
    write!(f, "{name_str}(")?;
    for tag in &self.tags {
      write!(f, "[{tag}]")?;
    }
    write!(f, ")")
  }
}

//
// MetricValue
//

// A sample's value. Sets carry the raw member bytes; everything else is f64.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
  Simple(f64),
  Set(bytes::Bytes),
}

impl MetricValue {
  #[must_use]
  pub fn to_simple(&self) -> f64 {
    match self {
      Self::Simple(value) => *value,
      Self::Set(_) => unreachable!(),
    }
  }

  #[must_use]
  pub fn to_set_member(&self) -> &bytes::Bytes {
    match self {
      Self::Simple(_) => unreachable!(),
      Self::Set(member) => member,
    }
  }
}

//
// Metric
//

// A single parsed sample: identity, sample rate, and value. The sample rate
// is the client-declared transmission probability; aggregators compensate by
// weighting 1/rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
  id: MetricId,
  pub sample_rate: f64,
  pub value: MetricValue,
}

#[must_use]
pub fn default_timestamp() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|n| n.as_secs())
    .unwrap()
}

impl Metric {
  pub const fn new(id: MetricId, sample_rate: f64, value: MetricValue) -> Self {
    Self {
      id,
      sample_rate,
      value,
    }
  }

  pub const fn id(&self) -> &MetricId {
    &self.id
  }

  pub fn into_parts(self) -> (MetricId, f64, MetricValue) {
    (self.id, self.sample_rate, self.value)
  }
}

impl std::fmt::Display for Metric {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}[VALUE={}][RATE={}]",
      self.id,
      match &self.value {
        MetricValue::Simple(s) => s.to_string(),
        MetricValue::Set(member) => String::from_utf8_lossy(member).into_owned(),
      },
      self.sample_rate,
    )
  }
}

//
// MetricKind
//

// The type of a flushed output metric as the upstream backend understands it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
  Gauge,
  Rate,
}

impl MetricKind {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Gauge => "gauge",
      Self::Rate => "rate",
    }
  }
}

//
// FlushMetric
//

// A flush-ready output metric: one (timestamp, value) point plus the
// decoration the upstream wire format needs. Rate-typed metrics carry the
// flush interval in seconds; gauges carry zero.
#[derive(Clone, Debug, PartialEq)]
pub struct FlushMetric {
  pub name: String,
  pub timestamp: u64,
  pub value: f64,
  pub tags: Vec<String>,
  pub kind: MetricKind,
  pub hostname: String,
  pub device_name: String,
  pub interval: u32,
}

//
// ParseError
//

// Errors that arise while parsing a wire record.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum ParseError {
  #[error("empty metric name")]
  EmptyName,
  #[error("invalid parsed value")]
  InvalidValue,
  #[error("invalid sample rate")]
  InvalidSampleRate,
  #[error("invalid type")]
  InvalidType,
  #[error("overall invalid line - no structural elements found in parsing")]
  InvalidLine,
  #[error("more than one sample rate field found")]
  RepeatedSampleRate,
  #[error("more than one set of tags found")]
  RepeatedTags,
}
