// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./dogstatsd_test.rs"]
mod dogstatsd_test;

use super::metric::{Metric, MetricId, MetricType, MetricValue, ParseError, TagValue};
use memchr::{memchr, memrchr};
use std::vec;

fn parse_tags(input: bytes::Bytes) -> Result<Vec<TagValue>, ParseError> {
  if input.is_empty() {
    return Ok(vec![]);
  }

  let mut tags: Vec<TagValue> = Vec::new();
  let mut scan = input;
  loop {
    let tag_index_end = memchr(b',', scan.as_ref()).map_or_else(|| scan.len(), |i| i);
    let tag_scan = scan.slice(0 .. tag_index_end);
    match memchr(b':', tag_scan.as_ref()) {
      // Value-less tag, consume the name and continue
      None => tags.push(TagValue {
        tag: tag_scan,
        value: "".into(),
      }),
      Some(value_start) => tags.push(TagValue {
        tag: tag_scan.slice(0 .. value_start),
        value: tag_scan.slice(value_start + 1 ..),
      }),
    }
    if tag_index_end == scan.len() {
      return Ok(tags);
    }
    scan = scan.slice(tag_index_end + 1 ..);
  }
}

/// Parse a single DogStatsD protocol unit of the form
/// `name:value|type[|@sample_rate][|#tag1,tag2,...]`. Field offsets are
/// located first with memchr scans and values are validated afterwards, so a
/// structurally broken line fails before any float parsing happens.
pub fn parse(input: &bytes::Bytes) -> Result<Metric, ParseError> {
  let length = input.len();

  // To support inner ':' symbols in a metric name (more common than you
  // think) we'll first find the index of the first type separator, and
  // then do a walk to find the last ':' symbol before that.
  let type_index = memchr(b'|', input.as_ref()).ok_or(ParseError::InvalidLine)? + 1;
  let value_index = memrchr(b':', &input[0 .. type_index]).ok_or(ParseError::InvalidType)? + 1;

  let mut type_index_end = length;
  let mut sample_rate_index: Option<(usize, usize)> = None;
  let mut tags_index: Option<(usize, usize)> = None;

  let mut scan_index = type_index;
  loop {
    let index = memchr(b'|', &input[scan_index ..]).map(|v| v + scan_index);
    match index {
      None => break,
      Some(x) if x + 2 >= length => break,
      Some(x) if x < type_index_end => type_index_end = x,
      _ => (),
    }
    match input[index.unwrap() + 1] {
      b'@' => {
        if sample_rate_index.is_some() {
          return Err(ParseError::RepeatedSampleRate);
        }
        sample_rate_index = index.map(|v| (v + 2, length));
        tags_index = tags_index.map(|(v, _l)| (v, index.unwrap()));
      },
      b'#' => {
        if tags_index.is_some() {
          return Err(ParseError::RepeatedTags);
        }
        tags_index = index.map(|v| (v + 2, length));
        sample_rate_index = sample_rate_index.map(|(v, _l)| (v, index.unwrap()));
      },
      _ => (),
    }
    scan_index = index.unwrap() + 1;
  }

  let mtype = MetricType::from_statsd(&input[type_index .. type_index_end])?;
  let sample_rate = sample_rate_index
    .map(|(start, end)| {
      std::str::from_utf8(&input[start .. end])
        .map_err(|_| ParseError::InvalidSampleRate)?
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidSampleRate)
    })
    .transpose()?
    .unwrap_or(1.0);
  // A client-declared rate outside (0, 1] cannot be compensated for.
  if !(sample_rate > 0.0 && sample_rate <= 1.0) {
    return Err(ParseError::InvalidSampleRate);
  }

  let tags = tags_index
    .map(|(start, end)| parse_tags(input.slice(start .. end)))
    .transpose()?
    .unwrap_or_default();
  let name = input.slice(0 .. value_index - 1);

  let value_slice = input.slice(value_index .. type_index - 1);
  let value = if mtype == MetricType::Set {
    // Set members are opaque strings, never parsed as numbers.
    MetricValue::Set(value_slice)
  } else {
    let parsed = std::str::from_utf8(&value_slice)
      .map_err(|_| ParseError::InvalidValue)?
      .parse::<f64>()
      .map_err(|_| ParseError::InvalidValue)?;
    if !parsed.is_finite() {
      return Err(ParseError::InvalidValue);
    }
    MetricValue::Simple(parsed)
  };

  let id = MetricId::new(name, mtype, tags, false)?;
  Ok(Metric::new(id, sample_rate, value))
}

/// Render a metric back into a single DogStatsD line. Used by the
/// self-telemetry client; sets are not emitted by that path.
pub fn to_statsd_line(metric: &Metric) -> bytes::Bytes {
  let mut line = bytes::BytesMut::new();
  line.extend_from_slice(metric.id().name().as_ref());
  line.extend_from_slice(b":");
  match &metric.value {
    MetricValue::Simple(value) => line.extend_from_slice(value.to_string().as_bytes()),
    MetricValue::Set(member) => line.extend_from_slice(member.as_ref()),
  }
  line.extend_from_slice(b"|");
  line.extend_from_slice(metric.id().mtype().to_statsd());
  if metric.sample_rate != 1.0 {
    line.extend_from_slice(b"|@");
    line.extend_from_slice(metric.sample_rate.to_string().as_bytes());
  }
  if !metric.id().tags().is_empty() {
    line.extend_from_slice(b"|#");
    let it = &mut metric.id().tags().iter().peekable();
    while let Some(tag) = it.next() {
      line.extend_from_slice(tag.tag.as_ref());
      if !tag.value.is_empty() {
        line.extend_from_slice(b":");
        line.extend_from_slice(tag.value.as_ref());
      }
      if it.peek().is_some() {
        line.extend_from_slice(b",");
      }
    }
  }
  line.freeze()
}
