// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./listener_test.rs"]
mod listener_test;

use crate::protos::dogstatsd;
use crate::protos::metric::Metric;
use crate::telemetry::{
  TelemetryClient, PACKET_ERROR_TOTAL, PACKET_RECEIVED_TOTAL, WORKER_DROPPED_TOTAL,
};
use crate::worker::WorkerMessage;
use bytes::{Bytes, BytesMut};
use memchr::memchr;
use socket2::{Domain, Socket, Type};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

//
// Router
//

// Routes each parsed sample to the worker owning its fingerprint. Routing is
// the only place backpressure exists: a full worker queue drops the sample
// and counts it, because blocking here would stall the UDP receive loop.
pub struct Router {
  senders: Vec<mpsc::Sender<WorkerMessage>>,
  telemetry: Arc<TelemetryClient>,
}

impl Router {
  #[must_use]
  pub fn new(senders: Vec<mpsc::Sender<WorkerMessage>>, telemetry: Arc<TelemetryClient>) -> Self {
    assert!(!senders.is_empty());
    Self { senders, telemetry }
  }

  #[must_use]
  #[allow(clippy::cast_possible_truncation)]
  pub fn worker_index(&self, fingerprint: u64) -> usize {
    (fingerprint % self.senders.len() as u64) as usize
  }

  pub fn route(&self, metric: Metric) {
    let index = self.worker_index(metric.id().fingerprint());
    if self.senders[index]
      .try_send(WorkerMessage::Sample(metric))
      .is_err()
    {
      log::debug!("worker {index} queue full, dropping sample");
      let worker_tag = format!("worker:{index}");
      self
        .telemetry
        .count(WORKER_DROPPED_TOTAL, 1, &[worker_tag.as_str()]);
    }
  }
}

// Split a datagram payload into individual protocol lines, tolerating \r\n
// endings. The trailing segment needs no newline: a single-metric datagram is
// the common case.
pub(crate) fn split_lines(buf: &mut BytesMut) -> Vec<Bytes> {
  let mut ret: Vec<Bytes> = Vec::new();
  loop {
    match memchr(b'\n', buf) {
      None => break,
      Some(newline) => {
        let mut incoming = buf.split_to(newline + 1);
        let len = incoming.len();
        if len >= 2 && incoming[len - 2] == b'\r' {
          incoming.truncate(len - 2);
        } else {
          incoming.truncate(len - 1);
        }
        if !incoming.is_empty() {
          ret.push(incoming.freeze());
        }
      },
    };
  }

  if !buf.is_empty() {
    ret.push(buf.split().freeze());
  }
  ret
}

// Parse and route one datagram's worth of lines. A malformed record is
// counted and skipped; the rest of the datagram still lands.
fn parse_and_route(lines: Vec<Bytes>, router: &Router, telemetry: &TelemetryClient) {
  for line in lines {
    match dogstatsd::parse(&line) {
      Ok(metric) => {
        log::trace!("parsed metric '{}'", metric.id());
        router.route(metric);
      },
      Err(e) => {
        log::debug!("parse failure {e:?} (original line: {line:?})");
        telemetry.count(PACKET_ERROR_TOTAL, 1, &[]);
      },
    }
  }
}

/// Bind the ingest socket. With `reuse_port` multiple listener tasks can bind
/// the same address and the kernel spreads datagrams across them.
pub fn bind_udp(address: &str, reuse_port: bool) -> anyhow::Result<UdpSocket> {
  let addr: SocketAddr = address
    .to_socket_addrs()?
    .next()
    .ok_or_else(|| anyhow::anyhow!("cannot resolve bind address {address}"))?;
  let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, None)?;
  #[cfg(unix)]
  if reuse_port {
    socket.set_reuse_port(true)?;
  }
  socket.set_nonblocking(true)?;
  socket.bind(&addr.into())?;
  Ok(UdpSocket::from_std(socket.into())?)
}

/// One UDP receive loop. Datagrams are read into a fixed `buffer_size` slab;
/// anything longer was truncated by the kernel and will usually fail parsing
/// on its last record, which is the intended failure mode.
pub async fn udp_reader(
  socket: UdpSocket,
  buffer_size: usize,
  router: Arc<Router>,
  telemetry: Arc<TelemetryClient>,
  mut shutdown: watch::Receiver<bool>,
) {
  let local_addr = socket.local_addr().ok();
  let mut scratch = vec![0_u8; buffer_size];
  loop {
    tokio::select! {
      res = socket.recv_from(&mut scratch) => {
        match res {
          Ok((len, peer_addr)) => {
            log::trace!("udp recv from={peer_addr} len={len}");
            telemetry.count_sampled(PACKET_RECEIVED_TOTAL, 1);
            let mut buf = BytesMut::from(&scratch[.. len]);
            let lines = split_lines(&mut buf);
            parse_and_route(lines, &router, &telemetry);
          },
          Err(e) => log::warn!("udp receiver error: {e}"),
        }
      }
      _ = shutdown.changed() => {
        break;
      }
    }
  }
  if let Some(local_addr) = local_addr {
    log::info!("terminated udp listener on {local_addr}");
  }
}
