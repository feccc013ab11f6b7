// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::config::Config;
use crate::Server;
use async_trait::async_trait;
use basin_metrics::protos::metric::{FlushMetric, MetricKind};
use basin_metrics::sinks::{Sink, SinkError};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;

//
// CaptureSink
//

struct CaptureSink {
  tx: mpsc::UnboundedSender<Vec<FlushMetric>>,
}

#[async_trait]
impl Sink for CaptureSink {
  fn name(&self) -> &'static str {
    "capture"
  }

  async fn flush(
    &self,
    batch: &[FlushMetric],
    _flushed_at: OffsetDateTime,
  ) -> Result<(), SinkError> {
    self.tx.send(batch.to_vec()).unwrap();
    Ok(())
  }
}

fn start_server() -> (Server, mpsc::UnboundedReceiver<Vec<FlushMetric>>) {
  let config = Config::load_from_str(
    r"
udp_address: 127.0.0.1:0
num_workers: 4
interval: 1s
percentiles: [0.9]
hostname: globalstats
tags: [region:all]
",
  )
  .unwrap();
  let (tx, rx) = mpsc::unbounded_channel();
  let server = Server::start_with_sinks(&config, vec![Arc::new(CaptureSink { tx })]).unwrap();
  (server, rx)
}

async fn next_batch(rx: &mut mpsc::UnboundedReceiver<Vec<FlushMetric>>) -> Vec<FlushMetric> {
  tokio::time::timeout(Duration::from_secs(10), rx.recv())
    .await
    .expect("no flush arrived")
    .expect("sink channel closed")
}

fn send_datagram(payload: &[u8], server: &Server) {
  let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
  client.send_to(payload, server.local_addr()).unwrap();
}

#[tokio::test]
async fn counter_end_to_end() {
  let (server, mut rx) = start_server();
  send_datagram(b"a.b.c:5|c", &server);

  // Empty intervals don't reach sinks, so the first batch is ours.
  let batch = next_batch(&mut rx).await;
  assert_eq!(batch.len(), 1);
  assert_eq!(batch[0].name, "a.b.c");
  assert_eq!(batch[0].kind, MetricKind::Rate);
  assert_eq!(batch[0].interval, 1);
  assert_eq!(batch[0].value, 5.0);
  assert_eq!(batch[0].hostname, "globalstats");
  assert_eq!(batch[0].tags, vec!["region:all".to_string()]);

  server.shutdown().await;
}

#[tokio::test]
async fn histogram_end_to_end() {
  let (server, mut rx) = start_server();
  send_datagram(b"a.b.c:5|h\na.b.c:10|h\na.b.c:15|h\na.b.c:20|h\na.b.c:25|h", &server);

  let batch = next_batch(&mut rx).await;
  let names: Vec<&str> = batch.iter().map(|m| m.name.as_str()).collect();
  assert_eq!(
    names,
    vec![
      "a.b.c.max",
      "a.b.c.min",
      "a.b.c.sum",
      "a.b.c.avg",
      "a.b.c.count",
      "a.b.c.median",
      "a.b.c.90percentile",
    ]
  );
  assert_eq!(batch[0].value, 25.0);
  assert_eq!(batch[1].value, 5.0);
  assert_eq!(batch[2].value, 75.0);
  assert_eq!(batch[3].value, 15.0);
  // Five samples over the one second interval.
  assert_eq!(batch[4].value, 5.0);
  assert_eq!(batch[4].kind, MetricKind::Rate);
  assert_eq!(batch[4].interval, 1);
  assert_eq!(batch[5].value, 15.0);
  assert_eq!(batch[6].value, 23.75);

  server.shutdown().await;
}

#[tokio::test]
async fn set_end_to_end() {
  let (server, mut rx) = start_server();
  send_datagram(
    b"users:5|s\nusers:5|s\nusers:123|s\nusers:2147483647|s\nusers:-2147483648|s",
    &server,
  );

  let batch = next_batch(&mut rx).await;
  assert_eq!(batch.len(), 1);
  assert_eq!(batch[0].name, "users");
  assert_eq!(batch[0].kind, MetricKind::Gauge);
  assert!((batch[0].value - 4.0).abs() <= 1.0);

  server.shutdown().await;
}

#[tokio::test]
async fn malformed_records_do_not_poison_the_datagram() {
  let (server, mut rx) = start_server();
  send_datagram(b"bad metric\na.b.c:2|g\nanother:bad|x", &server);

  let batch = next_batch(&mut rx).await;
  assert_eq!(batch.len(), 1);
  assert_eq!(batch[0].name, "a.b.c");
  assert_eq!(batch[0].value, 2.0);

  server.shutdown().await;
}

#[tokio::test]
async fn shutdown_performs_final_flush() {
  let (server, mut rx) = start_server();
  send_datagram(b"g.one:7|g", &server);

  // Wait for the gauge to show up, proving the sample was consumed.
  let batch = next_batch(&mut rx).await;
  assert_eq!(batch[0].name, "g.one");

  server.shutdown().await;
  // The shutdown flush re-emits the retained gauge.
  let mut saw_final = false;
  while let Ok(batch) = rx.try_recv() {
    saw_final = batch.iter().any(|m| m.name == "g.one");
  }
  assert!(saw_final);
}
