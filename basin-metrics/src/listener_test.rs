// basin - bitdrift's global statsd aggregation server
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::protos::dogstatsd::parse;

#[test]
fn split_single_line_no_newline() {
  let mut buf = BytesMut::from(&b"a.b.c:5|c"[..]);
  let lines = split_lines(&mut buf);
  assert_eq!(lines, vec![Bytes::from_static(b"a.b.c:5|c")]);
}

#[test]
fn split_multiple_lines() {
  let mut buf = BytesMut::from(&b"a:1|c\nb:2|g\nc:3|ms"[..]);
  let lines = split_lines(&mut buf);
  assert_eq!(
    lines,
    vec![
      Bytes::from_static(b"a:1|c"),
      Bytes::from_static(b"b:2|g"),
      Bytes::from_static(b"c:3|ms"),
    ]
  );
}

#[test]
fn split_handles_crlf_and_trailing_newline() {
  let mut buf = BytesMut::from(&b"a:1|c\r\nb:2|g\n"[..]);
  let lines = split_lines(&mut buf);
  assert_eq!(
    lines,
    vec![Bytes::from_static(b"a:1|c"), Bytes::from_static(b"b:2|g")]
  );
}

#[test]
fn split_skips_empty_lines() {
  let mut buf = BytesMut::from(&b"a:1|c\n\nb:2|g\n"[..]);
  let lines = split_lines(&mut buf);
  assert_eq!(lines.len(), 2);
}

#[tokio::test]
async fn routing_is_consistent_per_fingerprint() {
  let mut receivers = Vec::new();
  let mut senders = Vec::new();
  for _ in 0 .. 4 {
    let (tx, rx) = mpsc::channel(16);
    senders.push(tx);
    receivers.push(rx);
  }
  let router = Router::new(senders, Arc::new(TelemetryClient::disabled()));

  // Identical metrics (modulo tag order) always land on the same worker.
  let a = parse(&"a.b.c:1|c|#x:1,y:2".to_string().into()).unwrap();
  let b = parse(&"a.b.c:2|c|#y:2,x:1".to_string().into()).unwrap();
  let expected = router.worker_index(a.id().fingerprint());
  assert_eq!(expected, router.worker_index(b.id().fingerprint()));

  router.route(a);
  router.route(b);
  let mut delivered = 0;
  for (index, receiver) in receivers.iter_mut().enumerate() {
    while let Ok(message) = receiver.try_recv() {
      delivered += 1;
      assert_eq!(index, expected);
      assert!(matches!(message, WorkerMessage::Sample(_)));
    }
  }
  assert_eq!(delivered, 2);
}

#[tokio::test]
async fn full_queue_drops_instead_of_blocking() {
  let (tx, mut rx) = mpsc::channel(1);
  let router = Router::new(vec![tx], Arc::new(TelemetryClient::disabled()));

  let metric = parse(&"a.b.c:1|c".to_string().into()).unwrap();
  router.route(metric.clone());
  // Queue depth is one; the second route must drop rather than block.
  router.route(metric);

  assert!(rx.try_recv().is_ok());
  assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn udp_reader_end_to_end() {
  let socket = bind_udp("127.0.0.1:0", false).unwrap();
  let local_addr = socket.local_addr().unwrap();

  let (tx, mut rx) = mpsc::channel(16);
  let router = Arc::new(Router::new(vec![tx], Arc::new(TelemetryClient::disabled())));
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let reader = tokio::spawn(udp_reader(
    socket,
    65536,
    router,
    Arc::new(TelemetryClient::disabled()),
    shutdown_rx,
  ));

  let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
  client
    .send_to(b"a.b.c:5|c\nnot a metric\nx.y:1|g", local_addr)
    .unwrap();

  // Two parseable records; the malformed one is dropped without killing the
  // datagram.
  for _ in 0 .. 2 {
    let message = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(message, WorkerMessage::Sample(_)));
  }

  shutdown_tx.send(true).unwrap();
  reader.await.unwrap();
}
