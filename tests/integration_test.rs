// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};
use std::time::Duration;

use statsd_aggregator::aggregator::Aggregator;
use statsd_aggregator::config::AggregatorConfig;
use statsd_aggregator::dogstatsd::{DogStatsD, DogStatsDConfig};
use statsd_aggregator::errors::DropCounters;
use statsd_aggregator::outbound::OutboundBuffer;
use statsd_aggregator::sample::{OutgoingSample, SampleValue};
use statsd_aggregator::sink::{ChannelSink, Sink};
use tokio::{
    net::UdpSocket,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

async fn start_dogstatsd(
    aggregator_config: AggregatorConfig,
) -> (
    CancellationToken,
    std::net::SocketAddr,
    Arc<OutboundBuffer<Vec<OutgoingSample>>>,
    Arc<DropCounters>,
) {
    let drops = Arc::new(DropCounters::default());
    let aggregator = Arc::new(Mutex::new(
        Aggregator::new(aggregator_config.clone(), None, Arc::clone(&drops))
            .expect("failed to create aggregator"),
    ));
    let buffer = Arc::new(OutboundBuffer::new(64));
    let sink: Arc<dyn Sink> = Arc::new(ChannelSink::new(Arc::clone(&buffer), Arc::clone(&drops)));
    let cancel_token = CancellationToken::new();

    let dogstatsd_config = DogStatsDConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let dogstatsd_client = DogStatsD::new(
        &dogstatsd_config,
        aggregator,
        aggregator_config,
        Arc::clone(&drops),
        sink,
        cancel_token.clone(),
    )
    .await;
    let server_addr = dogstatsd_client
        .local_addr()
        .expect("bound socket has an address");

    tokio::spawn(async move {
        dogstatsd_client.spin().await;
    });

    (cancel_token, server_addr, buffer, drops)
}

async fn send_and_wait_for_batch(
    server_addr: std::net::SocketAddr,
    buffer: &OutboundBuffer<Vec<OutgoingSample>>,
    line: &str,
) -> Vec<OutgoingSample> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .expect("unable to bind udp socket");
    socket
        .send_to(line.as_bytes(), server_addr)
        .await
        .expect("unable to send metric");

    let wait = async {
        loop {
            if let Some(batch) = buffer.try_pop() {
                return batch;
            }
            sleep(Duration::from_millis(20)).await;
        }
    };
    timeout(Duration::from_secs(2), wait)
        .await
        .expect("timed out waiting for a flushed batch")
}

fn fast_flush_config() -> AggregatorConfig {
    let mut config = AggregatorConfig::default();
    config.flush_time = Duration::from_millis(50);
    config
}

fn map_value(sample: &OutgoingSample) -> &std::collections::BTreeMap<String, f64> {
    match &sample.value {
        SampleValue::Map(m) => m,
        SampleValue::Real(_) => panic!("expected a mapping value"),
    }
}

#[tokio::test]
async fn counter_is_aggregated_and_reset_after_flush() {
    let (_cancel, addr, buffer, _drops) = start_dogstatsd(fast_flush_config()).await;

    let batch = send_and_wait_for_batch(addr, &buffer, "page.views:1|c").await;
    assert_eq!(batch.len(), 1);
    assert_eq!(map_value(&batch[0])["count"], 1.0);
}

#[tokio::test]
async fn gauge_persists_its_last_value() {
    let (_cancel, addr, buffer, _drops) = start_dogstatsd(fast_flush_config()).await;

    let batch = send_and_wait_for_batch(addr, &buffer, "queue.depth:12|g").await;
    assert_eq!(batch[0].value, SampleValue::Real(12.0));
}

#[tokio::test]
async fn set_reports_cardinality() {
    let (_cancel, addr, buffer, _drops) = start_dogstatsd(fast_flush_config()).await;

    let batch = send_and_wait_for_batch(addr, &buffer, "unique.visitors:user-42|s").await;
    assert_eq!(map_value(&batch[0])["count"], 1.0);
}

#[tokio::test]
async fn timer_flush_carries_summary_statistics() {
    let (_cancel, addr, buffer, _drops) = start_dogstatsd(fast_flush_config()).await;

    let batch = send_and_wait_for_batch(addr, &buffer, "request.latency:100|ms").await;
    // one sample per configured percentile threshold (50, 90, 99 by default)
    assert_eq!(batch.len(), 3);
    for sample in &batch {
        assert!(sample.metadata.contains_key("percentile"));
        let SampleValue::Map(values) = &sample.value else {
            panic!("expected a mapping value for a timer sample");
        };
        assert_eq!(values["count"], 1.0);
        assert!((values["lower"] - 100.0).abs() < 1e-9);
        assert!((values["upper"] - 100.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn malformed_line_is_dropped_without_taking_down_the_server() {
    let (_cancel, addr, buffer, drops) = start_dogstatsd(fast_flush_config()).await;

    let socket = UdpSocket::bind("0.0.0.0:0").await.unwrap();
    socket.send_to(b"not a valid line|", addr).await.unwrap();
    // follow up with a well-formed line so we can observe the server kept running
    let batch = send_and_wait_for_batch(addr, &buffer, "still.alive:1|c").await;
    assert_eq!(map_value(&batch[0])["count"], 1.0);
    assert!(drops.snapshot().parse_errors >= 1);
}

#[tokio::test]
async fn shutdown_triggers_a_final_flush() {
    let (cancel, addr, buffer, _drops) = start_dogstatsd(AggregatorConfig::default()).await;

    let socket = UdpSocket::bind("0.0.0.0:0").await.unwrap();
    socket
        .send_to(b"shutdown.counter:1|c", addr)
        .await
        .unwrap();
    // the configured flush interval is long; cancellation should still flush promptly
    sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let wait = async {
        loop {
            if let Some(batch) = buffer.try_pop() {
                return batch;
            }
            sleep(Duration::from_millis(20)).await;
        }
    };
    let batch = timeout(Duration::from_secs(2), wait)
        .await
        .expect("expected the shutdown path to flush");
    assert_eq!(map_value(&batch[0])["count"], 1.0);
}
