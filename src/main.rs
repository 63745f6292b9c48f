// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use statsd_aggregator::aggregator::Aggregator;
use statsd_aggregator::config::AggregatorConfig;
use statsd_aggregator::dogstatsd::{DogStatsD, DogStatsDConfig};
use statsd_aggregator::errors::DropCounters;
use statsd_aggregator::outbound::OutboundBuffer;
use statsd_aggregator::sample::OutgoingSample;
use statsd_aggregator::sink::{ChannelSink, Sink};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let aggregator_config = AggregatorConfig::default();
    let drops = Arc::new(DropCounters::default());
    let aggregator = Arc::new(Mutex::new(
        Aggregator::new(aggregator_config.clone(), None, Arc::clone(&drops))
            .expect("failed to create aggregator"),
    ));

    let outbound = Arc::new(OutboundBuffer::new(aggregator_config.outbound_high_water_mark));
    let sink: Arc<dyn Sink> = Arc::new(ChannelSink::new(Arc::clone(&outbound), Arc::clone(&drops)));

    let cancel_token = CancellationToken::new();
    let dogstatsd_config = DogStatsDConfig {
        host: "0.0.0.0".to_string(),
        port: 8125,
    };
    let dogstatsd = DogStatsD::new(
        &dogstatsd_config,
        Arc::clone(&aggregator),
        aggregator_config,
        Arc::clone(&drops),
        sink,
        cancel_token.clone(),
    )
    .await;

    let ingress = tokio::spawn(dogstatsd.spin());
    let drain = tokio::spawn(drain_outbound(outbound, cancel_token.clone()));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    info!("shutdown requested, draining in-flight state");
    cancel_token.cancel();

    let _ = ingress.await;
    let _ = drain.await;

    let drop_counts = drops.snapshot();
    info!(?drop_counts, "final drop counters");
}

/// The spec stops at the `Sink` boundary (shipping samples onward is
/// an external concern), so the bundled binary just logs what a real
/// sink would have shipped. Runs as a sibling task, draining the same
/// bounded queue the ingress task's flusher pushes into.
async fn drain_outbound(
    outbound: Arc<OutboundBuffer<Vec<OutgoingSample>>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                while let Some(batch) = outbound.try_pop() {
                    info!(batch_len = batch.len(), "draining outbound batch on shutdown");
                }
                break;
            }
            batch = outbound.pop() => {
                info!(batch_len = batch.len(), "shipped batch");
            }
        }
    }
}
