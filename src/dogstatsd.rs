// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The ingress: a single task owns the UDP socket and the aggregator
//! it feeds, interleaving datagram receipt with a flush tick and
//! graceful shutdown via `tokio::select!`, mirroring the teacher's
//! `DogStatsD`/`.spin()` shape (confirmed by `tests/integration_test.rs`
//! and `main.rs`, since the module itself ships only as a binary in
//! the retrieved source).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::clock;
use crate::config::AggregatorConfig;
use crate::constants;
use crate::errors::DropCounters;
use crate::flusher::{Flusher, FlusherConfig};
use crate::parser;
use crate::sink::Sink;

pub struct DogStatsDConfig {
    pub host: String,
    pub port: u16,
}

pub struct DogStatsD {
    socket: UdpSocket,
    aggregator: Arc<Mutex<Aggregator>>,
    aggregator_config: AggregatorConfig,
    drops: Arc<DropCounters>,
    flusher: Flusher,
    cancel_token: CancellationToken,
}

impl DogStatsD {
    /// Binds the UDP socket. Panics if the address can't be bound,
    /// same as the teacher's `main.rs` treats ingress setup as fatal
    /// to the process.
    pub async fn new(
        config: &DogStatsDConfig,
        aggregator: Arc<Mutex<Aggregator>>,
        aggregator_config: AggregatorConfig,
        drops: Arc<DropCounters>,
        sink: Arc<dyn Sink>,
        cancel_token: CancellationToken,
    ) -> Self {
        let addr = format!("{}:{}", config.host, config.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .unwrap_or_else(|err| panic!("failed to bind udp socket on {addr}: {err}"));
        info!(%addr, "dogstatsd ingress bound");
        let flusher = Flusher::new(FlusherConfig {
            aggregator: Arc::clone(&aggregator),
            sink,
        });
        DogStatsD {
            socket,
            aggregator,
            aggregator_config,
            drops,
            flusher,
            cancel_token,
        }
    }

    /// The address the ingress socket bound to; useful for tests that
    /// bind to port 0 and need to discover the actual port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs until cancelled, then flushes once more and returns.
    pub async fn spin(mut self) {
        let mut buf = vec![0u8; constants::MAX_DATAGRAM_BYTES];
        let mut ticker = tokio::time::interval(self.aggregator_config.flush_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!("dogstatsd ingress shutting down, draining final flush");
                    self.flusher.flush().await;
                    break;
                }
                _ = ticker.tick() => {
                    self.flusher.flush().await;
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, _from)) => self.handle_datagram(&buf[..len]),
                        Err(err) => warn!("udp recv error: {err}"),
                    }
                }
            }
        }
    }

    fn handle_datagram(&self, bytes: &[u8]) {
        if !bytes.is_ascii() {
            self.drops.decode_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // `is_ascii` already guarantees valid UTF-8, so this never panics.
        let text = std::str::from_utf8(bytes).expect("ascii bytes are valid utf-8");
        let recv_ts = clock::now_secs();
        let mut aggregator = self.aggregator.lock().expect("lock poisoned");
        for line in text.split('\n') {
            match parser::parse_line(line, recv_ts, &self.aggregator_config, &self.drops) {
                Ok(Some(parsed)) => aggregator.insert_line(parsed, recv_ts),
                Ok(None) => {}
                Err(err) => {
                    self.drops.record_parse_error(&err);
                    debug!("dropped line: {err}");
                }
            }
        }
    }
}
