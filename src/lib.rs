// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod constants;
pub mod dogstatsd;
pub mod errors;
pub mod flusher;
pub mod histogram;
pub mod key;
pub mod outbound;
pub mod parser;
pub mod sample;
pub mod sink;
