// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Digipeaters: store-and-forward relays that rewrite the path and
//! retransmit.
//!
//! The [`aprs`] digipeater implements the WIDEn-N "New n-N paradigm"
//! with alias substitution, preemption and a duplicate-suppression
//! window. The [`connected`] digipeater is the much simpler relay for
//! connected-mode traffic, where the link layer above owns all
//! retransmission logic.

pub mod aprs;
pub mod connected;

pub use aprs::{AprsDigiConfig, AprsDigipeater, Preempt};
pub use connected::{ConnDigiConfig, ConnDigipeater};

use crate::Chan;

/// One enabled (receive channel, transmit channel) pair with an
/// optional filter expression.
#[derive(Debug, Clone)]
pub struct DigiRoute {
    pub from: Chan,
    pub to: Chan,
    pub filter: Option<String>,
}
