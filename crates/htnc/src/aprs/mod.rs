// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! APRS info-field handling.
//!
//! [`encode`] builds position, object and message info fields for the
//! beacon subsystem; [`info`] goes the other way, classifying received
//! info fields and pulling out positions for the heard-stations table,
//! the filter language and the activity log. Neither side tries to be a
//! full APRS parser; they cover the formats this engine originates and
//! the ones its policy decisions depend on.

pub mod encode;
pub mod info;

pub use encode::{encode_message, ObjectReport, PositionReport};
pub use info::{classify, position_of, PacketType};
