// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bit-exact wire codec: PDU framing, the 64-byte command capsule, SGL
//! descriptors, completion parsing, status decoding, and the data
//! structure parsers (Identify, Discovery, ANA, Reservation, Changed
//! Namespace List, Async Event).
//!
//! Every function here is a stateless transform over byte buffers; none
//! of them perform I/O or retain borrows across calls.

pub mod admin;
pub mod ana;
pub mod async_event;
pub mod capsule;
pub mod caps;
pub mod changed_ns;
pub mod cqe;
pub mod discovery;
pub mod fabric;
pub mod identify;
pub mod nvm;
pub mod pdu;
pub mod r2t;
pub mod reservation;
pub mod status;
