// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Reservation Register/Acquire/Release/Report command encodings and the
//! Reservation Status/Registered Controller data structure parsers.
//!
//! Grounded on `original_source/protocol/io_commands.py` (encodings) and
//! `original_source/parsers/reservation.py` (`_parse_header`,
//! `_parse_standard_registrants`, `_parse_extended_registrants`).

use crate::{
    error::{NvmeError, Result},
    wire::capsule::{CapsuleBuilder, NvmOpcode, SglVariant},
};

pub const RESERVATION_STATUS_HEADER_LEN: usize = 24;
pub const STANDARD_REGISTRANT_LEN: usize = 24;
pub const EXTENDED_REGISTRANT_LEN: usize = 64;
/// Reserved padding before registrants start in the extended (EDS=1)
/// format: header (24) + 40 reserved bytes = registrants at byte 64.
const EXTENDED_RESERVED_LEN: usize = 40;

/// `RREGA` values for Reservation Register's CDW10 bits 2:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReservationRegisterAction {
    Register = 0,
    Unregister = 1,
    Replace = 2,
}

/// `RACQA`/`RRELA` values for Acquire/Release CDW10 bits 2:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReservationAcquireAction {
    Acquire = 0,
    Preempt = 1,
    PreemptAndAbort = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReservationReleaseAction {
    Release = 0,
    Clear = 1,
}

/// `RTYPE` reservation type values (Acquire/Release CDW10 byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReservationType {
    WriteExclusive = 1,
    ExclusiveAccess = 2,
    WriteExclusiveRegistrantsOnly = 3,
    ExclusiveAccessRegistrantsOnly = 4,
    WriteExclusiveAllRegistrants = 5,
    ExclusiveAccessAllRegistrants = 6,
}

/// Builds a Reservation Register capsule: `CDW10 = RREGA(2:0) |
/// (IEKEY<<3) | (CPTPL<<30)`. Data-out carries CRKEY (bytes 0..8) and
/// NRKEY (bytes 8..16).
pub fn build_reservation_register_capsule(
    command_id: u16,
    nsid: u32,
    action: ReservationRegisterAction,
    ignore_existing_key: bool,
    current_key: u64,
    new_key: u64,
) -> ([u8; 64], [u8; 16]) {
    let cdw10 = (action as u32) | ((ignore_existing_key as u32) << 3);
    let capsule = CapsuleBuilder::new(NvmOpcode::ReservationRegister, command_id, nsid)
        .sgl(SglVariant::DataOut, 16)
        .cdw(0, cdw10)
        .build();
    let mut data = [0u8; 16];
    data[0..8].copy_from_slice(&current_key.to_le_bytes());
    data[8..16].copy_from_slice(&new_key.to_le_bytes());
    (capsule, data)
}

/// Builds a Reservation Acquire capsule: `CDW10 = RACQA(2:0) |
/// (RTYPE<<8)`. Data-out (16B) carries CRKEY (0..8) and PRKEY (8..16).
pub fn build_reservation_acquire_capsule(
    command_id: u16,
    nsid: u32,
    action: ReservationAcquireAction,
    reservation_type: ReservationType,
    current_key: u64,
    preempt_key: u64,
) -> ([u8; 64], [u8; 16]) {
    let cdw10 = (action as u32) | ((reservation_type as u32) << 8);
    let capsule = CapsuleBuilder::new(NvmOpcode::ReservationAcquire, command_id, nsid)
        .sgl(SglVariant::DataOut, 16)
        .cdw(0, cdw10)
        .build();
    let mut data = [0u8; 16];
    data[0..8].copy_from_slice(&current_key.to_le_bytes());
    data[8..16].copy_from_slice(&preempt_key.to_le_bytes());
    (capsule, data)
}

/// Builds a Reservation Release capsule: `CDW10 = RRELA(2:0) |
/// (RTYPE<<8)`. Data-out (8B) carries CRKEY.
pub fn build_reservation_release_capsule(
    command_id: u16,
    nsid: u32,
    action: ReservationReleaseAction,
    reservation_type: ReservationType,
    current_key: u64,
) -> ([u8; 64], [u8; 8]) {
    let cdw10 = (action as u32) | ((reservation_type as u32) << 8);
    let capsule = CapsuleBuilder::new(NvmOpcode::ReservationRelease, command_id, nsid)
        .sgl(SglVariant::DataOut, 8)
        .cdw(0, cdw10)
        .build();
    (capsule, current_key.to_le_bytes())
}

/// Builds a Reservation Report capsule: `CDW10 = (bytes/4 - 1)`; `CDW11`
/// bit 0 = EDS.
pub fn build_reservation_report_capsule(command_id: u16, nsid: u32, data_len_bytes: u32, eds: bool) -> [u8; 64] {
    CapsuleBuilder::new(NvmOpcode::ReservationReport, command_id, nsid)
        .sgl(SglVariant::C2hData, data_len_bytes)
        .cdw(0, (data_len_bytes / 4).saturating_sub(1))
        .cdw(1, eds as u32)
        .build()
}

/// One Registered Controller Data Structure entry, unified across the
/// standard (24 B, 64-bit host ID) and extended (64 B, 128-bit host ID)
/// layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationRegistrant {
    pub controller_id: u16,
    pub holds_reservation: bool,
    pub reservation_key: u64,
    pub host_identifier: u128,
}

/// Parsed Reservation Status (Report) data structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationStatus {
    pub generation: u32,
    pub reservation_type: u8,
    pub persist_through_power_loss: bool,
    pub registrants: Vec<ReservationRegistrant>,
}

impl ReservationStatus {
    /// The controller ID currently holding the reservation, if any.
    pub fn reservation_holder(&self) -> Option<u16> {
        self.registrants.iter().find(|r| r.holds_reservation).map(|r| r.controller_id)
    }

    /// The set of registered reservation keys.
    pub fn reservation_keys(&self) -> Vec<u64> {
        self.registrants.iter().map(|r| r.reservation_key).collect()
    }

    /// Parses a Reservation Report buffer; `eds` selects the extended
    /// (128-bit host ID, 64-byte entries) vs standard (64-bit host ID,
    /// 24-byte entries) registrant layout.
    pub fn parse(data: &[u8], eds: bool) -> Result<Self> {
        if data.len() < RESERVATION_STATUS_HEADER_LEN {
            return Err(NvmeError::protocol(format!(
                "Reservation status header must be at least {RESERVATION_STATUS_HEADER_LEN} bytes, got {}",
                data.len()
            )));
        }
        let generation = u32::from_le_bytes(data[0..4].try_into().expect("4 bytes"));
        let reservation_type = data[4];
        let num_registered = u16::from_le_bytes([data[5], data[6]]) as usize;
        let persist_through_power_loss = data[9] & 0x1 != 0;

        let registrants = if eds {
            let start = RESERVATION_STATUS_HEADER_LEN + EXTENDED_RESERVED_LEN;
            parse_extended_registrants(data.get(start..).unwrap_or(&[]), num_registered)
        } else {
            let start = RESERVATION_STATUS_HEADER_LEN;
            parse_standard_registrants(data.get(start..).unwrap_or(&[]), num_registered)
        };

        Ok(ReservationStatus { generation, reservation_type, persist_through_power_loss, registrants })
    }
}

fn parse_standard_registrants(data: &[u8], max_entries: usize) -> Vec<ReservationRegistrant> {
    let mut out = Vec::new();
    for i in 0..max_entries {
        let off = i * STANDARD_REGISTRANT_LEN;
        if off + STANDARD_REGISTRANT_LEN > data.len() {
            break;
        }
        let entry = &data[off..off + STANDARD_REGISTRANT_LEN];
        let controller_id = u16::from_le_bytes([entry[0], entry[1]]);
        if controller_id == 0 {
            continue;
        }
        let holds_reservation = entry[2] & 0x1 != 0;
        let host_identifier = u64::from_le_bytes(entry[8..16].try_into().expect("8 bytes")) as u128;
        let reservation_key = u64::from_le_bytes(entry[16..24].try_into().expect("8 bytes"));
        out.push(ReservationRegistrant { controller_id, holds_reservation, reservation_key, host_identifier });
    }
    out
}

fn parse_extended_registrants(data: &[u8], max_entries: usize) -> Vec<ReservationRegistrant> {
    let mut out = Vec::new();
    for i in 0..max_entries {
        let off = i * EXTENDED_REGISTRANT_LEN;
        if off + EXTENDED_REGISTRANT_LEN > data.len() {
            break;
        }
        let entry = &data[off..off + EXTENDED_REGISTRANT_LEN];
        let controller_id = u16::from_le_bytes([entry[0], entry[1]]);
        if controller_id == 0 {
            continue;
        }
        let holds_reservation = entry[2] & 0x1 != 0;
        let reservation_key = u64::from_le_bytes(entry[8..16].try_into().expect("8 bytes"));
        let host_identifier = u128::from_le_bytes(entry[16..32].try_into().expect("16 bytes"));
        out.push(ReservationRegistrant { controller_id, holds_reservation, reservation_key, host_identifier });
    }
    out
}
