// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Admin command encodings that don't have a dedicated submodule: Get
//! Log Page, Set/Get Features, Keep Alive, Async Event Request.

use crate::wire::capsule::{AdminOpcode, CapsuleBuilder, SglVariant};

/// Well-known Log Page Identifiers used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogPageId {
    ChangedNamespaceList = 0x04,
    AsymmetricNamespaceAccess = 0x0C,
    Discovery = 0x70,
}

/// Builds a Get Log Page capsule: `CDW10 = LID | ((NUMDL-1) << 16)` with
/// `NUMDL = bytes/4`; `CDW11` carries the NUMDU upper half (always 0 for
/// the log sizes this client requests).
pub fn build_get_log_page_capsule(
    command_id: u16,
    nsid: u32,
    lid: u8,
    data_len_bytes: u32,
) -> [u8; 64] {
    let numdl = data_len_bytes / 4;
    let cdw10 = (lid as u32) | (numdl.saturating_sub(1) << 16);
    CapsuleBuilder::new(AdminOpcode::GetLogPage, command_id, nsid)
        .sgl(SglVariant::C2hData, data_len_bytes)
        .cdw(0, cdw10)
        .cdw(1, 0)
        .build()
}

/// Builds a Set Features capsule: `CDW10 = FID | (SV<<31)`, `CDW11 =
/// value`.
pub fn build_set_features_capsule(command_id: u16, nsid: u32, feature_id: u8, value: u32, save: bool) -> [u8; 64] {
    let cdw10 = (feature_id as u32) | ((save as u32) << 31);
    CapsuleBuilder::new(AdminOpcode::SetFeatures, command_id, nsid)
        .cdw(0, cdw10)
        .cdw(1, value)
        .build()
}

/// Builds a Get Features capsule: `CDW10 = FID`.
pub fn build_get_features_capsule(command_id: u16, nsid: u32, feature_id: u8) -> [u8; 64] {
    CapsuleBuilder::new(AdminOpcode::GetFeatures, command_id, nsid)
        .cdw(0, feature_id as u32)
        .build()
}

/// Builds a Keep Alive capsule: all zero after the header.
pub fn build_keep_alive_capsule(command_id: u16) -> [u8; 64] {
    CapsuleBuilder::new(AdminOpcode::KeepAlive, command_id, 0).build()
}

/// Builds an Async Event Request capsule: all zero after the header.
pub fn build_async_event_request_capsule(command_id: u16) -> [u8; 64] {
    CapsuleBuilder::new(AdminOpcode::AsyncEventRequest, command_id, 0).build()
}

/// Feature Identifier for Async Event Configuration.
pub const FEATURE_ID_ASYNC_EVENT_CONFIGURATION: u8 = 0x0B;
