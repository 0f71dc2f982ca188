// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! ICReq/ICResp transport handshake, Fabric Connect data, and the
//! Connect/Property-Get/Property-Set fabric commands.

use crate::{
    error::{NvmeError, Result},
    wire::capsule::{CapsuleBuilder, FabricOpcode, SglVariant},
};

/// Length of the extended header following the 8-byte PDU common header
/// for both ICReq and ICResp (full PDU is 128 bytes).
pub const IC_EXTENDED_HEADER_LEN: usize = 120;

/// Fabric command type byte, packed into CDW1 byte 0 (capsule offset 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FabricCommandType {
    PropertySet = 0x00,
    Connect = 0x01,
    PropertyGet = 0x04,
}

/// Builds the 120-byte ICReq body. This client sends an all-zero body
/// (distilled §4.1 permits this and no testable property depends on
/// nonzero ICReq fields).
pub fn build_icreq() -> [u8; IC_EXTENDED_HEADER_LEN] {
    [0u8; IC_EXTENDED_HEADER_LEN]
}

/// Negotiated parameters read back from ICResp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub pfv: u16,
    pub cpda: u8,
    pub digest: u8,
    pub maxh2cdata: u32,
}

/// Parses the 120-byte ICResp body: `PFV(2)·CPDA(1)·digest(1)·MAXH2CDATA(4)`.
/// Fails if `PFV != 0x0000`.
pub fn parse_icresp(body: &[u8]) -> Result<ConnectionParams> {
    if body.len() < 8 {
        return Err(NvmeError::protocol(format!(
            "ICResp body too short: {} bytes",
            body.len()
        )));
    }
    let pfv = u16::from_le_bytes([body[0], body[1]]);
    let cpda = body[2];
    let digest = body[3];
    let maxh2cdata = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    if pfv != 0x0000 {
        return Err(NvmeError::protocol(format!("ICResp PFV mismatch: 0x{pfv:04x}")));
    }
    Ok(ConnectionParams { pfv, cpda, digest, maxh2cdata })
}

/// Fabric Connect Data (1024 bytes): Host ID (0..16), controller ID
/// (16..18), SUBNQN (256..512), Host NQN (512..768).
pub const FABRIC_CONNECT_DATA_LEN: usize = 1024;

/// Controller ID value sent by the host when connecting the admin queue
/// (the target assigns the real ID at connect time).
pub const ADMIN_CONNECT_CNTLID: u16 = 0xFFFF;

pub fn build_fabric_connect_data(
    host_id: &[u8; 16],
    controller_id: u16,
    subnqn: &str,
    host_nqn: &str,
) -> Result<[u8; FABRIC_CONNECT_DATA_LEN]> {
    if subnqn.len() > 256 {
        return Err(NvmeError::invalid_argument("SUBNQN exceeds 256 bytes"));
    }
    if host_nqn.len() > 256 {
        return Err(NvmeError::invalid_argument("Host NQN exceeds 256 bytes"));
    }
    let mut buf = [0u8; FABRIC_CONNECT_DATA_LEN];
    buf[0..16].copy_from_slice(host_id);
    buf[16..18].copy_from_slice(&controller_id.to_le_bytes());
    buf[256..256 + subnqn.len()].copy_from_slice(subnqn.as_bytes());
    buf[512..512 + host_nqn.len()].copy_from_slice(host_nqn.as_bytes());
    Ok(buf)
}

/// Builds a Fabric Connect command capsule: `CDW10 = (RECFMT=0) |
/// (QID<<16)`, `CDW11 = SQSIZE (queue entries - 1)`.
pub fn build_connect_capsule(command_id: u16, qid: u16, sqsize: u16) -> [u8; 64] {
    let mut c = CapsuleBuilder::new(FabricOpcode::Fabric, command_id, 0)
        .sgl(SglVariant::DataOut, FABRIC_CONNECT_DATA_LEN as u32)
        .cdw(0, (qid as u32) << 16)
        .cdw(1, sqsize as u32)
        .build();
    c[8] = FabricCommandType::Connect as u8;
    c
}

/// Builds a Property Get command capsule: attrib byte selects 4B (00b)
/// vs 8B (01b) access width.
pub fn build_property_get_capsule(command_id: u16, offset: u32, size: u8) -> Result<[u8; 64]> {
    let attrib: u8 = match size {
        4 => 0b00,
        8 => 0b01,
        other => {
            return Err(NvmeError::invalid_argument(format!(
                "property access size must be 4 or 8 bytes, got {other}"
            )));
        }
    };
    let mut c = CapsuleBuilder::new(FabricOpcode::Fabric, command_id, 0)
        .cdw(0, attrib as u32)
        .cdw(1, offset)
        .build();
    c[8] = FabricCommandType::PropertyGet as u8;
    Ok(c)
}

/// Builds a Property Set command capsule: `CDW11 = offset`, `CDW12 =
/// value` (low 32 bits).
pub fn build_property_set_capsule(command_id: u16, offset: u32, value: u32) -> [u8; 64] {
    let mut c = CapsuleBuilder::new(FabricOpcode::Fabric, command_id, 0)
        .cdw(1, offset)
        .cdw(2, value)
        .build();
    c[8] = FabricCommandType::PropertySet as u8;
    c
}

/// Extracts an 8-byte Property Get response value from a CQE's
/// `{dw0, dw1}` pair (used for 8-byte register reads, e.g. CAP).
pub fn property_value_u64(dw0: u32, dw1: u32) -> u64 {
    (dw0 as u64) | ((dw1 as u64) << 32)
}
