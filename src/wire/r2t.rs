// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! R2T PDU parsing and H2CData PDU building for the write flow engine.
//!
//! Grounded on `original_source/client.py`'s `_handle_r2t_and_send_data`
//! / `_send_h2c_data_pdu`.

use crate::{
    error::{NvmeError, Result},
    wire::pdu::{PDU_HEADER_LEN, PduFlags, PduHeader, PduType},
};

/// Length of the R2T PSH (command_id, ttag, offset, length), following
/// the 8-byte common header.
pub const R2T_PSH_LEN: usize = 16;

/// A parsed R2T PDU: `{command_id, ttag, r2t_offset, r2t_length}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R2t {
    pub command_id: u16,
    pub ttag: u16,
    pub r2t_offset: u32,
    pub r2t_length: u32,
}

impl R2t {
    /// Parses an R2T PDU's payload (everything after the common header).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < R2T_PSH_LEN {
            return Err(NvmeError::protocol(format!(
                "R2T PDU too short: {} bytes, need {R2T_PSH_LEN}",
                payload.len()
            )));
        }
        let command_id = u16::from_le_bytes([payload[0], payload[1]]);
        let ttag = u16::from_le_bytes([payload[2], payload[3]]);
        let r2t_offset = u32::from_le_bytes(payload[4..8].try_into().expect("4 bytes"));
        let r2t_length = u32::from_le_bytes(payload[8..12].try_into().expect("4 bytes"));
        if r2t_length == 0 {
            return Err(NvmeError::protocol("R2T length is zero"));
        }
        Ok(R2t { command_id, ttag, r2t_offset, r2t_length })
    }
}

/// Builds an H2CData PDU's header plus PSH for one chunk. PSH carries
/// `{CCCID, TTAG, DATAO, DATAL}`; `LAST` is set in the returned header
/// when `last` is true.
pub fn build_h2c_data_pdu(command_id: u16, ttag: u16, data_offset: u32, chunk_len: u32, last: bool) -> Vec<u8> {
    let psh_len = R2T_PSH_LEN as u8;
    let hlen = PDU_HEADER_LEN as u8 + psh_len;
    let plen = hlen as u32 + chunk_len;
    let flags = if last { PduFlags::LAST_PDU } else { PduFlags::empty() };
    let header = PduHeader::new(PduType::H2cData, flags, hlen, hlen, plen);

    let mut out = Vec::with_capacity(plen as usize);
    out.extend_from_slice(&header.pack());
    out.extend_from_slice(&command_id.to_le_bytes());
    out.extend_from_slice(&ttag.to_le_bytes());
    out.extend_from_slice(&data_offset.to_le_bytes());
    out.extend_from_slice(&chunk_len.to_le_bytes());
    out
}
