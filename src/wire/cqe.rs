// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The 16-byte NVMe Completion Queue Entry carried as the payload of an
//! RSP PDU: `{DW0, DW1, SQHEAD, SQID, CID, STATUS}`.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    error::{NvmeError, Result},
    wire::status,
};

pub const CQE_LEN: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawCqe {
    dw0: [u8; 4],
    dw1: [u8; 4],
    sq_head: [u8; 2],
    sq_id: [u8; 2],
    cid: [u8; 2],
    status: [u8; 2],
}

/// A decoded completion queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cqe {
    pub dw0: u32,
    pub dw1: u32,
    pub sq_head: u16,
    pub sq_id: u16,
    pub cid: u16,
    pub status_field: u16,
}

impl Cqe {
    /// Parses a 16-byte buffer into a [`Cqe`].
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CQE_LEN {
            return Err(NvmeError::protocol(format!(
                "CQE must be {CQE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let raw = RawCqe::read_from_bytes(bytes)
            .map_err(|e| NvmeError::protocol(format!("malformed CQE: {e}")))?;
        Ok(Cqe {
            dw0: u32::from_le_bytes(raw.dw0),
            dw1: u32::from_le_bytes(raw.dw1),
            sq_head: u16::from_le_bytes(raw.sq_head),
            sq_id: u16::from_le_bytes(raw.sq_id),
            cid: u16::from_le_bytes(raw.cid),
            status_field: u16::from_le_bytes(raw.status),
        })
    }

    /// The 10-bit status code (SC:SCT, bits 10:1 of the STATUS field).
    pub fn status_code(&self) -> u16 {
        (self.status_field >> 1) & 0x3FF
    }

    pub fn is_error(&self) -> bool {
        status::is_error(self.status_field)
    }

    pub fn sct_sc(&self) -> (u8, u8) {
        status::split_status(self.status_field)
    }

    pub fn description(&self) -> &'static str {
        let (sct, sc) = self.sct_sc();
        status::decode_status(sct, sc)
    }

    /// Verifies the CID matches what was sent, and raises a typed
    /// [`NvmeError::Command`] if the status code is non-zero.
    pub fn into_result(self, expected_cid: u16) -> Result<Self> {
        if self.cid != expected_cid {
            return Err(NvmeError::protocol(format!(
                "completion CID mismatch: expected {expected_cid}, got {}",
                self.cid
            )));
        }
        if self.is_error() {
            return Err(NvmeError::Command {
                status: self.status_code(),
                description: self.description(),
                cid: self.cid,
            });
        }
        Ok(self)
    }

    /// Synthesizes a status=0 completion for the early-close
    /// accommodation (§4.4 tie-breaks), scoped by callers to
    /// Identify/Log/Report/Read.
    pub fn synthesize_success(cid: u16) -> Self {
        Cqe { dw0: 0, dw1: 0, sq_head: 0, sq_id: 0, cid, status_field: 0 }
    }
}
