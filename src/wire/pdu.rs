// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NVMe-oF TCP PDU common header: packing, unpacking, and the PDU
//! framer's `receive_pdu` operation.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{NvmeError, Result};

/// Size in bytes of the PDU common header.
pub const PDU_HEADER_LEN: usize = 8;

/// PDU type byte values used by this client (NVMe-oF TCP transport
/// specification, Figure "PDU Type Field").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    IcReq = 0x00,
    IcResp = 0x01,
    H2cTerm = 0x02,
    C2hTerm = 0x03,
    Cmd = 0x04,
    Rsp = 0x05,
    H2cData = 0x06,
    C2hData = 0x07,
    R2t = 0x09,
}

impl TryFrom<u8> for PduType {
    type Error = NvmeError;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0x00 => PduType::IcReq,
            0x01 => PduType::IcResp,
            0x02 => PduType::H2cTerm,
            0x03 => PduType::C2hTerm,
            0x04 => PduType::Cmd,
            0x05 => PduType::Rsp,
            0x06 => PduType::H2cData,
            0x07 => PduType::C2hData,
            0x09 => PduType::R2t,
            other => {
                return Err(NvmeError::protocol(format!(
                    "unknown PDU type 0x{other:02x}"
                )));
            }
        })
    }
}

bitflags! {
    /// Flag bits shared by the PDU common header. Which bits are
    /// meaningful depends on the PDU type: bit 2 and bit 3 carry LAST_PDU
    /// and SUCCESS on C2HData, and bit 2 carries LAST on H2CData.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PduFlags: u8 {
        const LAST_PDU = 0b0000_0100;
        const SUCCESS  = 0b0000_1000;
    }
}

/// The 8-byte PDU common header: `{pdu_type, flags, hlen, pdo, plen u24-LE,
/// rsvd}`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PduHeader {
    pub pdu_type: u8,
    pub flags: u8,
    pub hlen: u8,
    pub pdo: u8,
    plen: [u8; 3],
    rsvd: u8,
}

impl PduHeader {
    pub fn new(pdu_type: PduType, flags: PduFlags, hlen: u8, pdo: u8, plen: u32) -> Self {
        let mut h = PduHeader {
            pdu_type: pdu_type as u8,
            flags: flags.bits(),
            hlen,
            pdo,
            plen: [0; 3],
            rsvd: 0,
        };
        h.set_plen(plen);
        h
    }

    pub fn plen(&self) -> u32 {
        u32::from_le_bytes([self.plen[0], self.plen[1], self.plen[2], 0])
    }

    pub fn set_plen(&mut self, v: u32) {
        let b = v.to_le_bytes();
        self.plen = [b[0], b[1], b[2]];
    }

    pub fn pdu_flags(&self) -> PduFlags {
        PduFlags::from_bits_truncate(self.flags)
    }

    pub fn pack(&self) -> [u8; PDU_HEADER_LEN] {
        let mut out = [0u8; PDU_HEADER_LEN];
        out.copy_from_slice(self.as_bytes());
        out
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PDU_HEADER_LEN {
            return Err(NvmeError::protocol(format!(
                "PDU header must be {PDU_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().all(|&b| b == 0) {
            return Err(NvmeError::protocol("all-zero PDU header (peer closed)"));
        }
        PduHeader::read_from_bytes(bytes)
            .map_err(|e| NvmeError::protocol(format!("malformed PDU header: {e}")))
    }

    /// Validates `hlen <= plen`, and for C2HData that `pdo >= hlen`.
    pub fn validate(&self) -> Result<()> {
        if self.hlen as u32 > self.plen() {
            return Err(NvmeError::protocol(format!(
                "hlen {} exceeds plen {}",
                self.hlen,
                self.plen()
            )));
        }
        if self.pdu_type == PduType::C2hData as u8 && (self.pdo as u32) < self.hlen as u32 {
            return Err(NvmeError::protocol(format!(
                "C2HData pdo {} < hlen {}",
                self.pdo, self.hlen
            )));
        }
        Ok(())
    }
}

/// A fully received PDU: its header plus the payload the framer decided
/// to return for that PDU type.
///
/// For C2HData, `payload` is the data slice `[hlen, plen)`; the extended
/// header bytes `[8, hlen)` are consumed and discarded by the framer, but
/// the header's `flags`/`pdo` remain available on `header`.
#[derive(Debug, Clone)]
pub struct RawPdu {
    pub header: PduHeader,
    pub payload: bytes::Bytes,
}

/// Reads one complete PDU from an async byte stream: the 8-byte common
/// header, then `plen - 8` further bytes split per §4.2 of the wire
/// protocol (ICReq/ICResp return their full 120-byte extended header as
/// payload; C2HData discards its extended header and returns only the
/// data slice; everything else returns `plen - hlen` bytes as-is).
pub async fn receive_pdu<R>(reader: &mut R) -> Result<RawPdu>
where R: tokio::io::AsyncReadExt + Unpin {
    use tokio::io::AsyncReadExt as _;

    let mut hdr_buf = [0u8; PDU_HEADER_LEN];
    reader.read_exact(&mut hdr_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NvmeError::Transport(e)
        } else {
            NvmeError::Transport(e)
        }
    })?;

    let header = PduHeader::unpack(&hdr_buf)?;
    header.validate()?;

    let pdu_type = PduType::try_from(header.pdu_type)?;
    let plen = header.plen();
    let hlen = header.hlen as u32;

    let payload = match pdu_type {
        PduType::IcReq | PduType::IcResp if hlen == plen && plen == 128 => {
            let remaining = plen - PDU_HEADER_LEN as u32;
            read_n(reader, remaining as usize).await?
        }
        PduType::C2hData => {
            let ext_header_len = hlen.saturating_sub(PDU_HEADER_LEN as u32);
            if ext_header_len > 0 {
                let _discarded = read_n(reader, ext_header_len as usize).await?;
            }
            let data_len = plen.saturating_sub(hlen);
            read_n(reader, data_len as usize).await?
        }
        _ => {
            let remaining = plen.saturating_sub(hlen);
            read_n(reader, remaining as usize).await?
        }
    };

    Ok(RawPdu { header, payload })
}

async fn read_n<R>(reader: &mut R, n: usize) -> Result<bytes::Bytes>
where R: tokio::io::AsyncReadExt + Unpin {
    use tokio::io::AsyncReadExt as _;

    if n == 0 {
        return Ok(bytes::Bytes::new());
    }
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf).await.map_err(NvmeError::Transport)?;
    Ok(bytes::Bytes::from(buf))
}
