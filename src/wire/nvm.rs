// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NVM command set encodings: Read, Write, Compare, Write Zeroes, Write
//! Uncorrectable, Flush.
//!
//! Grounded on `original_source/protocol/io_commands.py`, including its
//! NLB convention asymmetry: Read/Write/Compare take a 1-based
//! `block_count` and encode `NLB = block_count - 1`, while Write
//! Zeroes/Write Uncorrectable take an already-0-based `block_count` and
//! encode it directly as NLB.

use crate::wire::capsule::{CapsuleBuilder, NvmOpcode, SglVariant};

fn cdw10_11_lba(lba: u64) -> (u32, u32) {
    let b = lba.to_le_bytes();
    (
        u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
    )
}

/// Builds a Read capsule for `block_count` (1-based) blocks starting at
/// `lba`, expecting `block_count * block_size` bytes of C2H data.
pub fn build_read_capsule(command_id: u16, nsid: u32, lba: u64, block_count: u32, block_size: u32) -> [u8; 64] {
    let (cdw10, cdw11) = cdw10_11_lba(lba);
    let nlb = block_count.saturating_sub(1);
    CapsuleBuilder::new(NvmOpcode::Read, command_id, nsid)
        .sgl(SglVariant::C2hData, block_count * block_size)
        .cdw(0, cdw10)
        .cdw(1, cdw11)
        .cdw(2, nlb & 0xFFFF)
        .build()
}

/// Builds a Write capsule. `inline` selects the SGL variant: `DataOut`
/// for inline data, `TransportR2t` for an R2T-driven large write (no
/// data-out length in the capsule SGL in that case).
pub fn build_write_capsule(
    command_id: u16,
    nsid: u32,
    lba: u64,
    block_count: u32,
    data_len: u32,
    inline: bool,
) -> [u8; 64] {
    let (cdw10, cdw11) = cdw10_11_lba(lba);
    let nlb = block_count.saturating_sub(1);
    let (variant, sgl_len) = if inline { (SglVariant::DataOut, data_len) } else { (SglVariant::TransportR2t, 0) };
    CapsuleBuilder::new(NvmOpcode::Write, command_id, nsid)
        .sgl(variant, sgl_len)
        .cdw(0, cdw10)
        .cdw(1, cdw11)
        .cdw(2, nlb & 0xFFFF)
        .build()
}

/// Builds a Compare capsule with inline data-out of `data_len =
/// (block_count+1) * block_size`.
pub fn build_compare_capsule(command_id: u16, nsid: u32, lba: u64, block_count: u32, data_len: u32) -> [u8; 64] {
    let (cdw10, cdw11) = cdw10_11_lba(lba);
    let nlb = block_count.saturating_sub(1);
    CapsuleBuilder::new(NvmOpcode::Compare, command_id, nsid)
        .sgl(SglVariant::DataOut, data_len)
        .cdw(0, cdw10)
        .cdw(1, cdw11)
        .cdw(2, nlb & 0xFFFF)
        .build()
}

/// Builds a Write Zeroes capsule. `block_count` is already 0-based NLB
/// per `original_source/protocol/io_commands.py`.
pub fn build_write_zeroes_capsule(command_id: u16, nsid: u32, lba: u64, nlb: u32) -> [u8; 64] {
    let (cdw10, cdw11) = cdw10_11_lba(lba);
    CapsuleBuilder::new(NvmOpcode::WriteZeroes, command_id, nsid)
        .cdw(0, cdw10)
        .cdw(1, cdw11)
        .cdw(2, nlb & 0xFFFF)
        .build()
}

/// Builds a Write Uncorrectable capsule. `block_count` is already
/// 0-based NLB.
pub fn build_write_uncorrectable_capsule(command_id: u16, nsid: u32, lba: u64, nlb: u32) -> [u8; 64] {
    let (cdw10, cdw11) = cdw10_11_lba(lba);
    CapsuleBuilder::new(NvmOpcode::WriteUncorrectable, command_id, nsid)
        .cdw(0, cdw10)
        .cdw(1, cdw11)
        .cdw(2, nlb & 0xFFFF)
        .build()
}

/// Builds a Flush capsule: all zero after NSID.
pub fn build_flush_capsule(command_id: u16, nsid: u32) -> [u8; 64] {
    CapsuleBuilder::new(NvmOpcode::Flush, command_id, nsid).build()
}

/// Status code signaling a Compare mismatch (distilled §4.5.2).
pub const COMPARE_FAILURE_STATUS: u16 = 0x85;
