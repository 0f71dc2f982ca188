// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-process mock NVMe-oF TCP target used by the scenario tests below.
//!
//! No external NVMe/iSCSI target is available to this crate's test
//! tooling (`SPEC_FULL.md` §2), so these helpers play the target side of
//! the wire protocol over a loopback `TcpListener`, scripted per test to
//! exercise one command-dispatch path end to end.

use anyhow::{Context, Result, bail};
use nvmeof_client_rs::wire::pdu::{PduFlags, PduHeader, PduType};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Binds an ephemeral loopback port and returns it plus the listener.
pub async fn bind() -> Result<(std::net::SocketAddr, TcpListener)> {
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind mock target")?;
    let addr = listener.local_addr().context("local_addr")?;
    Ok((addr, listener))
}

/// Writes one PDU: the 8-byte common header, then (for C2HData only) the
/// `hlen - 8` bytes of PDU-specific header the framer discards before the
/// data, then `payload`. `plen` is set to `hlen + payload.len()`, matching
/// `receive_pdu`'s `data_len = plen - hlen` for C2HData and `remaining =
/// plen - hlen` for every other type this harness emits.
async fn write_pdu(stream: &mut TcpStream, pdu_type: PduType, flags: PduFlags, hlen: u8, pdo: u8, payload: &[u8]) -> Result<()> {
    let header = PduHeader::new(pdu_type, flags, hlen, pdo, hlen as u32 + payload.len() as u32);
    stream.write_all(&header.pack()).await?;
    if pdu_type == PduType::C2hData {
        let ext_header_len = hlen.saturating_sub(8) as usize;
        if ext_header_len > 0 {
            stream.write_all(&vec![0u8; ext_header_len]).await?;
        }
    }
    stream.write_all(payload).await?;
    Ok(())
}

/// Reads and discards a client-sent ICReq (128-byte PDU).
pub async fn read_icreq(stream: &mut TcpStream) -> Result<()> {
    let mut hdr = [0u8; 8];
    stream.read_exact(&mut hdr).await.context("read ICReq header")?;
    let header = PduHeader::unpack(&hdr)?;
    if PduType::try_from(header.pdu_type)? != PduType::IcReq {
        bail!("expected ICReq, got {:?}", header.pdu_type);
    }
    let mut body = vec![0u8; (header.plen() - 8) as usize];
    stream.read_exact(&mut body).await.context("read ICReq body")?;
    Ok(())
}

/// Sends an ICResp advertising `maxh2cdata`. Unlike every other PDU this
/// harness emits, ICResp's `plen` equals its `hlen` (128): the 120-byte
/// body is carried entirely within what the header calls its own length,
/// matching `TransportSession::handshake`'s ICReq encoding.
pub async fn write_icresp(stream: &mut TcpStream, maxh2cdata: u32) -> Result<()> {
    let mut body = [0u8; 120];
    body[4..8].copy_from_slice(&maxh2cdata.to_le_bytes());
    let header = PduHeader::new(PduType::IcResp, PduFlags::empty(), 128, 128, 128);
    stream.write_all(&header.pack()).await?;
    stream.write_all(&body).await?;
    Ok(())
}

/// One client-sent CMD PDU, split into its fixed 64-byte capsule and any
/// inline data-out that followed it.
pub struct ReceivedCommand {
    pub capsule: [u8; 64],
    pub data_out: Vec<u8>,
}

impl ReceivedCommand {
    pub fn command_id(&self) -> u16 {
        u16::from_le_bytes([self.capsule[2], self.capsule[3]])
    }

    pub fn opcode(&self) -> u8 {
        self.capsule[0]
    }
}

/// Reads one CMD PDU (`hlen = pdo = 72`): the 64-byte capsule plus any
/// inline data-out that follows it.
pub async fn read_cmd(stream: &mut TcpStream) -> Result<ReceivedCommand> {
    let mut hdr = [0u8; 8];
    stream.read_exact(&mut hdr).await.context("read CMD header")?;
    let header = PduHeader::unpack(&hdr)?;
    if PduType::try_from(header.pdu_type)? != PduType::Cmd {
        bail!("expected CMD, got {:?}", header.pdu_type);
    }
    let mut capsule = [0u8; 64];
    stream.read_exact(&mut capsule).await.context("read capsule")?;
    let data_len = (header.plen() - header.hlen as u32) as usize;
    let mut data_out = vec![0u8; data_len];
    if data_len > 0 {
        stream.read_exact(&mut data_out).await.context("read data-out")?;
    }
    Ok(ReceivedCommand { capsule, data_out })
}

/// One client-sent H2CData PDU (a single R2T write-flow chunk).
pub struct ReceivedH2cData {
    pub command_id: u16,
    pub ttag: u16,
    pub data_offset: u32,
    pub chunk: Vec<u8>,
    pub last: bool,
}

pub async fn read_h2c_data(stream: &mut TcpStream) -> Result<ReceivedH2cData> {
    let mut hdr = [0u8; 8];
    stream.read_exact(&mut hdr).await.context("read H2CData header")?;
    let header = PduHeader::unpack(&hdr)?;
    if PduType::try_from(header.pdu_type)? != PduType::H2cData {
        bail!("expected H2CData, got {:?}", header.pdu_type);
    }
    let mut psh = [0u8; 16];
    stream.read_exact(&mut psh).await.context("read H2CData PSH")?;
    let command_id = u16::from_le_bytes([psh[0], psh[1]]);
    let ttag = u16::from_le_bytes([psh[2], psh[3]]);
    let data_offset = u32::from_le_bytes(psh[4..8].try_into().expect("4 bytes"));
    let data_len = (header.plen() - header.hlen as u32) as usize;
    let mut chunk = vec![0u8; data_len];
    stream.read_exact(&mut chunk).await.context("read H2CData chunk")?;
    let last = header.pdu_flags().contains(PduFlags::LAST_PDU);
    Ok(ReceivedH2cData { command_id, ttag, data_offset, chunk, last })
}

/// Builds a 16-byte CQE payload: `{dw0, dw1, sq_head=0, sq_id, cid,
/// status_field}`. `status_code` is the 10-bit SC:SCT value (bits 10:1
/// of the on-wire STATUS field); the phase tag bit is always clear.
fn cqe_bytes(cid: u16, dw0: u32, dw1: u32, status_code: u16) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..4].copy_from_slice(&dw0.to_le_bytes());
    buf[4..8].copy_from_slice(&dw1.to_le_bytes());
    // sq_head, sq_id left zero: the dispatcher never inspects them.
    buf[12..14].copy_from_slice(&cid.to_le_bytes());
    buf[14..16].copy_from_slice(&(status_code << 1).to_le_bytes());
    buf
}

/// Sends a RSP PDU carrying a CQE for `cid`.
pub async fn write_rsp(stream: &mut TcpStream, cid: u16, dw0: u32, dw1: u32, status_code: u16) -> Result<()> {
    let payload = cqe_bytes(cid, dw0, dw1, status_code);
    write_pdu(stream, PduType::Rsp, PduFlags::empty(), 8, 8, &payload).await
}

/// Sends a C2HData PDU carrying `data`, with SUCCESS+LAST set (the
/// no-RSP-follows shortcut, distilled §4.4 tie-break #2).
pub async fn write_c2hdata_success(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    write_pdu(stream, PduType::C2hData, PduFlags::LAST_PDU | PduFlags::SUCCESS, 24, 24, data).await
}

/// Sends a C2HData PDU carrying `data` with only LAST_PDU set, meaning a
/// RSP PDU must follow separately.
pub async fn write_c2hdata_then_rsp(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    write_pdu(stream, PduType::C2hData, PduFlags::LAST_PDU, 24, 24, data).await
}

/// Sends a C2HData PDU with caller-chosen flags, for exercising
/// dispatcher tie-break edge cases (e.g. SUCCESS without LAST_PDU).
pub async fn write_c2hdata_flags(stream: &mut TcpStream, flags: PduFlags, data: &[u8]) -> Result<()> {
    write_pdu(stream, PduType::C2hData, flags, 24, 24, data).await
}

/// Sends an R2T PDU: `{command_id, ttag, r2t_offset, r2t_length}`.
pub async fn write_r2t(stream: &mut TcpStream, command_id: u16, ttag: u16, r2t_offset: u32, r2t_length: u32) -> Result<()> {
    let mut psh = [0u8; 16];
    psh[0..2].copy_from_slice(&command_id.to_le_bytes());
    psh[2..4].copy_from_slice(&ttag.to_le_bytes());
    psh[4..8].copy_from_slice(&r2t_offset.to_le_bytes());
    psh[8..12].copy_from_slice(&r2t_length.to_le_bytes());
    write_pdu(stream, PduType::R2t, PduFlags::empty(), 24, 24, &psh).await
}

/// Drives the admin-queue handshake a `ControllerFacade::connect()` call
/// performs: ICReq/ICResp, Fabric Connect (QID=0), CAP read, the
/// controller-enable sequence (CC=disabled, CC=enabled, CSTS poll), and
/// the VS read. Returns the negotiated `controller_id` the client used
/// in its Connect capsule's request (always `0xFFFF` for the admin
/// queue) and the CQE `dw0` this helper assigned as the controller ID.
pub async fn run_admin_connect(stream: &mut TcpStream, maxh2cdata: u32, controller_id: u16, cap: u64, vs: u32) -> Result<()> {
    read_icreq(stream).await?;
    write_icresp(stream, maxh2cdata).await?;

    let connect = read_cmd(stream).await?;
    write_rsp(stream, connect.command_id(), controller_id as u32, 0, 0).await?;

    let cap_get = read_cmd(stream).await?;
    write_rsp(stream, cap_get.command_id(), (cap & 0xFFFF_FFFF) as u32, (cap >> 32) as u32, 0).await?;

    let cc_disable = read_cmd(stream).await?;
    write_rsp(stream, cc_disable.command_id(), 0, 0, 0).await?;

    let cc_enable = read_cmd(stream).await?;
    write_rsp(stream, cc_enable.command_id(), 0, 0, 0).await?;

    let csts_get = read_cmd(stream).await?;
    write_rsp(stream, csts_get.command_id(), 0x1, 0, 0).await?; // CSTS.RDY=1

    let vs_get = read_cmd(stream).await?;
    write_rsp(stream, vs_get.command_id(), vs, 0, 0).await?;

    Ok(())
}

/// Drives the I/O-queue handshake `ensure_io_queue()` performs: ICReq/
/// ICResp then a Fabric Connect (QID=1).
pub async fn run_io_connect(stream: &mut TcpStream, maxh2cdata: u32) -> Result<()> {
    read_icreq(stream).await?;
    write_icresp(stream, maxh2cdata).await?;
    let connect = read_cmd(stream).await?;
    write_rsp(stream, connect.command_id(), 0, 0, 0).await?;
    Ok(())
}

/// Builds a 4096-byte Identify Controller fixture with `serial`,
/// `model`, `aerl`, and `ioccsz` (16-byte units) set at their documented
/// offsets (distilled §8 scenario B).
pub fn identify_controller_fixture(serial: &str, model: &str, aerl: u8, ioccsz: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    buf[4..4 + serial.len()].copy_from_slice(serial.as_bytes());
    buf[24..24 + model.len()].copy_from_slice(model.as_bytes());
    buf[259] = aerl;
    buf[1792..1796].copy_from_slice(&ioccsz.to_le_bytes());
    buf
}

/// Builds a 4096-byte Identify Namespace fixture selecting LBA Format 0
/// with `lbads = log2(block_size)`.
pub fn identify_namespace_fixture(block_size_log2: u8) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    buf[26] = 0; // FLBAS selects LBAF0
    buf[128 + 2] = block_size_log2;
    buf
}

/// Builds a Discovery Log Page fixture: a 16-byte header (`generation`,
/// `num_records`) followed by `num_records` 1024-byte entries.
pub fn discovery_log_fixture(generation: u64, entries: &[(u8, u8, u8, &str, &str, &str)]) -> Vec<u8> {
    let mut buf = vec![0u8; 16 + entries.len() * 1024];
    buf[0..8].copy_from_slice(&generation.to_le_bytes());
    buf[8..16].copy_from_slice(&(entries.len() as u64).to_le_bytes());
    for (i, (trtype, adrfam, subtype, traddr, trsvcid, subnqn)) in entries.iter().enumerate() {
        let off = 16 + i * 1024;
        buf[off] = *trtype;
        buf[off + 1] = *adrfam;
        buf[off + 2] = *subtype;
        buf[off + 32..off + 32 + trsvcid.len()].copy_from_slice(trsvcid.as_bytes());
        buf[off + 256..off + 256 + subnqn.len()].copy_from_slice(subnqn.as_bytes());
        buf[off + 512..off + 512 + traddr.len()].copy_from_slice(traddr.as_bytes());
    }
    buf
}

/// Builds a 4096-byte Reservation Report fixture with one standard
/// (24-byte) registrant holding the reservation.
pub fn reservation_report_fixture(generation: u32, holder_controller_id: u16, reservation_key: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    buf[0..4].copy_from_slice(&generation.to_le_bytes());
    buf[4] = 1; // RTYPE = Write Exclusive
    buf[5..7].copy_from_slice(&1u16.to_le_bytes()); // one registered controller
    let entry_off = 24;
    buf[entry_off..entry_off + 2].copy_from_slice(&holder_controller_id.to_le_bytes());
    buf[entry_off + 2] = 1; // holds reservation
    buf[entry_off + 16..entry_off + 24].copy_from_slice(&reservation_key.to_le_bytes());
    buf
}
