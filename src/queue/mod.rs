// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The transport session (one TCP connection plus its negotiated ICReq/
//! ICResp parameters) and the [`Queue`] built on top of it: a queue ID,
//! its own monotonically-increasing 16-bit command-ID counter, and the
//! send/receive primitives the command dispatcher drives.
//!
//! A `Queue` is not thread-safe by contract (distilled §4.3): every
//! operation takes `&mut self`, so the borrow checker enforces the
//! single-outstanding-operation-per-queue rule the specification
//! describes as a cooperative convention in languages without it.

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{debug, warn};

use crate::{
    error::{NvmeError, Result},
    wire::{
        capsule::{CAPSULE_LEN, command_id_of},
        fabric::{self, ConnectionParams},
        pdu::{PduFlags, PduHeader, PduType, RawPdu, receive_pdu},
    },
};

/// A single TCP connection plus the ICReq/ICResp handshake outcome.
/// Frozen for the lifetime of the queue built on top of it (distilled
/// §3.1's `ConnectionParams`).
#[derive(Debug)]
pub struct TransportSession {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    params: ConnectionParams,
}

impl TransportSession {
    /// Opens a TCP connection to `host:port` and performs the ICReq/
    /// ICResp handshake, returning the negotiated parameters.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await.map_err(NvmeError::Transport)?;
        stream.set_nodelay(true).map_err(NvmeError::Transport)?;
        let (reader, writer) = stream.into_split();
        let mut session =
            TransportSession { reader, writer, params: ConnectionParams { pfv: 0, cpda: 0, digest: 0, maxh2cdata: 0 } };
        session.handshake().await?;
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<()> {
        let body = fabric::build_icreq();
        let header = PduHeader::new(PduType::IcReq, PduFlags::empty(), 128, 128, 128);
        self.writer.write_all(&header.pack()).await.map_err(NvmeError::Transport)?;
        self.writer.write_all(&body).await.map_err(NvmeError::Transport)?;

        let pdu = receive_pdu(&mut self.reader).await?;
        let pdu_type = PduType::try_from(pdu.header.pdu_type)?;
        if pdu_type != PduType::IcResp {
            return Err(NvmeError::protocol(format!("expected ICResp, got {pdu_type:?}")));
        }
        self.params = fabric::parse_icresp(&pdu.payload)?;
        debug!(pfv = self.params.pfv, maxh2cdata = self.params.maxh2cdata, "ICReq/ICResp handshake complete");
        Ok(())
    }

    pub fn params(&self) -> ConnectionParams {
        self.params
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        let _ = self.writer.shutdown().await;
        Ok(())
    }
}

/// A transport session bound to a queue ID, owning its own command-ID
/// counter (distilled §3.2: "no queue is shared across parallel
/// executors").
#[derive(Debug)]
pub struct Queue {
    session: TransportSession,
    queue_id: u16,
    next_cmd_id: u16,
}

impl Queue {
    pub fn new(session: TransportSession, queue_id: u16) -> Self {
        Queue { session, queue_id, next_cmd_id: 1 }
    }

    pub fn queue_id(&self) -> u16 {
        self.queue_id
    }

    pub fn params(&self) -> ConnectionParams {
        self.session.params()
    }

    /// Returns the next command ID and advances the counter, wrapping
    /// from `0xFFFF` back to `1` (distilled §4.3).
    pub fn allocate_cmd_id(&mut self) -> u16 {
        let id = self.next_cmd_id;
        self.next_cmd_id = if self.next_cmd_id == 0xFFFF { 1 } else { self.next_cmd_id + 1 };
        id
    }

    /// Emits a CMD PDU: `hlen = pdo = 72`, `plen = 72 + len(data_out)`.
    pub async fn send_capsule(&mut self, capsule: &[u8; CAPSULE_LEN], data_out: Option<&[u8]>) -> Result<()> {
        let data_len = data_out.map_or(0, <[u8]>::len) as u32;
        let header = PduHeader::new(PduType::Cmd, PduFlags::empty(), 72, 72, 72 + data_len);
        self.session.writer.write_all(&header.pack()).await.map_err(NvmeError::Transport)?;
        self.session.writer.write_all(capsule).await.map_err(NvmeError::Transport)?;
        if let Some(data) = data_out {
            self.session.writer.write_all(data).await.map_err(NvmeError::Transport)?;
        }
        debug!(
            queue_id = self.queue_id,
            cmd_id = command_id_of(capsule),
            plen = 72 + data_len,
            "CMD PDU sent"
        );
        Ok(())
    }

    /// Emits one H2CData PDU chunk for the R2T write flow.
    pub async fn send_h2c_data(&mut self, command_id: u16, ttag: u16, offset: u32, chunk: &[u8], last: bool) -> Result<()> {
        let pdu = crate::wire::r2t::build_h2c_data_pdu(command_id, ttag, offset, chunk.len() as u32, last);
        self.session.writer.write_all(&pdu).await.map_err(NvmeError::Transport)?;
        self.session.writer.write_all(chunk).await.map_err(NvmeError::Transport)?;
        debug!(queue_id = self.queue_id, cmd_id = command_id, ttag, offset, len = chunk.len(), last, "H2CData PDU sent");
        Ok(())
    }

    /// Reads one complete PDU, delegating to the framer.
    pub async fn receive_pdu(&mut self) -> Result<RawPdu> {
        let pdu = receive_pdu(&mut self.session.reader).await?;
        debug!(queue_id = self.queue_id, pdu_type = pdu.header.pdu_type, plen = pdu.header.plen(), "PDU received");
        Ok(pdu)
    }

    /// As [`Queue::receive_pdu`], but bounded by `timeout`: installed as
    /// a per-operation deadline and implicitly "restored" on return,
    /// since `tokio::time::timeout` never mutates persistent socket
    /// state (distilled §5's socket-receive-timeout behavior, expressed
    /// the idiomatic `tokio` way rather than via `SO_RCVTIMEO`).
    pub async fn receive_pdu_timeout(&mut self, timeout: Duration) -> Result<RawPdu> {
        match tokio::time::timeout(timeout, self.receive_pdu()).await {
            Ok(result) => result,
            Err(_) => Err(NvmeError::Timeout(timeout)),
        }
    }

    /// Best-effort close: no Delete-SQ/CQ analog exists in NVMe-oF TCP
    /// (distilled §9's open question), so this only shuts down the
    /// write half.
    pub async fn close(&mut self) {
        if let Err(e) = self.session.shutdown().await {
            warn!(queue_id = self.queue_id, error = %e, "error shutting down queue transport");
        }
    }
}
