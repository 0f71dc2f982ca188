// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The controller facade: connection lifecycle, Fabric Connect, the
//! controller-enable sequence, and every public command this crate
//! exposes.
//!
//! The facade owns its queues outright (admin mandatory, I/O optional,
//! created lazily on first I/O call); queues own their transport
//! sessions. No back-references exist between the layers (distilled
//! §9's redesign note on the donor's cyclic client/logger ownership).

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    cfg::config::NvmeOfConfig,
    dispatch::{self},
    error::{NvmeError, Result},
    queue::{Queue, TransportSession},
    utils,
    wire::{
        admin,
        ana::AnaLogPage,
        async_event::AsyncEvent,
        caps::ControllerCaps,
        changed_ns::ChangedNamespaceList,
        cqe::Cqe,
        discovery::{self, DiscoveryLogPage},
        fabric,
        identify::{self, Cns, ControllerInfo, NamespaceInfo},
        nvm,
        pdu::PduType,
        reservation::{
            self, ReservationAcquireAction, ReservationRegisterAction, ReservationReleaseAction, ReservationStatus,
            ReservationType,
        },
    },
};

const PROP_CAP: u32 = 0x00;
const PROP_VS: u32 = 0x08;
const PROP_CC: u32 = 0x14;
const PROP_CSTS: u32 = 0x1C;

const CSS_NVM: u32 = 6;
const AMS_DEFAULT: u32 = 0;
const IOSQES_DEFAULT: u32 = 6;
const IOCQES_DEFAULT: u32 = 4;

const CSTS_RDY: u32 = 0x1;
const CSTS_CFS: u32 = 0x2;

/// How many times [`ControllerFacade::connect`] polls `CSTS.RDY` before
/// giving up, at a fixed 20ms interval.
const MAX_READY_POLLS: u32 = 50;

/// Fixed request size used for the ANA and Changed-Namespace-List log
/// pages; both parsers tolerate a truncated or over-sized buffer, so a
/// single request (unlike Discovery's two-phase fetch) is sufficient.
const FIXED_LOG_PAGE_LEN: u32 = 4096;

/// Upper bound on blocks per I/O command: `NLB` occupies the low 16 bits
/// of CDW12 (`wire::nvm`), so `block_count` saturates at `0x10000`.
pub const NVME_MAX_IO_SIZE: u32 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FacadeState {
    Disconnected,
    Ready,
    ReadyWithIo,
}

/// Outcome of a Reservation Register/Acquire/Release call: these report
/// failure as a value rather than an error, since a non-zero completion
/// status (e.g. a conflicting reservation) is an expected, queue-survivable
/// outcome the caller inspects rather than branches on (distilled §4.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationOutcome {
    pub success: bool,
    pub key_used: u64,
    pub status: u16,
}

/// A connected (or not yet connected) NVMe-oF host-to-controller session.
///
/// `connect()`/`disconnect()` drive the lifecycle; every other operation
/// requires `READY` or `READY+IO` and fails with [`NvmeError::InvalidState`]
/// otherwise.
#[derive(Debug)]
pub struct ControllerFacade {
    cfg: NvmeOfConfig,
    state: FacadeState,
    admin: Option<Queue>,
    io: Option<Queue>,
    controller_id: u16,
    caps: Option<ControllerCaps>,
    vs: Option<u32>,
    controller_info: Option<ControllerInfo>,
    ns_block_size: HashMap<u32, u32>,
    outstanding_aers: Vec<u16>,
    async_events_enabled: bool,
}

impl ControllerFacade {
    pub fn new(cfg: NvmeOfConfig) -> Self {
        ControllerFacade {
            cfg,
            state: FacadeState::Disconnected,
            admin: None,
            io: None,
            controller_id: 0,
            caps: None,
            vs: None,
            controller_info: None,
            ns_block_size: HashMap::new(),
            outstanding_aers: Vec::new(),
            async_events_enabled: false,
        }
    }

    pub fn config(&self) -> &NvmeOfConfig {
        &self.cfg
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, FacadeState::Ready | FacadeState::ReadyWithIo)
    }

    pub fn controller_id(&self) -> u16 {
        self.controller_id
    }

    pub fn caps(&self) -> Option<ControllerCaps> {
        self.caps
    }

    pub fn controller_info(&self) -> Option<&ControllerInfo> {
        self.controller_info.as_ref()
    }

    fn require_ready(&self) -> Result<()> {
        match self.state {
            FacadeState::Ready | FacadeState::ReadyWithIo => Ok(()),
            FacadeState::Disconnected => Err(NvmeError::invalid_state("operation requires a connected controller")),
        }
    }

    fn require_non_discovery(&self) -> Result<()> {
        if self.cfg.is_discovery() {
            return Err(NvmeError::invalid_state("operation not valid on the discovery subsystem"));
        }
        Ok(())
    }

    fn require_discovery(&self) -> Result<()> {
        if !self.cfg.is_discovery() {
            return Err(NvmeError::invalid_state("operation only valid on the discovery subsystem"));
        }
        Ok(())
    }

    fn admin_mut(&mut self) -> Result<&mut Queue> {
        self.require_ready()?;
        self.admin.as_mut().ok_or_else(|| NvmeError::invalid_state("admin queue not established"))
    }

    fn io_mut(&mut self) -> Result<&mut Queue> {
        self.io.as_mut().ok_or_else(|| NvmeError::invalid_state("I/O queue not established; call ensure_io_queue() first"))
    }

    fn inline_max(&self) -> u32 {
        self.controller_info.as_ref().map_or(0, ControllerInfo::inline_max)
    }

    // ---- lifecycle -----------------------------------------------------

    async fn property_get(queue: &mut Queue, offset: u32, size: u8, timeout: Duration) -> Result<Cqe> {
        let cmd_id = queue.allocate_cmd_id();
        let capsule = fabric::build_property_get_capsule(cmd_id, offset, size)?;
        dispatch::dispatch_response_only(queue, &capsule, None, Some(timeout)).await
    }

    async fn property_set(queue: &mut Queue, offset: u32, value: u32, timeout: Duration) -> Result<Cqe> {
        let cmd_id = queue.allocate_cmd_id();
        let capsule = fabric::build_property_set_capsule(cmd_id, offset, value);
        dispatch::dispatch_response_only(queue, &capsule, None, Some(timeout)).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fabric_connect(
        queue: &mut Queue,
        qid: u16,
        sqsize: u16,
        controller_id: u16,
        subnqn: &str,
        host_nqn: &str,
        timeout: Duration,
    ) -> Result<Cqe> {
        let host_id = utils::generate_host_id();
        let cmd_id = queue.allocate_cmd_id();
        let capsule = fabric::build_connect_capsule(cmd_id, qid, sqsize);
        let data = fabric::build_fabric_connect_data(&host_id, controller_id, subnqn, host_nqn)?;
        dispatch::dispatch_response_only(queue, &capsule, Some(&data), Some(timeout)).await
    }

    /// Drives `CC=disabled` → `CC=enabled` → poll `CSTS.RDY`, as diagrammed
    /// in distilled §4.5.1. `CC` is `EN | (CSS<<4) | (AMS<<11) |
    /// (IOSQES<<16) | (IOCQES<<20)` with the documented defaults.
    async fn enable_controller(queue: &mut Queue, timeout: Duration) -> Result<()> {
        Self::property_set(queue, PROP_CC, 0, timeout).await?;

        let cc = (CSS_NVM << 4) | (AMS_DEFAULT << 11) | (IOSQES_DEFAULT << 16) | (IOCQES_DEFAULT << 20) | 1;
        Self::property_set(queue, PROP_CC, cc, timeout).await?;

        for _ in 0..MAX_READY_POLLS {
            let cqe = Self::property_get(queue, PROP_CSTS, 4, timeout).await?;
            let csts = cqe.dw0;
            if csts & CSTS_CFS != 0 {
                return Err(NvmeError::controller_fatal("CSTS.CFS set during controller enable"));
            }
            if csts & CSTS_RDY != 0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Err(NvmeError::controller_fatal("controller did not reach CSTS.RDY before timeout"))
    }

    /// Opens the admin queue: TCP connect, ICReq/ICResp, Fabric Connect
    /// (QID=0), CAP/VS reads, and the controller-enable sequence.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != FacadeState::Disconnected {
            return Err(NvmeError::invalid_state("connect() called outside DISCONNECTED"));
        }

        let session = TransportSession::connect(&self.cfg.host, self.cfg.port).await?;
        let mut admin = Queue::new(session, 0);

        let subnqn = self.cfg.subsystem_nqn.clone().unwrap_or_else(|| utils::NVME_OF_DISCOVERY_NQN.to_string());
        let host_nqn = self.cfg.resolved_host_nqn();
        let sqsize = self.cfg.queue_size.saturating_sub(1);
        let timeout = self.cfg.timeout;

        let connect_cqe =
            Self::fabric_connect(&mut admin, 0, sqsize, fabric::ADMIN_CONNECT_CNTLID, &subnqn, &host_nqn, timeout).await?;
        self.controller_id = (connect_cqe.dw0 & 0xFFFF) as u16;

        let cap_cqe = Self::property_get(&mut admin, PROP_CAP, 8, timeout).await?;
        self.caps = Some(ControllerCaps::parse(fabric::property_value_u64(cap_cqe.dw0, cap_cqe.dw1)));

        Self::enable_controller(&mut admin, timeout).await?;

        let vs_cqe = Self::property_get(&mut admin, PROP_VS, 4, timeout).await?;
        self.vs = Some(vs_cqe.dw0);

        self.admin = Some(admin);
        self.state = FacadeState::Ready;
        debug!(
            host = %self.cfg.host,
            port = self.cfg.port,
            controller_id = self.controller_id,
            vs = ?self.vs,
            "controller ready"
        );
        Ok(())
    }

    /// Opens the I/O queue (QID=1) as a second TCP connection, if one
    /// isn't already established. A no-op once `READY+IO`.
    pub async fn ensure_io_queue(&mut self) -> Result<()> {
        self.require_ready()?;
        self.require_non_discovery()?;
        if self.io.is_some() {
            return Ok(());
        }

        let session = TransportSession::connect(&self.cfg.host, self.cfg.port).await?;
        let mut io = Queue::new(session, 1);

        let subnqn = self.cfg.subsystem_nqn.clone().expect("require_non_discovery guarantees subsystem_nqn is set");
        let host_nqn = self.cfg.resolved_host_nqn();
        let sqsize = self.cfg.queue_size.saturating_sub(1);
        Self::fabric_connect(&mut io, 1, sqsize, self.controller_id, &subnqn, &host_nqn, self.cfg.timeout).await?;

        self.io = Some(io);
        self.state = FacadeState::ReadyWithIo;
        Ok(())
    }

    /// Best-effort teardown: closes both sockets (no Delete-SQ/CQ
    /// counterpart exists for NVMe-oF TCP, distilled §9) and returns to
    /// `DISCONNECTED`.
    pub async fn disconnect(&mut self) {
        if let Some(mut io) = self.io.take() {
            io.close().await;
        }
        if let Some(mut admin) = self.admin.take() {
            admin.close().await;
        }
        self.state = FacadeState::Disconnected;
    }

    // ---- identify / log pages -------------------------------------------

    pub async fn identify_controller(&mut self) -> Result<ControllerInfo> {
        let timeout = self.cfg.timeout;
        let queue = self.admin_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = identify::build_identify_capsule(cmd_id, Cns::Controller, 0);
        let (data, _cqe) = dispatch::dispatch_data_then_response(queue, &capsule, None, true, Some(timeout)).await?;
        let info = ControllerInfo::parse(&data)?;
        self.controller_info = Some(info.clone());
        Ok(info)
    }

    pub async fn identify_namespace(&mut self, nsid: u32) -> Result<NamespaceInfo> {
        if nsid == 0 {
            return Err(NvmeError::invalid_argument("Identify Namespace requires nsid != 0"));
        }
        self.require_non_discovery()?;
        let timeout = self.cfg.timeout;
        let queue = self.admin_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = identify::build_identify_capsule(cmd_id, Cns::Namespace, nsid);
        let (data, _cqe) = dispatch::dispatch_data_then_response(queue, &capsule, None, true, Some(timeout)).await?;
        let info = NamespaceInfo::parse(nsid, &data)?;
        self.ns_block_size.insert(nsid, info.logical_block_size);
        Ok(info)
    }

    pub async fn identify_active_namespace_list(&mut self) -> Result<Vec<u32>> {
        self.require_non_discovery()?;
        let timeout = self.cfg.timeout;
        let queue = self.admin_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = identify::build_identify_capsule(cmd_id, Cns::ActiveNamespaceList, 0);
        let (data, _cqe) = dispatch::dispatch_data_then_response(queue, &capsule, None, true, Some(timeout)).await?;
        Ok(identify::parse_active_namespace_list(&data))
    }

    /// Returns the cached LBA size for `nsid`, fetching it via Identify
    /// Namespace on a cache miss.
    async fn block_size(&mut self, nsid: u32) -> Result<u32> {
        if let Some(&size) = self.ns_block_size.get(&nsid) {
            return Ok(size);
        }
        let info = self.identify_namespace(nsid).await?;
        Ok(info.logical_block_size)
    }

    async fn get_log_page_raw(&mut self, nsid: u32, lid: u8, data_len: u32) -> Result<Bytes> {
        let timeout = self.cfg.timeout;
        let queue = self.admin_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = admin::build_get_log_page_capsule(cmd_id, nsid, lid, data_len);
        let (data, _cqe) = dispatch::dispatch_data_then_response(queue, &capsule, None, true, Some(timeout)).await?;
        Ok(data)
    }

    /// Fetches the Discovery Log in two phases: a header-only request to
    /// learn `num_records`, then a full-size request for the whole page.
    pub async fn get_discovery_log_page(&mut self) -> Result<DiscoveryLogPage> {
        self.require_discovery()?;
        let header = self
            .get_log_page_raw(0, admin::LogPageId::Discovery as u8, discovery::DISCOVERY_LOG_HEADER_LEN as u32)
            .await?;
        if header.len() < discovery::DISCOVERY_LOG_HEADER_LEN {
            return Err(NvmeError::protocol("discovery log header short read"));
        }
        let num_records = u64::from_le_bytes(header[8..16].try_into().expect("8 bytes"));
        let full_len = discovery::DISCOVERY_LOG_HEADER_LEN as u64 + num_records * discovery::DISCOVERY_ENTRY_LEN as u64;
        let full_len = u32::try_from(full_len).map_err(|_| NvmeError::protocol("discovery log page too large to request"))?;
        let data = self.get_log_page_raw(0, admin::LogPageId::Discovery as u8, full_len).await?;
        DiscoveryLogPage::parse(&data)
    }

    pub async fn get_ana_log_page(&mut self) -> Result<AnaLogPage> {
        self.require_non_discovery()?;
        let data = self.get_log_page_raw(0, admin::LogPageId::AsymmetricNamespaceAccess as u8, FIXED_LOG_PAGE_LEN).await?;
        AnaLogPage::parse(&data)
    }

    pub async fn get_changed_namespace_list(&mut self) -> Result<ChangedNamespaceList> {
        self.require_non_discovery()?;
        let data =
            self.get_log_page_raw(0xFFFF_FFFF, admin::LogPageId::ChangedNamespaceList as u8, FIXED_LOG_PAGE_LEN).await?;
        Ok(ChangedNamespaceList::parse(&data))
    }

    // ---- I/O -------------------------------------------------------------

    pub async fn read(&mut self, nsid: u32, lba: u64, block_count: u32) -> Result<Bytes> {
        self.ensure_io_queue().await?;
        let block_size = self.block_size(nsid).await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = nvm::build_read_capsule(cmd_id, nsid, lba, block_count, block_size);
        let (data, _cqe) = dispatch::dispatch_data_then_response(queue, &capsule, None, true, Some(timeout)).await?;
        let expected = block_count as usize * block_size as usize;
        if data.len() != expected {
            return Err(NvmeError::protocol(format!("read returned {} bytes, expected {expected}", data.len())));
        }
        Ok(data)
    }

    /// Writes `buf` at `lba`. Inline data is used when `buf.len() <=
    /// inline_max` (computed from the cached Identify Controller IOCCSZ,
    /// defaulting to 0 — forcing R2T — if Identify Controller hasn't run
    /// yet); otherwise the R2T write flow is used.
    pub async fn write(&mut self, nsid: u32, lba: u64, buf: &[u8]) -> Result<()> {
        self.ensure_io_queue().await?;
        let block_size = self.block_size(nsid).await?;
        if block_size == 0 || buf.len() % block_size as usize != 0 {
            return Err(NvmeError::invalid_argument("write buffer length is not a multiple of the LBA size"));
        }
        let block_count = (buf.len() / block_size as usize) as u64;
        if block_count > NVME_MAX_IO_SIZE as u64 {
            return Err(NvmeError::invalid_argument("write exceeds the maximum block count for a single command"));
        }
        let block_count = block_count as u32;
        let inline_max = self.inline_max();
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();

        if buf.len() as u32 <= inline_max {
            let capsule = nvm::build_write_capsule(cmd_id, nsid, lba, block_count, buf.len() as u32, true);
            dispatch::dispatch_response_only(queue, &capsule, Some(buf), Some(timeout)).await?;
        } else {
            let capsule = nvm::build_write_capsule(cmd_id, nsid, lba, block_count, buf.len() as u32, false);
            let maxh2cdata = queue.params().maxh2cdata;
            dispatch::dispatch_r2t_write_flow(queue, &capsule, buf, maxh2cdata, Some(timeout)).await?;
        }
        Ok(())
    }

    pub async fn write_zeroes(&mut self, nsid: u32, lba: u64, block_count: u32) -> Result<()> {
        self.ensure_io_queue().await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = nvm::build_write_zeroes_capsule(cmd_id, nsid, lba, block_count);
        dispatch::dispatch_response_only(queue, &capsule, None, Some(timeout)).await?;
        Ok(())
    }

    pub async fn write_uncorrectable(&mut self, nsid: u32, lba: u64, block_count: u32) -> Result<()> {
        self.ensure_io_queue().await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = nvm::build_write_uncorrectable_capsule(cmd_id, nsid, lba, block_count);
        dispatch::dispatch_response_only(queue, &capsule, None, Some(timeout)).await?;
        Ok(())
    }

    pub async fn flush(&mut self, nsid: u32) -> Result<()> {
        self.ensure_io_queue().await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = nvm::build_flush_capsule(cmd_id, nsid);
        dispatch::dispatch_response_only(queue, &capsule, None, Some(timeout)).await?;
        Ok(())
    }

    /// A non-zero completion status of `0x85` (Compare Failure) is
    /// surfaced as [`NvmeError::CompareMismatch`] rather than the generic
    /// [`NvmeError::Command`] (distilled §4.5.2).
    pub async fn compare(&mut self, nsid: u32, lba: u64, buf: &[u8]) -> Result<()> {
        self.ensure_io_queue().await?;
        let block_size = self.block_size(nsid).await?;
        if block_size == 0 || buf.len() % block_size as usize != 0 {
            return Err(NvmeError::invalid_argument("compare buffer length is not a multiple of the LBA size"));
        }
        let block_count = (buf.len() / block_size as usize) as u32;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = nvm::build_compare_capsule(cmd_id, nsid, lba, block_count, buf.len() as u32);
        match dispatch::dispatch_response_only(queue, &capsule, Some(buf), Some(timeout)).await {
            Ok(_) => Ok(()),
            Err(NvmeError::Command { status, cid, .. }) if status == nvm::COMPARE_FAILURE_STATUS => {
                Err(NvmeError::CompareMismatch { cid })
            }
            Err(e) => Err(e),
        }
    }

    // ---- reservations ----------------------------------------------------

    fn reservation_outcome(result: Result<Cqe>, key_used: u64) -> Result<ReservationOutcome> {
        match result {
            Ok(cqe) => Ok(ReservationOutcome { success: true, key_used, status: cqe.status_code() }),
            Err(NvmeError::Command { status, .. }) => Ok(ReservationOutcome { success: false, key_used, status }),
            Err(e) => Err(e),
        }
    }

    pub async fn reservation_register(
        &mut self,
        nsid: u32,
        action: ReservationRegisterAction,
        ignore_existing_key: bool,
        current_key: u64,
        new_key: u64,
    ) -> Result<ReservationOutcome> {
        self.ensure_io_queue().await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let (capsule, data) =
            reservation::build_reservation_register_capsule(cmd_id, nsid, action, ignore_existing_key, current_key, new_key);
        let key_used = if matches!(action, ReservationRegisterAction::Register) { new_key } else { current_key };
        let result = dispatch::dispatch_response_only(queue, &capsule, Some(&data), Some(timeout)).await;
        Self::reservation_outcome(result, key_used)
    }

    pub async fn reservation_acquire(
        &mut self,
        nsid: u32,
        action: ReservationAcquireAction,
        reservation_type: ReservationType,
        current_key: u64,
        preempt_key: u64,
    ) -> Result<ReservationOutcome> {
        self.ensure_io_queue().await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let (capsule, data) =
            reservation::build_reservation_acquire_capsule(cmd_id, nsid, action, reservation_type, current_key, preempt_key);
        let result = dispatch::dispatch_response_only(queue, &capsule, Some(&data), Some(timeout)).await;
        Self::reservation_outcome(result, current_key)
    }

    pub async fn reservation_release(
        &mut self,
        nsid: u32,
        action: ReservationReleaseAction,
        reservation_type: ReservationType,
        current_key: u64,
    ) -> Result<ReservationOutcome> {
        self.ensure_io_queue().await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let (capsule, data) = reservation::build_reservation_release_capsule(cmd_id, nsid, action, reservation_type, current_key);
        let result = dispatch::dispatch_response_only(queue, &capsule, Some(&data), Some(timeout)).await;
        Self::reservation_outcome(result, current_key)
    }

    pub async fn reservation_report(&mut self, nsid: u32, eds: bool) -> Result<ReservationStatus> {
        self.ensure_io_queue().await?;
        let timeout = self.cfg.timeout;
        let queue = self.io_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = reservation::build_reservation_report_capsule(cmd_id, nsid, FIXED_LOG_PAGE_LEN, eds);
        let (data, _cqe) = dispatch::dispatch_data_then_response(queue, &capsule, None, true, Some(timeout)).await?;
        ReservationStatus::parse(&data, eds)
    }

    // ---- async events ----------------------------------------------------

    /// Subscribes to async events. With `mask = None`, the subscription
    /// mask is computed from Identify Controller's OAES field (running
    /// Identify Controller first if it hasn't been cached yet).
    pub async fn enable_async_events(&mut self, mask: Option<u32>) -> Result<()> {
        let mask = match mask {
            Some(m) => m,
            None => {
                let info = match self.controller_info.clone() {
                    Some(info) => info,
                    None => self.identify_controller().await?,
                };
                info.oaes.to_feature_mask()
            }
        };
        let timeout = self.cfg.timeout;
        let queue = self.admin_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = admin::build_set_features_capsule(cmd_id, 0, admin::FEATURE_ID_ASYNC_EVENT_CONFIGURATION, mask, false);
        dispatch::dispatch_response_only(queue, &capsule, None, Some(timeout)).await?;
        self.async_events_enabled = true;
        Ok(())
    }

    /// Submits `n` Async Event Request capsules without waiting for their
    /// completions, provided `outstanding + n <= AERL + 1`.
    pub async fn request_async_events(&mut self, n: usize) -> Result<()> {
        if !self.async_events_enabled {
            return Err(NvmeError::invalid_state("async events not enabled; call enable_async_events() first"));
        }
        let aerl = self
            .controller_info
            .as_ref()
            .map(|info| info.aerl as usize)
            .ok_or_else(|| NvmeError::invalid_state("controller AERL unknown; call identify_controller() first"))?;
        if self.outstanding_aers.len() + n > aerl + 1 {
            return Err(NvmeError::invalid_argument(format!(
                "requesting {n} AERs would exceed the outstanding limit of {}",
                aerl + 1
            )));
        }
        let queue = self.admin_mut()?;
        for _ in 0..n {
            let cmd_id = queue.allocate_cmd_id();
            let capsule = admin::build_async_event_request_capsule(cmd_id);
            queue.send_capsule(&capsule, None).await?;
            self.outstanding_aers.push(cmd_id);
        }
        Ok(())
    }

    /// Drains completions off the admin queue for `timeout`, matching
    /// each against the outstanding AER set and decoding matches into
    /// [`AsyncEvent`]s; completions for unrecognized CIDs are discarded.
    /// Returns as soon as a receive times out.
    pub async fn poll_async_events(&mut self, timeout: Duration) -> Result<Vec<AsyncEvent>> {
        let queue = self.admin_mut()?;
        let mut events = Vec::new();
        loop {
            let pdu = match queue.receive_pdu_timeout(timeout).await {
                Ok(pdu) => pdu,
                Err(NvmeError::Timeout(_)) => break,
                Err(e) => return Err(e),
            };
            let pdu_type = PduType::try_from(pdu.header.pdu_type)?;
            if pdu_type != PduType::Rsp {
                warn!(?pdu_type, "unexpected PDU type while polling async events");
                continue;
            }
            let cqe = Cqe::unpack(&pdu.payload)?;
            let Some(pos) = self.outstanding_aers.iter().position(|&cid| cid == cqe.cid) else {
                continue;
            };
            self.outstanding_aers.remove(pos);
            events.push(AsyncEvent::parse(cqe.dw0, cqe.dw1));
        }
        Ok(events)
    }

    // ---- misc --------------------------------------------------------------

    pub async fn keep_alive(&mut self) -> Result<()> {
        let timeout = self.cfg.timeout;
        let queue = self.admin_mut()?;
        let cmd_id = queue.allocate_cmd_id();
        let capsule = admin::build_keep_alive_capsule(cmd_id);
        dispatch::dispatch_response_only(queue, &capsule, None, Some(timeout)).await?;
        Ok(())
    }
}
