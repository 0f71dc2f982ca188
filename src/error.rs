// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Public error taxonomy for the NVMe-oF client.
//!
//! The core never recovers from an error: every variant aborts the
//! current operation. Only [`NvmeError::Command`] and
//! [`NvmeError::InvalidArgument`] leave the owning queue usable; every
//! other variant invalidates the queue (and typically the whole
//! [`crate::facade::ControllerFacade`]).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NvmeError>;

/// Every error this crate's public API can return.
#[derive(Debug, Error)]
pub enum NvmeError {
    /// Socket connect/read/write failure, or peer close at an unexpected
    /// boundary.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Unexpected PDU type, malformed header, truncated data structure,
    /// PFV mismatch, or a SUCCESS flag observed without LAST_PDU.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A completion carried a non-zero status code.
    #[error("command failed: cid={cid} status=0x{status:04x} ({description})")]
    Command {
        status: u16,
        description: &'static str,
        cid: u16,
    },

    /// The operation was invoked while the facade/queue was in the wrong
    /// lifecycle state (e.g. Identify on a discovery-only connection).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The caller passed an argument that violates a documented
    /// precondition (data length not a multiple of the LBA size, NSID=0
    /// for Identify Namespace, too many outstanding AERs, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `CSTS.CFS` was observed set, or the controller-enable sequence
    /// failed to reach `CSTS.RDY`.
    #[error("controller fatal condition: {0}")]
    ControllerFatal(String),

    /// A Compare command completed with status 0x85 (data mismatch),
    /// surfaced as its own variant rather than a generic [`NvmeError::Command`]
    /// (distilled §4.5.2).
    #[error("compare mismatch: cid={cid}")]
    CompareMismatch { cid: u16 },
}

impl NvmeError {
    /// True for the two variants that leave the owning queue usable per
    /// the propagation policy.
    pub fn queue_survives(&self) -> bool {
        matches!(
            self,
            NvmeError::Command { .. } | NvmeError::InvalidArgument(_) | NvmeError::CompareMismatch { .. }
        )
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        NvmeError::Protocol(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        NvmeError::InvalidState(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        NvmeError::InvalidArgument(msg.into())
    }

    pub(crate) fn controller_fatal(msg: impl Into<String>) -> Self {
        NvmeError::ControllerFatal(msg.into())
    }
}
