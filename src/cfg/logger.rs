// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Logger initialization.
//!
//! The crate emits structured debug events at protocol boundaries (PDU
//! type/length, negotiated parameters, command IDs, status codes) via
//! `tracing`. This module only wires a default subscriber for binaries
//! and tests that embed the crate; it mandates no particular sink or
//! format, matching the "external collaborator, specified only at its
//! interface" scoping of the observability surface.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a process-global `tracing` subscriber writing to stderr,
/// honoring `RUST_LOG` (falling back to `info` for this crate and `warn`
/// elsewhere).
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,nvmeof_client_rs=info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();

    Ok(())
}
