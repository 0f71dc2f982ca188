// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::utils::{default_host_nqn, generate_host_id};

/// Caller-supplied configuration for a [`crate::facade::ControllerFacade`].
///
/// Only the options the wire protocol actually negotiates are exposed
/// here; iSCSI-style per-session digest/CHAP/flow-control groups have no
/// NVMe-oF counterpart and are not carried over from the donor config
/// layout this is modeled on.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NvmeOfConfig {
    #[serde(rename = "Host")]
    /// Target host name or IP address.
    pub host: String,

    #[serde(rename = "Port", default = "default_port")]
    /// Target TCP port (default 4420).
    pub port: u16,

    #[serde(rename = "SubsystemNqn", default)]
    /// Subsystem NQN to bind at Fabric Connect. `None` connects to the
    /// well-known Discovery Controller.
    pub subsystem_nqn: Option<String>,

    #[serde(rename = "HostNqn", default)]
    /// Overrides the generated `nqn.2014-08.org.nvmexpress:uuid:<uuid>`.
    pub host_nqn: Option<String>,

    #[serde(rename = "Timeout", with = "serde_secs", default = "default_timeout")]
    /// Default socket receive timeout for a single operation.
    pub timeout: Duration,

    #[serde(rename = "Kato", with = "serde_secs", default = "default_kato")]
    /// Keep-alive timeout advertised at Connect. Zero disables KATO.
    pub kato: Duration,

    #[serde(rename = "QueueSize", default = "default_queue_size")]
    /// SQSIZE sent at Fabric Connect (queue entries minus one).
    pub queue_size: u16,
}

fn default_port() -> u16 {
    4420
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_kato() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_size() -> u16 {
    31
}

impl NvmeOfConfig {
    /// Builds a config for the given host/port, binding a specific
    /// subsystem NQN and generating a random host identity.
    pub fn new(host: impl Into<String>, port: u16, subsystem_nqn: Option<String>) -> Self {
        NvmeOfConfig {
            host: host.into(),
            port,
            subsystem_nqn,
            host_nqn: None,
            timeout: default_timeout(),
            kato: default_kato(),
            queue_size: default_queue_size(),
        }
    }

    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: NvmeOfConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.host.is_empty(), "Host must not be empty");
        ensure!(self.port != 0, "Port must not be zero");
        if let Some(nqn) = &self.subsystem_nqn {
            ensure!(!nqn.is_empty(), "SubsystemNqn must not be empty when present");
        }
        ensure!(self.queue_size >= 1, "QueueSize must be >= 1");
        Ok(())
    }

    /// True when this config targets the well-known Discovery Controller
    /// rather than an NVM subsystem.
    pub fn is_discovery(&self) -> bool {
        self.subsystem_nqn.is_none()
    }

    /// The Host NQN to present at Fabric Connect: either the configured
    /// override, or one generated from a fresh random host identifier.
    pub fn resolved_host_nqn(&self) -> String {
        match &self.host_nqn {
            Some(nqn) => nqn.clone(),
            None => default_host_nqn(&generate_host_id()),
        }
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
