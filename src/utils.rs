// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rand::RngCore;

/// Generates a random 16-byte host identifier, used both in the Fabric
/// Connect data structure and to derive a default Host NQN.
pub fn generate_host_id() -> [u8; 16] {
    let mut id = [0u8; 16];
    rand::rng().fill_bytes(&mut id);
    id
}

/// Builds the default Host NQN of the form
/// `nqn.2014-08.org.nvmexpress:uuid:<uuid>` from a 16-byte host
/// identifier, formatted as a UUID per RFC 4122 (no version/variant bits
/// are forced; the identifier is opaque to the wire protocol).
pub fn default_host_nqn(host_id: &[u8; 16]) -> String {
    format!(
        "nqn.2014-08.org.nvmexpress:uuid:{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        host_id[0], host_id[1], host_id[2], host_id[3],
        host_id[4], host_id[5],
        host_id[6], host_id[7],
        host_id[8], host_id[9],
        host_id[10], host_id[11], host_id[12], host_id[13], host_id[14], host_id[15],
    )
}

/// The well-known NQN identifying the NVMe-oF Discovery Controller.
pub const NVME_OF_DISCOVERY_NQN: &str = "nqn.2014-08.org.nvmexpress.discovery";
