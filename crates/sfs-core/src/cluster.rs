// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Roster snapshot types describing the nodes and volumes of the cluster.
//!
//! Membership is discovered externally; the placement core receives these
//! definitions as immutable snapshots and never mutates them in place.

use serde::{Deserialize, Serialize};

use crate::{NodeId, VolumeId};

/// Health state of a volume as advertised in the service definition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    /// The volume accepts reads and writes.
    Usable,
    /// The volume is out of space; existing blobs remain readable.
    Full,
    /// The volume is unavailable.
    Failed,
}

/// A volume as listed in a node's service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDef {
    /// The volume's cluster-wide identifier.
    pub id: VolumeId,
    /// The advertised health state.
    pub status: VolumeStatus,
}

impl VolumeDef {
    /// Creates a usable volume definition.
    pub fn new(id: impl Into<VolumeId>) -> Self {
        Self {
            id: id.into(),
            status: VolumeStatus::Usable,
        }
    }

    /// Returns true iff the volume accepts new blobs.
    pub fn is_usable(&self) -> bool {
        self.status == VolumeStatus::Usable
    }
}

/// Snapshot of one node's registration in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDef {
    /// The node's stable identifier.
    pub node_id: NodeId,
    /// The node's network endpoint, as `host:port`.
    pub host_and_port: String,
    /// Whether the node participates as a master.
    #[serde(default)]
    pub master: bool,
    /// Whether the node stores blob data.
    #[serde(default)]
    pub data_node: bool,
    /// The node's volumes, in registration order.
    #[serde(default)]
    pub volumes: Vec<VolumeDef>,
}

impl ServiceDef {
    /// Creates a data-node definition with no volumes.
    pub fn new(node_id: impl Into<NodeId>, host_and_port: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            host_and_port: host_and_port.into(),
            master: false,
            data_node: true,
            volumes: Vec::new(),
        }
    }

    /// Adds a usable volume.
    pub fn with_volume(mut self, volume_id: impl Into<VolumeId>) -> Self {
        self.volumes.push(VolumeDef::new(volume_id));
        self
    }

    /// The node's usable volumes, in registration order.
    pub fn usable_volumes(&self) -> impl Iterator<Item = &VolumeDef> {
        self.volumes.iter().filter(|volume| volume.is_usable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_volumes_filters_by_status() {
        let mut def = ServiceDef::new("n1", "10.0.0.1:8080")
            .with_volume("v1")
            .with_volume("v2");
        def.volumes[1].status = VolumeStatus::Full;

        let usable: Vec<_> = def.usable_volumes().map(|v| v.id.as_str()).collect();
        assert_eq!(usable, ["v1"]);
    }

    #[test]
    fn service_def_round_trips() {
        let def = ServiceDef::new("n1", "10.0.0.1:8080").with_volume("v1");
        let json = serde_json::to_string(&def).unwrap();
        let parsed: ServiceDef = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, def);
    }
}
