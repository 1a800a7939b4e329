// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster node handles: replication settings, the volume-layer seam, and
//! the directory resolving identities to operable nodes.

use std::{collections::HashMap, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use sfs_core::{
    blob::{DigestBlob, HeaderBlob, ReadStreamBlob},
    cluster::ServiceDef,
    io::ByteStream,
    DigestAlgorithm, NodeId, VolumeId,
};
use sfs_node_client::BlobClient;

use crate::config::ClusterConfig;

mod xnode;

pub use xnode::{LocalNode, NodeWriteStream, RemoteNode, XNode};

/// Process-wide replication settings.
#[derive(Debug, Clone, Copy)]
pub struct Nodes {
    number_of_primaries: usize,
    number_of_replicas: usize,
    allow_same_node: bool,
    master: bool,
}

impl Nodes {
    /// Creates a settings handle with explicit values.
    pub fn new(
        number_of_primaries: usize,
        number_of_replicas: usize,
        allow_same_node: bool,
        master: bool,
    ) -> Self {
        Self {
            number_of_primaries,
            number_of_replicas,
            allow_same_node,
            master,
        }
    }

    /// Creates a settings handle from the cluster configuration.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(
            config.number_of_primaries,
            config.number_of_replicas,
            config.allow_same_node,
            config.master_node,
        )
    }

    /// The cluster-wide primary copy count.
    pub fn number_of_primaries(&self) -> usize {
        self.number_of_primaries
    }

    /// The cluster-wide default replica copy count.
    pub fn number_of_replicas(&self) -> usize {
        self.number_of_replicas
    }

    /// Whether several copies may share a node across distinct volumes.
    pub fn is_allow_same_node(&self) -> bool {
        self.allow_same_node
    }

    /// Whether this process drives cluster maintenance.
    pub fn is_master(&self) -> bool {
        self.master
    }
}

/// The seam to the node-local volume layer.
///
/// The on-disk implementation lives with the volume format; the placement
/// core only needs these operations, which mirror the remote blob protocol.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// The stored digests of a blob, `None` if absent.
    async fn checksum(
        &self,
        volume_id: &str,
        position: u64,
        algorithms: &[DigestAlgorithm],
    ) -> io::Result<Option<DigestBlob>>;

    /// Deletes a blob; `None` if it was already absent or not modifiable.
    async fn delete(&self, volume_id: &str, position: u64) -> io::Result<Option<HeaderBlob>>;

    /// Acknowledges a blob; `None` if there was nothing to acknowledge.
    async fn acknowledge(&self, volume_id: &str, position: u64)
        -> io::Result<Option<HeaderBlob>>;

    /// Whether the volume accepts another blob.
    async fn can_put(&self, volume_id: &str) -> io::Result<bool>;

    /// Opens a read stream over a stored blob, `None` if absent.
    async fn read(
        &self,
        volume_id: &str,
        position: u64,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> io::Result<Option<ReadStreamBlob>>;

    /// Stores `length` bytes from `source` and returns the write receipt.
    async fn write(
        &self,
        volume_id: &str,
        length: u64,
        algorithms: &[DigestAlgorithm],
        source: ByteStream,
    ) -> io::Result<DigestBlob>;
}

/// Resolves node and volume identities to operable [`XNode`]s.
pub trait NodeDirectory: Send + Sync {
    /// The node with the given identifier, if known.
    fn lookup(&self, node_id: &str) -> Option<XNode>;

    /// The identifier of the node owning the given volume, if known.
    fn node_of_volume(&self, volume_id: &str) -> Option<NodeId>;
}

/// Directory over a roster snapshot.
///
/// The local node is served by direct volume access; every other node gets
/// a protocol client sharing one HTTP connection pool and the cluster
/// secret.
pub struct ClusterNodeDirectory {
    local_node_id: NodeId,
    local_store: Arc<dyn VolumeStore>,
    http: reqwest::Client,
    secret: Vec<u8>,
    response_timeout: Duration,
    nodes: HashMap<NodeId, ServiceDef>,
    volume_owner: HashMap<VolumeId, NodeId>,
}

impl ClusterNodeDirectory {
    /// Builds a directory over `roster` for the process identified by
    /// `local_node_id`.
    pub fn new(
        local_node_id: impl Into<NodeId>,
        local_store: Arc<dyn VolumeStore>,
        http: reqwest::Client,
        config: &ClusterConfig,
        roster: Vec<ServiceDef>,
    ) -> Self {
        let mut nodes = HashMap::new();
        let mut volume_owner = HashMap::new();
        for def in roster {
            for volume in &def.volumes {
                volume_owner.insert(volume.id.clone(), def.node_id.clone());
            }
            nodes.insert(def.node_id.clone(), def);
        }
        Self {
            local_node_id: local_node_id.into(),
            local_store,
            http,
            secret: config.remote_node_secret.clone(),
            response_timeout: config.response_timeout,
            nodes,
            volume_owner,
        }
    }
}

impl NodeDirectory for ClusterNodeDirectory {
    fn lookup(&self, node_id: &str) -> Option<XNode> {
        let def = self.nodes.get(node_id)?;
        if node_id == self.local_node_id {
            return Some(XNode::Local(LocalNode::new(
                def.node_id.clone(),
                def.host_and_port.clone(),
                self.local_store.clone(),
            )));
        }
        let client = BlobClient::builder()
            .http_client(self.http.clone())
            .shared_secret(self.secret.clone())
            .response_timeout(self.response_timeout)
            .build(def.node_id.clone(), &def.host_and_port);
        match client {
            Ok(client) => Some(XNode::Remote(RemoteNode::new(client))),
            Err(error) => {
                tracing::warn!(node_id, error = %error, "cannot build remote node client");
                None
            }
        }
    }

    fn node_of_volume(&self, volume_id: &str) -> Option<NodeId> {
        self.volume_owner.get(volume_id).cloned()
    }
}
