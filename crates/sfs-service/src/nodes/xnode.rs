// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! The uniform capability surface over local and remote nodes.
//!
//! Placement code is polymorphic over [`XNode`]: the local/remote choice is
//! made once when the directory resolves a node id, and never inspected
//! again.

use std::{fmt, sync::Arc};

use sfs_core::{
    blob::{DigestBlob, HeaderBlob, ReadStreamBlob},
    io::ByteStream,
    DigestAlgorithm, NodeId,
};
use sfs_node_client::{BlobClient, NodeError, WriteStreamBlob};

use super::VolumeStore;

/// A node of the cluster, operable through the blob protocol surface.
#[derive(Debug, Clone)]
pub enum XNode {
    /// The current process; operations go directly to the volume layer.
    Local(LocalNode),
    /// A peer process; operations go over the wire.
    Remote(RemoteNode),
}

impl XNode {
    /// The node's stable identifier.
    pub fn node_id(&self) -> &str {
        match self {
            XNode::Local(node) => &node.node_id,
            XNode::Remote(node) => node.client.node_id(),
        }
    }

    /// The node's network endpoint, as `host:port`.
    pub fn host_and_port(&self) -> &str {
        match self {
            XNode::Local(node) => &node.host_and_port,
            XNode::Remote(node) => node.client.host_and_port(),
        }
    }

    /// Returns true iff this node is the current process.
    pub fn is_local(&self) -> bool {
        matches!(self, XNode::Local(_))
    }

    /// The stored digests of a blob, `None` if absent.
    ///
    /// `offset` and `length` are accepted for call-site symmetry with
    /// [`create_read_stream`](Self::create_read_stream); digests always
    /// cover the whole blob.
    pub async fn checksum(
        &self,
        volume_id: &str,
        position: u64,
        offset: Option<u64>,
        length: Option<u64>,
        algorithms: &[DigestAlgorithm],
    ) -> Result<Option<DigestBlob>, NodeError> {
        match self {
            XNode::Local(node) => node
                .store
                .checksum(volume_id, position, algorithms)
                .await
                .map_err(NodeError::other),
            XNode::Remote(node) => {
                node.client
                    .checksum(volume_id, position, offset, length, algorithms)
                    .await
            }
        }
    }

    /// Deletes a blob; `None` if it was already absent or not modifiable.
    pub async fn delete(
        &self,
        volume_id: &str,
        position: u64,
    ) -> Result<Option<HeaderBlob>, NodeError> {
        match self {
            XNode::Local(node) => node
                .store
                .delete(volume_id, position)
                .await
                .map_err(NodeError::other),
            XNode::Remote(node) => node.client.delete(volume_id, position).await,
        }
    }

    /// Acknowledges a blob; `None` if there was nothing to acknowledge.
    pub async fn acknowledge(
        &self,
        volume_id: &str,
        position: u64,
    ) -> Result<Option<HeaderBlob>, NodeError> {
        match self {
            XNode::Local(node) => node
                .store
                .acknowledge(volume_id, position)
                .await
                .map_err(NodeError::other),
            XNode::Remote(node) => node.client.acknowledge(volume_id, position).await,
        }
    }

    /// Probes whether the volume accepts another blob.
    pub async fn can_put(&self, volume_id: &str) -> Result<bool, NodeError> {
        match self {
            XNode::Local(node) => node
                .store
                .can_put(volume_id)
                .await
                .map_err(NodeError::other),
            XNode::Remote(node) => node.client.can_put(volume_id).await,
        }
    }

    /// Opens a read stream for a blob; `None` if the blob is absent.
    pub async fn create_read_stream(
        &self,
        volume_id: &str,
        position: u64,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> Result<Option<ReadStreamBlob>, NodeError> {
        match self {
            XNode::Local(node) => node
                .store
                .read(volume_id, position, offset, length)
                .await
                .map_err(NodeError::other),
            XNode::Remote(node) => {
                node.client
                    .create_read_stream(volume_id, position, offset, length)
                    .await
            }
        }
    }

    /// Opens a write stream for a new blob of `length` bytes.
    ///
    /// No I/O happens until the stream is driven with a source.
    pub fn create_write_stream(
        &self,
        volume_id: &str,
        length: u64,
        algorithms: &[DigestAlgorithm],
    ) -> NodeWriteStream {
        match self {
            XNode::Local(node) => NodeWriteStream::Local {
                store: node.store.clone(),
                volume_id: volume_id.to_owned(),
                length,
                algorithms: algorithms.to_vec(),
            },
            XNode::Remote(node) => NodeWriteStream::Remote(node.client.create_write_stream(
                volume_id,
                length,
                algorithms,
            )),
        }
    }
}

/// The current process, serving blob operations by direct volume access.
#[derive(Clone)]
pub struct LocalNode {
    node_id: NodeId,
    host_and_port: String,
    store: Arc<dyn VolumeStore>,
}

impl LocalNode {
    /// Binds the local volume layer to this process's cluster identity.
    pub fn new(
        node_id: impl Into<NodeId>,
        host_and_port: impl Into<String>,
        store: Arc<dyn VolumeStore>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            host_and_port: host_and_port.into(),
            store,
        }
    }
}

impl fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalNode")
            .field("node_id", &self.node_id)
            .field("host_and_port", &self.host_and_port)
            .finish_non_exhaustive()
    }
}

/// A peer node, bound to its protocol client.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    client: BlobClient,
}

impl RemoteNode {
    /// Wraps a protocol client for the peer.
    pub fn new(client: BlobClient) -> Self {
        Self { client }
    }
}

/// A pending blob write against one node's volume.
pub enum NodeWriteStream {
    /// Write into the local volume layer.
    Local {
        /// The local volume layer.
        store: Arc<dyn VolumeStore>,
        /// The target volume.
        volume_id: String,
        /// Payload bytes the volume expects.
        length: u64,
        /// Digests the volume should compute.
        algorithms: Vec<DigestAlgorithm>,
    },
    /// Write over the wire.
    Remote(WriteStreamBlob),
}

impl NodeWriteStream {
    /// The number of payload bytes the target expects.
    pub fn length(&self) -> u64 {
        match self {
            NodeWriteStream::Local { length, .. } => *length,
            NodeWriteStream::Remote(stream) => stream.length(),
        }
    }

    /// Drives the write from `source` and returns the receipt.
    pub async fn consume(self, source: ByteStream) -> Result<DigestBlob, NodeError> {
        match self {
            NodeWriteStream::Local {
                store,
                volume_id,
                length,
                algorithms,
            } => store
                .write(&volume_id, length, &algorithms, source)
                .await
                .map_err(NodeError::other),
            NodeWriteStream::Remote(stream) => stream.consume(source).await,
        }
    }
}

impl fmt::Debug for NodeWriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeWriteStream::Local {
                volume_id, length, ..
            } => f
                .debug_struct("NodeWriteStream::Local")
                .field("volume_id", volume_id)
                .field("length", length)
                .finish_non_exhaustive(),
            NodeWriteStream::Remote(stream) => f
                .debug_tuple("NodeWriteStream::Remote")
                .field(stream)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use sfs_test_utils::Result as TestResult;

    use super::*;
    use crate::test_utils::MemVolumeStore;

    fn local_node(store: Arc<MemVolumeStore>) -> XNode {
        XNode::Local(LocalNode::new("n1", "10.0.0.1:8080", store))
    }

    #[tokio::test]
    async fn local_node_round_trips_a_blob() -> TestResult {
        let store = Arc::new(MemVolumeStore::with_volumes(["v1"]));
        let node = local_node(store.clone());
        assert!(node.can_put("v1").await?);

        let position = store.insert_blob("v1", b"payload");
        let read = node
            .create_read_stream("v1", position, None, None)
            .await?
            .expect("blob is present");
        assert_eq!(read.length(), 7);

        let checksum = node
            .checksum("v1", position, None, None, &[DigestAlgorithm::Sha512])
            .await?
            .expect("blob is present");
        assert_eq!(
            checksum.digest(DigestAlgorithm::Sha512).map(<[u8]>::to_vec),
            Some(DigestAlgorithm::Sha512.digest(b"payload")),
        );

        let deleted = node.delete("v1", position).await?;
        assert!(deleted.is_some());
        assert!(node.create_read_stream("v1", position, None, None).await?.is_none());
        assert!(node.delete("v1", position).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn local_write_stream_stores_and_digests() -> TestResult {
        let store = Arc::new(MemVolumeStore::with_volumes(["v1"]));
        let node = local_node(store.clone());

        let stream = node.create_write_stream("v1", 5, &[DigestAlgorithm::Sha512]);
        assert_eq!(stream.length(), 5);
        let receipt = stream
            .consume(crate::test_utils::byte_source(b"hello", 2))
            .await?;
        assert_eq!(receipt.volume, "v1");
        assert_eq!(receipt.length, 5);
        assert_eq!(receipt.role(), None);
        assert_eq!(
            receipt.digest(DigestAlgorithm::Sha512).map(<[u8]>::to_vec),
            Some(DigestAlgorithm::Sha512.digest(b"hello")),
        );
        assert!(store.contains("v1", receipt.position));
        Ok(())
    }

    #[tokio::test]
    async fn acknowledge_marks_the_stored_blob() -> TestResult {
        let store = Arc::new(MemVolumeStore::with_volumes(["v1"]));
        let node = local_node(store.clone());
        let position = store.insert_blob("v1", b"payload");

        assert!(node.acknowledge("v1", position).await?.is_some());
        assert!(node.acknowledge("v1", 999).await?.is_none());
        Ok(())
    }
}
