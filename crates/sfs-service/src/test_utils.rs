// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory fixtures for exercising placement and rebalancing without a
//! network or a real volume layer.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use sfs_core::{
    blob::{DigestBlob, HeaderBlob, ReadStreamBlob},
    cluster::ServiceDef,
    io::ByteStream,
    segment::BlobReference,
    DigestAlgorithm, NodeId, VolumeId,
};

use crate::{
    index::Index,
    nodes::{LocalNode, NodeDirectory, VolumeStore, XNode},
};

const READ_CHUNK_SIZE: usize = 1024;

/// A byte source over `data`, yielded in chunks of `chunk_size`.
pub fn byte_source(data: &[u8], chunk_size: usize) -> ByteStream {
    let chunks: Vec<io::Result<Bytes>> = data
        .chunks(chunk_size.max(1))
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    stream::iter(chunks).boxed()
}

/// A byte source that yields `prefix` and then fails with a connection
/// reset.
pub fn failing_byte_source(prefix: &[u8]) -> ByteStream {
    let items: Vec<io::Result<Bytes>> = vec![
        Ok(Bytes::copy_from_slice(prefix)),
        Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "source reset mid-stream",
        )),
    ];
    stream::iter(items).boxed()
}

#[derive(Debug, Default)]
struct StoredBlob {
    bytes: Vec<u8>,
    acked: bool,
}

#[derive(Debug, Default)]
struct VolumeState {
    blobs: BTreeMap<u64, StoredBlob>,
    next_position: u64,
    refuse_puts: bool,
    corrupt_digests: bool,
    fail_reads_after: Option<u64>,
}

/// An in-memory volume layer with failure injection.
#[derive(Debug, Default)]
pub struct MemVolumeStore {
    volumes: Mutex<HashMap<VolumeId, VolumeState>>,
}

impl MemVolumeStore {
    /// An empty store with the given volumes.
    pub fn with_volumes<I, S>(volume_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<VolumeId>,
    {
        let store = Self::default();
        {
            let mut volumes = store.volumes.lock().unwrap();
            for id in volume_ids {
                volumes.insert(id.into(), VolumeState::default());
            }
        }
        store
    }

    fn with_volume<R>(&self, volume_id: &str, f: impl FnOnce(&mut VolumeState) -> R) -> io::Result<R> {
        let mut volumes = self.volumes.lock().unwrap();
        let state = volumes
            .get_mut(volume_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such volume"))?;
        Ok(f(state))
    }

    /// Stores `bytes` directly and returns the assigned position.
    pub fn insert_blob(&self, volume_id: &str, bytes: &[u8]) -> u64 {
        self.with_volume(volume_id, |state| {
            let position = state.next_position;
            state.next_position += 1;
            state.blobs.insert(
                position,
                StoredBlob {
                    bytes: bytes.to_vec(),
                    acked: false,
                },
            );
            position
        })
        .expect("volume exists")
    }

    /// Drops a stored blob, as the volume garbage collector would.
    pub fn remove_blob(&self, volume_id: &str, position: u64) {
        self.with_volume(volume_id, |state| {
            state.blobs.remove(&position);
        })
        .expect("volume exists");
    }

    /// Number of blobs currently stored on the volume.
    pub fn blob_count(&self, volume_id: &str) -> usize {
        self.with_volume(volume_id, |state| state.blobs.len())
            .expect("volume exists")
    }

    /// Whether a blob is stored at the given position.
    pub fn contains(&self, volume_id: &str, position: u64) -> bool {
        self.with_volume(volume_id, |state| state.blobs.contains_key(&position))
            .expect("volume exists")
    }

    /// Whether the blob at the given position is acknowledged.
    pub fn is_acked(&self, volume_id: &str, position: u64) -> bool {
        self.with_volume(volume_id, |state| {
            state
                .blobs
                .get(&position)
                .map(|blob| blob.acked)
                .unwrap_or(false)
        })
        .expect("volume exists")
    }

    /// Makes capacity probes against the volume fail.
    pub fn refuse_puts(&self, volume_id: &str) {
        self.with_volume(volume_id, |state| state.refuse_puts = true)
            .expect("volume exists");
    }

    /// Makes write receipts from the volume carry a corrupted digest.
    pub fn corrupt_digests_on(&self, volume_id: &str) {
        self.with_volume(volume_id, |state| state.corrupt_digests = true)
            .expect("volume exists");
    }

    /// Makes read streams from the volume fail after `bytes` payload bytes.
    pub fn fail_reads_after(&self, volume_id: &str, bytes: u64) {
        self.with_volume(volume_id, |state| state.fail_reads_after = Some(bytes))
            .expect("volume exists");
    }

    fn digests_of(
        state: &VolumeState,
        bytes: &[u8],
        algorithms: &[DigestAlgorithm],
    ) -> BTreeMap<DigestAlgorithm, Vec<u8>> {
        algorithms
            .iter()
            .map(|algorithm| {
                let mut digest = algorithm.digest(bytes);
                if state.corrupt_digests {
                    digest[0] ^= 0xff;
                }
                (*algorithm, digest)
            })
            .collect()
    }
}

#[async_trait]
impl VolumeStore for MemVolumeStore {
    async fn checksum(
        &self,
        volume_id: &str,
        position: u64,
        algorithms: &[DigestAlgorithm],
    ) -> io::Result<Option<DigestBlob>> {
        self.with_volume(volume_id, |state| {
            state.blobs.get(&position).map(|blob| DigestBlob {
                volume: volume_id.to_owned(),
                primary: None,
                replica: None,
                position,
                length: blob.bytes.len() as u64,
                digests: Self::digests_of(state, &blob.bytes, algorithms),
            })
        })
    }

    async fn delete(&self, volume_id: &str, position: u64) -> io::Result<Option<HeaderBlob>> {
        self.with_volume(volume_id, |state| {
            state
                .blobs
                .remove(&position)
                .map(|_| HeaderBlob::new(volume_id, position))
        })
    }

    async fn acknowledge(
        &self,
        volume_id: &str,
        position: u64,
    ) -> io::Result<Option<HeaderBlob>> {
        self.with_volume(volume_id, |state| {
            state.blobs.get_mut(&position).map(|blob| {
                blob.acked = true;
                HeaderBlob::new(volume_id, position)
            })
        })
    }

    async fn can_put(&self, volume_id: &str) -> io::Result<bool> {
        let refused = self.with_volume(volume_id, |state| state.refuse_puts)?;
        if refused {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "volume refuses writes",
            ));
        }
        Ok(true)
    }

    async fn read(
        &self,
        volume_id: &str,
        position: u64,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> io::Result<Option<ReadStreamBlob>> {
        let (bytes, fail_after) = match self.with_volume(volume_id, |state| {
            state
                .blobs
                .get(&position)
                .map(|blob| (blob.bytes.clone(), state.fail_reads_after))
        })? {
            Some(found) => found,
            None => return Ok(None),
        };

        let full_length = bytes.len() as u64;
        let start = offset.unwrap_or(0).min(full_length) as usize;
        let end = length
            .map(|l| (start as u64 + l).min(full_length))
            .unwrap_or(full_length) as usize;
        let window = &bytes[start..end];

        let mut items: Vec<io::Result<Bytes>> = Vec::new();
        match fail_after {
            Some(good_bytes) => {
                let good = &window[..(good_bytes as usize).min(window.len())];
                items.extend(
                    good.chunks(READ_CHUNK_SIZE)
                        .map(|chunk| Ok(Bytes::copy_from_slice(chunk))),
                );
                items.push(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "volume read failed mid-stream",
                )));
            }
            None => {
                items.extend(
                    window
                        .chunks(READ_CHUNK_SIZE)
                        .map(|chunk| Ok(Bytes::copy_from_slice(chunk))),
                );
            }
        }
        Ok(Some(ReadStreamBlob::new(
            (end - start) as u64,
            stream::iter(items).boxed(),
        )))
    }

    async fn write(
        &self,
        volume_id: &str,
        length: u64,
        algorithms: &[DigestAlgorithm],
        mut source: ByteStream,
    ) -> io::Result<DigestBlob> {
        let refused = self.with_volume(volume_id, |state| state.refuse_puts)?;
        if refused {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "volume refuses writes",
            ));
        }

        let mut received = Vec::with_capacity(length as usize);
        while let Some(chunk) = source.next().await {
            received.extend_from_slice(&chunk?);
        }
        if received.len() as u64 != length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {length} payload bytes, received {}", received.len()),
            ));
        }

        self.with_volume(volume_id, |state| {
            let digests = Self::digests_of(state, &received, algorithms);
            let position = state.next_position;
            state.next_position += 1;
            state.blobs.insert(
                position,
                StoredBlob {
                    bytes: received,
                    acked: false,
                },
            );
            DigestBlob {
                volume: volume_id.to_owned(),
                primary: None,
                replica: None,
                position,
                length,
                digests,
            }
        })
    }
}

/// A cluster of all-local nodes backed by [`MemVolumeStore`]s.
#[derive(Clone, Default)]
pub struct TestCluster {
    stores: HashMap<NodeId, Arc<MemVolumeStore>>,
    defs: Vec<ServiceDef>,
}

impl TestCluster {
    /// An empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a data node with the given volumes.
    pub fn with_node<I, S>(mut self, node_id: &str, volume_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<VolumeId>,
    {
        let volume_ids: Vec<VolumeId> = volume_ids.into_iter().map(Into::into).collect();
        let host_and_port = format!("10.0.0.{}:8080", self.defs.len() + 1);
        let mut def = ServiceDef::new(node_id, host_and_port);
        for volume_id in &volume_ids {
            def = def.with_volume(volume_id.clone());
        }
        self.defs.push(def);
        self.stores.insert(
            node_id.to_owned(),
            Arc::new(MemVolumeStore::with_volumes(volume_ids)),
        );
        self
    }

    /// The store backing a node.
    ///
    /// # Panics
    ///
    /// Panics if the node is unknown.
    pub fn store(&self, node_id: &str) -> Arc<MemVolumeStore> {
        self.stores
            .get(node_id)
            .unwrap_or_else(|| panic!("unknown test node {node_id}"))
            .clone()
    }

    /// A roster snapshot of the cluster.
    pub fn service_defs(&self) -> Vec<ServiceDef> {
        self.defs.clone()
    }

    /// A shareable directory over the cluster.
    pub fn directory(&self) -> Arc<dyn NodeDirectory> {
        Arc::new(self.clone())
    }
}

impl NodeDirectory for TestCluster {
    fn lookup(&self, node_id: &str) -> Option<XNode> {
        let def = self.defs.iter().find(|def| def.node_id == node_id)?;
        let store = self.stores.get(node_id)?.clone();
        Some(XNode::Local(LocalNode::new(
            def.node_id.clone(),
            def.host_and_port.clone(),
            store,
        )))
    }

    fn node_of_volume(&self, volume_id: &str) -> Option<NodeId> {
        self.defs.iter().find_map(|def| {
            def.volumes
                .iter()
                .any(|volume| volume.id == volume_id)
                .then(|| def.node_id.clone())
        })
    }
}

/// An index stub that performs physical deletes through the directory and
/// records the calls.
pub struct RecordingIndex {
    directory: Arc<dyn NodeDirectory>,
    data_nodes: Vec<ServiceDef>,
    delete_calls: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl RecordingIndex {
    /// An index over the given directory with an empty roster.
    pub fn new(directory: Arc<dyn NodeDirectory>) -> Self {
        Self {
            directory,
            data_nodes: Vec::new(),
            delete_calls: AtomicUsize::new(0),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Sets the roster returned by `list_data_nodes`.
    pub fn with_data_nodes(mut self, data_nodes: Vec<ServiceDef>) -> Self {
        self.data_nodes = data_nodes;
        self
    }

    /// How many delete requests the index has received.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Makes every further delete request fail.
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Index for RecordingIndex {
    async fn list_data_nodes(&self) -> anyhow::Result<Vec<ServiceDef>> {
        Ok(self.data_nodes.clone())
    }

    async fn delete_blob_reference(
        &self,
        _segment_id: &str,
        reference: &BlobReference,
    ) -> anyhow::Result<bool> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("index delete failed");
        }
        crate::index::delete_blob_reference(self.directory.as_ref(), reference)
            .await
            .map_err(anyhow::Error::from)
    }
}
