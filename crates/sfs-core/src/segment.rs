// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Segments and the blob references that track their stored copies.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{BlobRole, DigestAlgorithm, VolumeId};

/// One stored copy of a segment's payload.
///
/// A reference is created un-acked by a write; a separate bulk reconciler
/// later verifies the copy and flips `acked`. Balance-down marks surplus
/// references `deleted`; the owning volume reclaims the bytes lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobReference {
    /// The volume holding the copy.
    pub volume_id: VolumeId,
    /// The copy's position on the volume.
    pub position: u64,
    /// The number of payload bytes stored.
    pub length: u64,
    /// Whether the copy counts as a primary or a replica.
    pub role: BlobRole,
    /// Digests recorded at write time, keyed by algorithm.
    #[serde(default)]
    pub token_digests: BTreeMap<DigestAlgorithm, Vec<u8>>,
    /// Number of failed verification attempts against the stored bytes.
    #[serde(default)]
    pub verify_fail_count: u32,
    /// Whether the index has acknowledged the copy.
    #[serde(default)]
    pub acked: bool,
    /// Whether the copy has been marked for removal.
    #[serde(default)]
    pub deleted: bool,
}

impl BlobReference {
    /// Creates a fresh, un-acked reference.
    pub fn new(volume_id: impl Into<VolumeId>, position: u64, length: u64, role: BlobRole) -> Self {
        Self {
            volume_id: volume_id.into(),
            position,
            length,
            role,
            token_digests: BTreeMap::new(),
            verify_fail_count: 0,
            acked: false,
            deleted: false,
        }
    }

    /// Records a digest computed over the stored bytes.
    pub fn with_digest(mut self, algorithm: DigestAlgorithm, digest: Vec<u8>) -> Self {
        self.token_digests.insert(algorithm, digest);
        self
    }

    /// Marks the reference acknowledged.
    pub fn acked(mut self) -> Self {
        self.acked = true;
        self
    }

    /// A reference is eligible iff it is acked, has no verification
    /// failures, and has not been marked deleted.
    pub fn is_eligible(&self) -> bool {
        self.acked && self.verify_fail_count == 0 && !self.deleted
    }
}

/// A contiguous portion of an object's content with its own replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Identifier used for logging and index addressing.
    pub id: String,
    /// The payload length in bytes.
    pub length: u64,
    /// Whether the payload is embedded inline in the index entry, in which
    /// case the segment never needs placement.
    #[serde(default)]
    pub tiny_data: bool,
    /// Container-level replica count override, when set.
    #[serde(default)]
    pub object_replicas: Option<usize>,
    blobs: Vec<BlobReference>,
}

impl Segment {
    /// Creates an empty segment of the given payload length.
    pub fn new(id: impl Into<String>, length: u64) -> Self {
        Self {
            id: id.into(),
            length,
            tiny_data: false,
            object_replicas: None,
            blobs: Vec::new(),
        }
    }

    /// The segment's blob references, in creation order.
    pub fn blobs(&self) -> &[BlobReference] {
        &self.blobs
    }

    /// Mutable access to the segment's blob references.
    pub fn blobs_mut(&mut self) -> &mut [BlobReference] {
        &mut self.blobs
    }

    /// Appends a blob reference.
    pub fn push_blob(&mut self, blob: BlobReference) {
        self.blobs.push(blob);
    }

    /// Eligible references with the given role, with their positions in the
    /// reference list, in creation order.
    pub fn eligible(&self, role: BlobRole) -> impl Iterator<Item = (usize, &BlobReference)> {
        self.blobs
            .iter()
            .enumerate()
            .filter(move |(_, blob)| blob.role == role && blob.is_eligible())
    }

    /// Non-deleted references with the given role, eligible or not.
    pub fn remaining(&self, role: BlobRole) -> impl Iterator<Item = (usize, &BlobReference)> {
        self.blobs
            .iter()
            .enumerate()
            .filter(move |(_, blob)| blob.role == role && !blob.deleted)
    }

    /// The union of volume ids across all references, eligible or not.
    ///
    /// Deleted references are included: their bytes may still occupy the
    /// volume until the garbage collector runs.
    pub fn used_volume_ids(&self) -> BTreeSet<VolumeId> {
        self.blobs
            .iter()
            .map(|blob| blob.volume_id.clone())
            .collect()
    }
}
