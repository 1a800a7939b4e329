// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! The per-segment rebalance controller.
//!
//! A rebalance pass compares a segment's verified-and-acked copy counts
//! with its expected counts and drives the copy set towards them: surplus
//! copies are retired, missing copies are written fresh from any healthy
//! source. Convergence is eventual; a segment whose pass fails is simply
//! revisited by the next sweep.

use std::{collections::BTreeSet, sync::Arc};

use sfs_core::{
    cluster::ServiceDef,
    segment::{BlobReference, Segment},
    BlobRole, DigestAlgorithm, VolumeId,
};

use crate::{
    error::BalanceError,
    index::Index,
    nodes::{NodeDirectory, Nodes},
    reader::segment_read_stream,
    replica_group::ReplicaGroup,
};

/// Outcome of one balance-down sub-operation: positions in the segment's
/// reference list that were successfully retired.
#[derive(Debug, Default)]
struct BalanceDown {
    deleted: Vec<usize>,
}

/// Rebalances segments against a fixed roster snapshot.
pub struct RebalanceSegment {
    nodes: Nodes,
    directory: Arc<dyn NodeDirectory>,
    index: Arc<dyn Index>,
    data_nodes: Vec<ServiceDef>,
}

impl RebalanceSegment {
    /// Creates a controller over a copy of the data-node roster.
    pub fn new(
        nodes: Nodes,
        directory: Arc<dyn NodeDirectory>,
        index: Arc<dyn Index>,
        data_nodes: Vec<ServiceDef>,
    ) -> Self {
        Self {
            nodes,
            directory,
            index,
            data_nodes,
        }
    }

    /// Aligns the segment's copy counts with its expected counts.
    ///
    /// Returns whether the pass changed the segment. Sub-operation failures
    /// are logged and downgraded to "no change"; only violated invariants
    /// abort.
    ///
    /// # Panics
    ///
    /// Panics if the resolved primary and replica targets are both zero.
    pub async fn rebalance(&self, segment: &mut Segment) -> bool {
        if segment.tiny_data {
            // Inline payloads live in the index entry itself; there is
            // nothing to place.
            return true;
        }

        let primaries: Vec<(usize, BlobReference)> = segment
            .eligible(BlobRole::Primary)
            .map(|(index, blob)| (index, blob.clone()))
            .collect();
        let replicas: Vec<(usize, BlobReference)> = segment
            .eligible(BlobRole::Replica)
            .map(|(index, blob)| (index, blob.clone()))
            .collect();

        let expected_primaries = self.nodes.number_of_primaries();
        let expected_replicas = segment
            .object_replicas
            .unwrap_or_else(|| self.nodes.number_of_replicas());
        assert!(
            expected_primaries + expected_replicas >= 1,
            "number of primary plus replica copies must be at least one",
        );

        let primaries_needed = expected_primaries as i64 - primaries.len() as i64;
        let replicas_needed = expected_replicas as i64 - replicas.len() as i64;

        let balance_up = async {
            if primaries_needed > 0 || replicas_needed > 0 {
                self.balance_up(
                    segment,
                    segment.used_volume_ids(),
                    primaries_needed.max(0) as usize,
                    replicas_needed.max(0) as usize,
                )
                .await
            } else {
                Ok(None)
            }
        };
        let balance_down_primaries = async {
            if primaries_needed < 0 {
                self.balance_down(&segment.id, &primaries, primaries_needed.unsigned_abs() as usize)
                    .await
            } else {
                Ok(BalanceDown::default())
            }
        };
        let balance_down_replicas = async {
            if replicas_needed < 0 {
                self.balance_down(&segment.id, &replicas, replicas_needed.unsigned_abs() as usize)
                    .await
            } else {
                Ok(BalanceDown::default())
            }
        };

        let (up, down_primaries, down_replicas) =
            tokio::join!(balance_up, balance_down_primaries, balance_down_replicas);

        let up_changed = match up {
            Ok(Some(new_blobs)) => {
                for blob in new_blobs {
                    segment.push_blob(blob);
                }
                true
            }
            Ok(None) => false,
            Err(error) => {
                tracing::error!(
                    segment_id = %segment.id,
                    kind = error.kind(),
                    error = %error,
                    "balance up failed",
                );
                false
            }
        };
        let down_primaries_changed =
            Self::apply_down(segment, down_primaries, "balance down primaries failed");
        let down_replicas_changed =
            Self::apply_down(segment, down_replicas, "balance down replicas failed");

        up_changed || down_primaries_changed || down_replicas_changed
    }

    fn apply_down(
        segment: &mut Segment,
        outcome: Result<BalanceDown, BalanceError>,
        what: &str,
    ) -> bool {
        match outcome {
            Ok(down) => {
                let changed = !down.deleted.is_empty();
                for index in down.deleted {
                    segment.blobs_mut()[index].deleted = true;
                }
                changed
            }
            Err(error) => {
                tracing::error!(
                    segment_id = %segment.id,
                    kind = error.kind(),
                    error = %error,
                    "{what}",
                );
                false
            }
        }
    }

    /// Retires references in their given order until `delta` deletions
    /// succeeded.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < delta <= blobs.len()`.
    async fn balance_down(
        &self,
        segment_id: &str,
        blobs: &[(usize, BlobReference)],
        delta: usize,
    ) -> Result<BalanceDown, BalanceError> {
        assert!(delta > 0, "delta must be greater than zero");
        assert!(
            blobs.len() >= delta,
            "number of blobs must be at least {delta} but was {}",
            blobs.len(),
        );

        let mut deleted = Vec::with_capacity(delta);
        for (index, blob) in blobs {
            if deleted.len() == delta {
                break;
            }
            if self.index.delete_blob_reference(segment_id, blob).await? {
                deleted.push(*index);
            }
        }
        Ok(BalanceDown { deleted })
    }

    /// Writes the missing copies from any healthy source and returns the
    /// references to append, or `None` when no source copy opens.
    async fn balance_up(
        &self,
        segment: &Segment,
        used_volume_ids: BTreeSet<VolumeId>,
        primaries_needed: usize,
        replicas_needed: usize,
    ) -> Result<Option<Vec<BlobReference>>, BalanceError> {
        let Some(read_stream) = segment_read_stream(self.directory.as_ref(), segment, true).await
        else {
            // No readable copy right now; the next sweep will retry.
            return Ok(None);
        };

        let candidates: Vec<ServiceDef> = self
            .data_nodes
            .iter()
            .cloned()
            .map(|mut def| {
                def.volumes
                    .retain(|volume| !used_volume_ids.contains(&volume.id));
                def
            })
            .filter(|def| !def.volumes.is_empty())
            .collect();

        let group = ReplicaGroup::new(
            primaries_needed,
            replicas_needed,
            self.nodes.is_allow_same_node(),
        );
        let length = read_stream.length();
        let results = group
            .consume(
                self.directory.as_ref(),
                candidates,
                length,
                DigestAlgorithm::Sha512,
                read_stream.into_stream(),
            )
            .await?;

        let mut new_blobs = Vec::with_capacity(results.len());
        for (_node, receipt) in results {
            let role = if receipt.is_primary() {
                BlobRole::Primary
            } else {
                BlobRole::Replica
            };
            let digest = receipt
                .digest(DigestAlgorithm::Sha512)
                .expect("the digest gate guarantees a digest")
                .to_vec();
            // The new references stay un-acked: the bulk index updater acks
            // them once their records are persisted. Acking here could leave
            // a volume holding an acked blob the index knows nothing about,
            // pinning bytes the volume garbage collector must stay free to
            // reclaim after a failed index write.
            new_blobs.push(
                BlobReference::new(receipt.volume, receipt.position, receipt.length, role)
                    .with_digest(DigestAlgorithm::Sha512, digest),
            );
        }
        Ok(Some(new_blobs))
    }
}
