// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! The replica group planner: selects target volumes across candidate
//! nodes, opens a write stream on each, and drives them all from a single
//! byte source.

use bytes::Bytes;
use futures::{future::try_join_all, StreamExt, TryFutureExt};
use sfs_core::{
    blob::DigestBlob,
    cluster::ServiceDef,
    io::{combine_delay_error, tee, ByteStream},
    DigestAlgorithm, VolumeId,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::BalanceError,
    nodes::{NodeDirectory, XNode},
};

/// Plans and executes the placement of one segment payload onto a group of
/// primary and replica targets.
#[derive(Debug, Clone, Copy)]
pub struct ReplicaGroup {
    primaries: usize,
    replicas: usize,
    allow_same_node: bool,
}

impl ReplicaGroup {
    /// Creates a planner for `primaries` primary and `replicas` replica
    /// targets.
    pub fn new(primaries: usize, replicas: usize, allow_same_node: bool) -> Self {
        Self {
            primaries,
            replicas,
            allow_same_node,
        }
    }

    /// The total number of targets the group must place.
    pub fn total(&self) -> usize {
        self.primaries + self.replicas
    }

    /// Streams `source` onto `total()` freshly selected targets and returns
    /// the per-target receipts in assignment order (primaries first).
    ///
    /// Candidate volumes already holding a copy of the segment must have
    /// been filtered out of `candidates` by the caller. Either every target
    /// acknowledges the identical digest or the whole group fails; partial
    /// placements are reported as errors, never as results.
    pub async fn consume(
        &self,
        directory: &dyn NodeDirectory,
        candidates: impl IntoIterator<Item = ServiceDef>,
        length: u64,
        algorithm: DigestAlgorithm,
        source: ByteStream,
    ) -> Result<Vec<(XNode, DigestBlob)>, BalanceError> {
        let targets = self.assign_targets(directory, candidates).await?;

        let mut sinks = Vec::with_capacity(targets.len());
        let mut writes = Vec::with_capacity(targets.len());
        for (node, volume_id) in &targets {
            let write_stream = node.create_write_stream(volume_id, length, &[algorithm]);
            let (sink, feed) = mpsc::channel::<Bytes>(1);
            sinks.push(sink);
            writes.push(
                write_stream
                    .consume(ReceiverStream::new(feed).map(Ok).boxed())
                    .map_err(BalanceError::from),
            );
        }

        let receipts = combine_delay_error(
            tee(source, sinks).map_err(BalanceError::from),
            try_join_all(writes),
            |_bytes_copied, receipts| receipts,
        )
        .await?;

        let results: Vec<(XNode, DigestBlob)> = targets
            .into_iter()
            .zip(receipts)
            .enumerate()
            .map(|(index, ((node, _volume_id), mut receipt))| {
                if receipt.role().is_none() {
                    // The peer's volume did not report a role; the
                    // assignment order decides it.
                    if index < self.primaries {
                        receipt.primary = Some(true);
                    } else {
                        receipt.replica = Some(true);
                    }
                }
                (node, receipt)
            })
            .collect();

        self.check_digests(&results, algorithm)?;
        Ok(results)
    }

    /// Walks the candidates, probing volumes with `can_put` until the group
    /// is fully assigned.
    async fn assign_targets(
        &self,
        directory: &dyn NodeDirectory,
        candidates: impl IntoIterator<Item = ServiceDef>,
    ) -> Result<Vec<(XNode, VolumeId)>, BalanceError> {
        let wanted = self.total();
        let mut targets: Vec<(XNode, VolumeId)> = Vec::with_capacity(wanted);

        'nodes: for candidate in candidates {
            if targets.len() == wanted {
                break;
            }
            let Some(node) = directory.lookup(&candidate.node_id) else {
                tracing::debug!(node_id = %candidate.node_id, "candidate node is not resolvable");
                continue;
            };
            for volume in candidate.usable_volumes() {
                match node.can_put(&volume.id).await {
                    Ok(true) => {
                        targets.push((node.clone(), volume.id.clone()));
                        if targets.len() == wanted {
                            break 'nodes;
                        }
                        if !self.allow_same_node {
                            continue 'nodes;
                        }
                    }
                    Ok(false) => {
                        if !self.allow_same_node {
                            continue 'nodes;
                        }
                    }
                    Err(error) => {
                        tracing::debug!(
                            node_id = %candidate.node_id,
                            volume_id = %volume.id,
                            error = %error,
                            "capacity probe failed",
                        );
                        if !self.allow_same_node {
                            continue 'nodes;
                        }
                    }
                }
            }
        }

        if targets.len() < wanted {
            return Err(BalanceError::InsufficientCapacity {
                requested: wanted,
                obtained: targets.len(),
            });
        }
        Ok(targets)
    }

    /// Every receipt must carry the requested digest and all digests must
    /// agree.
    fn check_digests(
        &self,
        results: &[(XNode, DigestBlob)],
        algorithm: DigestAlgorithm,
    ) -> Result<(), BalanceError> {
        let mut expected: Option<&[u8]> = None;
        let mut consistent = true;
        for (_, receipt) in results {
            match (receipt.digest(algorithm), expected) {
                (None, _) => consistent = false,
                (Some(digest), None) => expected = Some(digest),
                (Some(digest), Some(reference)) if digest != reference => consistent = false,
                (Some(_), Some(_)) => {}
            }
            if !consistent {
                break;
            }
        }
        if consistent {
            return Ok(());
        }
        Err(BalanceError::DigestMismatch {
            algorithm,
            digests: results
                .iter()
                .map(|(node, receipt)| {
                    (
                        node.node_id().to_owned(),
                        receipt.digest(algorithm).map(hex::encode),
                    )
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use sfs_core::BlobRole;
    use sfs_test_utils::Result as TestResult;

    use super::*;
    use crate::test_utils::{byte_source, TestCluster};

    const PAYLOAD: &[u8] = b"twelve bytes";

    async fn place(
        cluster: &TestCluster,
        group: ReplicaGroup,
    ) -> Result<Vec<(XNode, DigestBlob)>, BalanceError> {
        group
            .consume(
                cluster,
                cluster.service_defs(),
                PAYLOAD.len() as u64,
                DigestAlgorithm::Sha512,
                byte_source(PAYLOAD, 4),
            )
            .await
    }

    #[tokio::test]
    async fn places_primaries_then_replicas_in_assignment_order() -> TestResult {
        let cluster = TestCluster::new()
            .with_node("a", ["va"])
            .with_node("b", ["vb"])
            .with_node("c", ["vc"]);

        let results = place(&cluster, ReplicaGroup::new(2, 1, false)).await?;
        assert_eq!(results.len(), 3);

        let roles: Vec<_> = results
            .iter()
            .map(|(_, receipt)| receipt.role().unwrap())
            .collect();
        assert_eq!(
            roles,
            [BlobRole::Primary, BlobRole::Primary, BlobRole::Replica]
        );

        let expected = DigestAlgorithm::Sha512.digest(PAYLOAD);
        for (node, receipt) in &results {
            assert_eq!(receipt.digest(DigestAlgorithm::Sha512), Some(&expected[..]));
            assert_eq!(receipt.length, PAYLOAD.len() as u64);
            assert!(cluster.store(node.node_id()).contains(&receipt.volume, receipt.position));
        }
        Ok(())
    }

    #[tokio::test]
    async fn one_target_per_node_without_allow_same_node() -> TestResult {
        let cluster = TestCluster::new()
            .with_node("a", ["va1", "va2", "va3"])
            .with_node("b", ["vb1", "vb2"]);

        let error = place(&cluster, ReplicaGroup::new(3, 0, false))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            BalanceError::InsufficientCapacity {
                requested: 3,
                obtained: 2
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn same_node_volumes_are_assignable_when_allowed() -> TestResult {
        let cluster = TestCluster::new()
            .with_node("a", ["va1", "va2"])
            .with_node("b", ["vb1"]);

        let results = place(&cluster, ReplicaGroup::new(3, 0, true)).await?;
        let volumes: BTreeSet<_> = results
            .iter()
            .map(|(_, receipt)| receipt.volume.clone())
            .collect();
        assert_eq!(volumes.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn nodes_refusing_puts_are_skipped() -> TestResult {
        let cluster = TestCluster::new()
            .with_node("a", ["va"])
            .with_node("b", ["vb"])
            .with_node("c", ["vc"]);
        cluster.store("b").refuse_puts("vb");

        let results = place(&cluster, ReplicaGroup::new(2, 0, false)).await?;
        let nodes: BTreeSet<_> = results
            .iter()
            .map(|(node, _)| node.node_id().to_owned())
            .collect();
        assert!(!nodes.contains("b"));
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_digests_fail_the_whole_group() -> TestResult {
        let cluster = TestCluster::new()
            .with_node("a", ["va"])
            .with_node("b", ["vb"]);
        cluster.store("b").corrupt_digests_on("vb");

        let error = place(&cluster, ReplicaGroup::new(2, 0, false))
            .await
            .unwrap_err();
        let BalanceError::DigestMismatch { digests, .. } = error else {
            panic!("expected a digest mismatch, got {error}");
        };
        assert_eq!(digests.len(), 2);
        assert_ne!(digests[0].1, digests[1].1);
        Ok(())
    }

    #[tokio::test]
    async fn failing_source_aborts_every_write() -> TestResult {
        let cluster = TestCluster::new()
            .with_node("a", ["va"])
            .with_node("b", ["vb"]);

        let group = ReplicaGroup::new(2, 0, false);
        let error = group
            .consume(
                &cluster,
                cluster.service_defs(),
                64,
                DigestAlgorithm::Sha512,
                crate::test_utils::failing_byte_source(b"part"),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), "transport");
        assert_eq!(cluster.store("a").blob_count("va"), 0);
        assert_eq!(cluster.store("b").blob_count("vb"), 0);
        Ok(())
    }
}
