// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Locating a readable copy of a segment.

use sfs_core::{
    blob::ReadStreamBlob,
    segment::{BlobReference, Segment},
    BlobRole,
};

use crate::{index::owner_of, nodes::NodeDirectory};

/// Opens a read stream for the segment from any healthy copy.
///
/// Candidates are tried in order: eligible primaries, then eligible
/// replicas. With `prefer_verified` the remaining non-deleted references are
/// tried only after every eligible copy failed to open; without it they are
/// part of the regular order. The first copy that opens wins; candidates
/// that fail to open are skipped. Returns `None` when no copy opens.
pub async fn segment_read_stream(
    directory: &dyn NodeDirectory,
    segment: &Segment,
    prefer_verified: bool,
) -> Option<ReadStreamBlob> {
    let eligible = segment
        .eligible(BlobRole::Primary)
        .chain(segment.eligible(BlobRole::Replica));
    let unverified = segment
        .remaining(BlobRole::Primary)
        .chain(segment.remaining(BlobRole::Replica))
        .filter(|(_, blob)| !blob.is_eligible());

    let candidates: Vec<&BlobReference> = if prefer_verified {
        eligible.chain(unverified).map(|(_, blob)| blob).collect()
    } else {
        segment
            .remaining(BlobRole::Primary)
            .chain(segment.remaining(BlobRole::Replica))
            .map(|(_, blob)| blob)
            .collect()
    };

    for blob in candidates {
        let Some(node) = owner_of(directory, &blob.volume_id) else {
            tracing::debug!(volume_id = %blob.volume_id, "copy has no resolvable owner");
            continue;
        };
        match node
            .create_read_stream(&blob.volume_id, blob.position, None, None)
            .await
        {
            Ok(Some(stream)) => return Some(stream),
            Ok(None) => {
                tracing::debug!(volume_id = %blob.volume_id, position = blob.position, "copy is gone");
            }
            Err(error) => {
                tracing::debug!(
                    volume_id = %blob.volume_id,
                    position = blob.position,
                    error = %error,
                    "copy is not readable",
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use sfs_core::segment::BlobReference;
    use sfs_test_utils::{async_param_test, Result as TestResult};

    use super::*;
    use crate::test_utils::TestCluster;

    fn segment_with_copy(
        cluster: &TestCluster,
        node_id: &str,
        volume_id: &str,
        role: BlobRole,
        acked: bool,
    ) -> Segment {
        let payload = b"segment payload";
        let position = cluster.store(node_id).insert_blob(volume_id, payload);
        let mut segment = Segment::new("seg-1", payload.len() as u64);
        let mut blob =
            BlobReference::new(volume_id, position, payload.len() as u64, role);
        blob.acked = acked;
        segment.push_blob(blob);
        segment
    }

    #[tokio::test]
    async fn opens_an_eligible_primary() -> TestResult {
        let cluster = TestCluster::new().with_node("a", ["va"]);
        let segment = segment_with_copy(&cluster, "a", "va", BlobRole::Primary, true);

        let stream = segment_read_stream(&cluster, &segment, true).await;
        assert_eq!(stream.expect("copy opens").length(), 15);
        Ok(())
    }

    #[tokio::test]
    async fn falls_back_to_an_eligible_replica() -> TestResult {
        let cluster = TestCluster::new().with_node("a", ["va"]).with_node("b", ["vb"]);
        let mut segment = segment_with_copy(&cluster, "b", "vb", BlobRole::Replica, true);

        // A primary reference whose copy was never written.
        let mut missing = BlobReference::new("va", 404, 15, BlobRole::Primary);
        missing.acked = true;
        segment.push_blob(missing);

        let stream = segment_read_stream(&cluster, &segment, true).await;
        assert!(stream.is_some());
        Ok(())
    }

    async_param_test! {
        unverified_copies_still_open -> TestResult: [
            preferring_verified: (true),
            unfiltered: (false),
        ]
    }
    async fn unverified_copies_still_open(prefer_verified: bool) -> TestResult {
        let cluster = TestCluster::new().with_node("a", ["va"]);
        let segment = segment_with_copy(&cluster, "a", "va", BlobRole::Primary, false);

        assert!(segment_read_stream(&cluster, &segment, prefer_verified)
            .await
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn yields_none_when_no_copy_opens() -> TestResult {
        let cluster = TestCluster::new().with_node("a", ["va"]);
        let mut segment = Segment::new("seg-1", 15);
        let mut blob = BlobReference::new("va", 404, 15, BlobRole::Primary);
        blob.acked = true;
        segment.push_blob(blob);
        let mut unknown = BlobReference::new("v-unknown", 0, 15, BlobRole::Replica);
        unknown.acked = true;
        segment.push_blob(unknown);

        assert!(segment_read_stream(&cluster, &segment, true).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn deleted_copies_are_never_tried() -> TestResult {
        let cluster = TestCluster::new().with_node("a", ["va"]);
        let mut segment = segment_with_copy(&cluster, "a", "va", BlobRole::Primary, true);
        segment.blobs_mut()[0].deleted = true;

        assert!(segment_read_stream(&cluster, &segment, true).await.is_none());
        assert!(segment_read_stream(&cluster, &segment, false).await.is_none());
        Ok(())
    }
}
