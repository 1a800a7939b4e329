// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! The seam to the object-metadata index.
//!
//! The index is an external document store; the placement core only lists
//! the data-node roster from it and asks it to retire blob references. Both
//! operations run out-of-band of the segment mutation the core performs.

use async_trait::async_trait;
use sfs_core::{cluster::ServiceDef, segment::BlobReference};
use sfs_node_client::NodeError;

use crate::nodes::{NodeDirectory, XNode};

/// Operations the placement core needs from the metadata index.
#[async_trait]
pub trait Index: Send + Sync {
    /// A snapshot of the registered data nodes at call time.
    async fn list_data_nodes(&self) -> anyhow::Result<Vec<ServiceDef>>;

    /// Issues the physical delete for `reference` and acknowledges the
    /// removal at the index layer. Returns whether bytes were removed.
    async fn delete_blob_reference(
        &self,
        segment_id: &str,
        reference: &BlobReference,
    ) -> anyhow::Result<bool>;
}

/// The blob-side half of retiring a reference: resolve the owning node and
/// issue the protocol delete.
///
/// Returns `Ok(false)` when the volume cannot be resolved or reports the
/// blob already absent.
pub async fn delete_blob_reference(
    directory: &dyn NodeDirectory,
    reference: &BlobReference,
) -> Result<bool, NodeError> {
    let Some(node) = owner_of(directory, &reference.volume_id) else {
        tracing::debug!(volume_id = %reference.volume_id, "volume has no resolvable owner");
        return Ok(false);
    };
    let header = node.delete(&reference.volume_id, reference.position).await?;
    Ok(header.is_some())
}

pub(crate) fn owner_of(directory: &dyn NodeDirectory, volume_id: &str) -> Option<XNode> {
    directory
        .node_of_volume(volume_id)
        .and_then(|node_id| directory.lookup(&node_id))
}
