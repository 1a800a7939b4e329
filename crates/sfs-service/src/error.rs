// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Failures of placement and rebalancing operations.

use sfs_core::{io::PumpError, DigestAlgorithm, NodeId};
use sfs_node_client::NodeError;

/// Error raised while planning or executing a change to a segment's copies.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    /// The planner could not find enough target volumes.
    #[error("insufficient capacity: requested {requested} target volumes, obtained {obtained}")]
    InsufficientCapacity {
        /// Number of target volumes the planner needed.
        requested: usize,
        /// Number of target volumes it could assign.
        obtained: usize,
    },

    /// The write receipts disagree on the payload digest.
    #[error("write receipts disagree on the {algorithm} digest: {digests:?}")]
    DigestMismatch {
        /// The digest algorithm that was compared.
        algorithm: DigestAlgorithm,
        /// Per-target digests as lowercase hex, `None` where absent.
        digests: Vec<(NodeId, Option<String>)>,
    },

    /// A node operation failed.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The byte pipeline between source and targets failed.
    #[error(transparent)]
    Stream(#[from] PumpError),

    /// The metadata index could not complete an operation.
    #[error("index operation failed: {0}")]
    Index(#[from] anyhow::Error),
}

impl BalanceError {
    /// A short machine-readable label for the class of failure, for log
    /// records.
    pub fn kind(&self) -> &'static str {
        match self {
            BalanceError::InsufficientCapacity { .. } => "insufficient-capacity",
            BalanceError::DigestMismatch { .. } => "digest-mismatch",
            BalanceError::Node(error) => error.kind(),
            BalanceError::Stream(PumpError::Source { .. }) => "transport",
            BalanceError::Stream(PumpError::SinkClosed { .. }) => "stream",
            BalanceError::Index(_) => "index",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use sfs_test_utils::param_test;

    use super::*;

    param_test! {
        kinds: [
            capacity: (
                BalanceError::InsufficientCapacity { requested: 4, obtained: 2 },
                "insufficient-capacity"
            ),
            mismatch: (
                BalanceError::DigestMismatch {
                    algorithm: DigestAlgorithm::Sha512,
                    digests: vec![("n1".to_owned(), None)],
                },
                "digest-mismatch"
            ),
            source_failure: (
                BalanceError::Stream(PumpError::Source {
                    bytes_copied: 0,
                    source: io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
                }),
                "transport"
            ),
            sink_failure: (
                BalanceError::Stream(PumpError::SinkClosed { bytes_copied: 0 }),
                "stream"
            ),
            index: (BalanceError::Index(anyhow::anyhow!("gone")), "index"),
        ]
    }
    fn kinds(error: BalanceError, expected: &str) {
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn insufficient_capacity_names_both_counts() {
        let error = BalanceError::InsufficientCapacity {
            requested: 4,
            obtained: 2,
        };
        let rendered = error.to_string();
        assert!(rendered.contains('4'));
        assert!(rendered.contains('2'));
    }
}
