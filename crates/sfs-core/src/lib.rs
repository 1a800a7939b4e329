// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Core data model for SFS: node and volume identities, digest algorithms,
//! segments and their blob references, and the streaming primitives used to
//! move blob bytes between nodes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};

pub mod blob;
pub mod cluster;
pub mod io;
pub mod segment;

/// The identifier of a node, stable across restarts.
pub type NodeId = String;

/// The identifier of a volume, unique cluster-wide.
pub type VolumeId = String;

/// The role a blob copy plays within its segment's replica set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobRole {
    /// A primary copy, counted against the segment's primary target.
    Primary,
    /// A replica copy, counted against the segment's replica target.
    Replica,
}

impl BlobRole {
    /// Returns true iff this is [`BlobRole::Primary`].
    #[inline]
    pub fn is_primary(&self) -> bool {
        matches!(self, BlobRole::Primary)
    }

    /// Returns true iff this is [`BlobRole::Replica`].
    #[inline]
    pub fn is_replica(&self) -> bool {
        matches!(self, BlobRole::Replica)
    }
}

/// A content digest algorithm, identified by a short lowercase tag.
///
/// Digest equality is the sole proof that two byte sequences are identical
/// for placement purposes.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// The lowercase tag identifying the algorithm on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Computes the digest of `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown digest algorithm tag.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown digest algorithm {0:?}")]
pub struct UnknownDigestAlgorithm(String);

impl FromStr for DigestAlgorithm {
    type Err = UnknownDigestAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(UnknownDigestAlgorithm(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use sfs_test_utils::param_test;

    use super::*;

    param_test! {
        algorithm_tag_round_trips: [
            sha256: (DigestAlgorithm::Sha256, "sha256"),
            sha512: (DigestAlgorithm::Sha512, "sha512"),
        ]
    }
    fn algorithm_tag_round_trips(algorithm: DigestAlgorithm, tag: &str) {
        assert_eq!(algorithm.as_str(), tag);
        assert_eq!(tag.parse::<DigestAlgorithm>().unwrap(), algorithm);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(DigestAlgorithm::Sha256.digest(b"abc").len(), 32);
        assert_eq!(DigestAlgorithm::Sha512.digest(b"abc").len(), 64);
    }

    #[test]
    fn digest_is_deterministic() {
        let first = DigestAlgorithm::Sha512.digest(b"payload");
        let second = DigestAlgorithm::Sha512.digest(b"payload");
        assert_eq!(first, second);
        assert_ne!(first, DigestAlgorithm::Sha512.digest(b"other"));
    }
}
