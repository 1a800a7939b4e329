// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Blob value types returned by node operations.

use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as, DisplayFromStr};
use tokio::sync::mpsc;

use crate::{
    io::{pump, ByteStream, PumpError},
    BlobRole, DigestAlgorithm, VolumeId,
};

/// The blob addressed by a completed header-only volume operation
/// (delete, acknowledge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlob {
    /// The volume holding the blob.
    pub volume_id: VolumeId,
    /// The blob's position on the volume.
    pub position: u64,
}

impl HeaderBlob {
    /// Creates a header blob for the given volume position.
    pub fn new(volume_id: impl Into<VolumeId>, position: u64) -> Self {
        Self {
            volume_id: volume_id.into(),
            position,
        }
    }
}

/// The digest-bearing receipt of a completed blob write or checksum.
///
/// Wire shape: `{"volume": …, "primary": …, "replica": …, "position": …,
/// "length": …, "digests": {"sha512": "<lowercase hex>"}}`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestBlob {
    /// The volume holding the blob.
    pub volume: VolumeId,
    /// Whether the blob landed on a primary volume, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    /// Whether the blob landed on a replica volume, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<bool>,
    /// The blob's position on the volume.
    pub position: u64,
    /// The number of bytes stored.
    pub length: u64,
    /// Computed digests, keyed by algorithm tag, hex-encoded on the wire.
    #[serde_as(as = "BTreeMap<DisplayFromStr, Hex>")]
    #[serde(default)]
    pub digests: BTreeMap<DigestAlgorithm, Vec<u8>>,
}

impl DigestBlob {
    /// The digest computed with `algorithm`, if present.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Option<&[u8]> {
        self.digests.get(&algorithm).map(Vec::as_slice)
    }

    /// Returns true iff the blob was reported stored on a primary volume.
    pub fn is_primary(&self) -> bool {
        self.primary.unwrap_or(false)
    }

    /// Returns true iff the blob was reported stored on a replica volume.
    pub fn is_replica(&self) -> bool {
        self.replica.unwrap_or(false)
    }

    /// The role reported by the storing volume, if any was reported.
    pub fn role(&self) -> Option<BlobRole> {
        if self.is_primary() {
            Some(BlobRole::Primary)
        } else if self.is_replica() {
            Some(BlobRole::Replica)
        } else {
            None
        }
    }
}

/// An open byte source for a stored blob.
///
/// The underlying stream is lazy: no body bytes are consumed until the
/// stream is polled, so a read stream can be handed around before any
/// consumer attaches.
pub struct ReadStreamBlob {
    length: u64,
    stream: ByteStream,
}

impl ReadStreamBlob {
    /// Wraps a byte stream carrying `length` payload bytes.
    pub fn new(length: u64, stream: ByteStream) -> Self {
        Self { length, stream }
    }

    /// The full payload length carried by the stream.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Unwraps the underlying byte stream.
    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    /// Pumps the body into `sink`, honouring the sink's back-pressure.
    pub async fn produce(self, sink: mpsc::Sender<Bytes>) -> Result<u64, PumpError> {
        pump(self.stream, sink).await
    }
}

impl fmt::Debug for ReadStreamBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadStreamBlob")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::{stream, StreamExt};
    use sfs_test_utils::Result as TestResult;

    use super::*;

    #[test]
    fn digest_blob_round_trips_hex_digests() -> TestResult {
        let mut digests = BTreeMap::new();
        digests.insert(DigestAlgorithm::Sha512, vec![0xab, 0x0f, 0x01]);
        let blob = DigestBlob {
            volume: "v1".to_owned(),
            primary: Some(true),
            replica: None,
            position: 42,
            length: 128,
            digests,
        };

        let value = serde_json::to_value(&blob)?;
        assert_eq!(value["digests"]["sha512"], "ab0f01");
        assert_eq!(value["volume"], "v1");
        assert_eq!(value["position"], 42);
        assert!(value.get("replica").is_none());

        let parsed: DigestBlob = serde_json::from_value(value)?;
        assert_eq!(parsed, blob);
        Ok(())
    }

    #[test]
    fn digest_blob_without_flags_has_no_role() -> TestResult {
        let parsed: DigestBlob = serde_json::from_value(serde_json::json!({
            "volume": "v2",
            "position": 0,
            "length": 10,
        }))?;
        assert_eq!(parsed.role(), None);
        assert!(!parsed.is_primary());
        assert_eq!(parsed.digest(DigestAlgorithm::Sha512), None);
        Ok(())
    }

    #[tokio::test]
    async fn read_stream_blob_produces_its_body() -> TestResult {
        let stream = stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ])
        .boxed();
        let blob = ReadStreamBlob::new(11, stream);
        assert_eq!(blob.length(), 11);

        let (tx, mut rx) = mpsc::channel(4);
        let produce = tokio::spawn(blob.produce(tx));
        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(produce.await??, 11);
        assert_eq!(received, b"hello world");
        Ok(())
    }
}
