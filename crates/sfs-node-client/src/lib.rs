// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Client for the `/blob/001` remote-node blob protocol.
//!
//! Every data node exposes the same HTTP surface for reading, writing,
//! verifying, acknowledging, and deleting blobs on its volumes. This crate
//! provides the typed client side of that surface: one [`BlobClient`] per
//! peer node, authenticated with the cluster shared secret and bounded by a
//! per-request response timeout.

mod api;
mod client;
mod error;

pub use client::{
    BlobClient, BlobClientBuilder, WriteStreamBlob, DEFAULT_RESPONSE_TIMEOUT,
    REMOTE_NODE_TOKEN_HEADER,
};
pub use error::{ClientBuildError, NodeError};

/// Query parameter names of the blob protocol.
pub mod params {
    /// The target node's identifier.
    pub const NODE: &str = "node";
    /// The target volume's identifier.
    pub const VOLUME: &str = "volume";
    /// The blob's position on the volume.
    pub const POSITION: &str = "position";
    /// Byte offset into the blob for ranged reads.
    pub const OFFSET: &str = "offset";
    /// Byte count for ranged reads.
    pub const LENGTH: &str = "length";
    /// Keep-alive interval advertised to the peer, in milliseconds.
    pub const KEEP_ALIVE_TIMEOUT: &str = "keep_alive_timeout";
    /// Prefix selecting a digest the peer should compute, completed with the
    /// algorithm tag.
    pub const COMPUTED_DIGEST_PREFIX: &str = "x-computed-digest-";
}
