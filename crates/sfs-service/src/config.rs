// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster configuration consumed by the placement core.
//!
//! Loading the configuration from disk is the server shell's concern; this
//! module only fixes the shape and defaults of the section the core reads.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

/// Replication and remote-node settings of one SFS node process.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of primary copies every segment must hold.
    #[serde(default = "defaults::number_of_primaries")]
    pub number_of_primaries: usize,

    /// Number of replica copies every segment must hold, unless the
    /// container overrides it.
    #[serde(default = "defaults::number_of_replicas")]
    pub number_of_replicas: usize,

    /// Whether several copies of one segment may land on distinct volumes
    /// of the same node.
    #[serde(default)]
    pub allow_same_node: bool,

    /// Whether this node drives cluster maintenance such as rebalancing.
    #[serde(default)]
    pub master_node: bool,

    /// Whether this node stores blob data.
    #[serde(default = "defaults::data_node")]
    pub data_node: bool,

    /// Shared secret authenticating remote-node calls, base64 on disk.
    #[serde_as(as = "Base64")]
    pub remote_node_secret: Vec<u8>,

    /// Response timeout for remote-node calls, in milliseconds.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    #[serde(default = "defaults::response_timeout")]
    pub response_timeout: Duration,
}

pub(crate) mod defaults {
    use std::time::Duration;

    pub fn number_of_primaries() -> usize {
        1
    }

    pub fn number_of_replicas() -> usize {
        0
    }

    pub fn data_node() -> bool {
        true
    }

    pub fn response_timeout() -> Duration {
        Duration::from_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use sfs_test_utils::Result as TestResult;

    use super::*;

    #[test]
    fn minimal_config_uses_defaults() -> TestResult {
        let config: ClusterConfig = serde_json::from_value(serde_json::json!({
            "remote_node_secret": "c2VjcmV0",
        }))?;
        assert_eq!(config.number_of_primaries, 1);
        assert_eq!(config.number_of_replicas, 0);
        assert!(!config.allow_same_node);
        assert!(!config.master_node);
        assert!(config.data_node);
        assert_eq!(config.remote_node_secret, b"secret");
        assert_eq!(config.response_timeout, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn response_timeout_is_read_in_milliseconds() -> TestResult {
        let config: ClusterConfig = serde_json::from_value(serde_json::json!({
            "remote_node_secret": "c2VjcmV0",
            "response_timeout": 2500,
        }))?;
        assert_eq!(config.response_timeout, Duration::from_millis(2500));
        Ok(())
    }
}
