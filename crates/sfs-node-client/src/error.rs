// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors that may be encountered while talking to a remote node.

use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

/// How much of an unexpected response body is preserved in the error.
const MAX_ERROR_BODY_BYTES: usize = 2048;

/// Error raised during communication with a remote node.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct NodeError {
    #[from]
    kind: Kind,
}

impl NodeError {
    /// Returns true if the request could not be completed in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, Kind::Timeout { .. })
    }

    /// Returns true if the error occurred below the protocol layer
    /// (connect, reset, DNS, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, Kind::Transport { .. } | Kind::Timeout { .. })
    }

    /// Returns true if the error is related to connecting to the peer.
    pub fn is_connect(&self) -> bool {
        let Kind::Transport { ref source, .. } = self.kind else {
            return false;
        };
        source.is_connect()
    }

    /// The HTTP status code the peer answered with, if the error was an
    /// unexpected status.
    pub fn http_status_code(&self) -> Option<StatusCode> {
        if let Kind::Status { status, .. } = self.kind {
            Some(status)
        } else {
            None
        }
    }

    /// A short machine-readable label for the class of failure.
    pub fn kind(&self) -> &'static str {
        match self.kind {
            Kind::Transport { .. } => "transport",
            Kind::Timeout { .. } => "timeout",
            Kind::Status { .. } => "protocol-status",
            Kind::Body { .. } => "protocol-body",
            Kind::Other(_) => "other",
        }
    }

    /// Wrap a standard error as a node error.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Kind::Other(err.into()).into()
    }

    pub(crate) fn transport(url: Url, elapsed: Duration, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Kind::Timeout { url, elapsed }.into()
        } else {
            Kind::Transport {
                url,
                elapsed,
                source,
            }
            .into()
        }
    }

    pub(crate) fn timeout(url: Url, elapsed: Duration) -> Self {
        Kind::Timeout { url, elapsed }.into()
    }

    pub(crate) fn status(url: Url, status: StatusCode, body: &[u8]) -> Self {
        let end = body.len().min(MAX_ERROR_BODY_BYTES);
        Kind::Status {
            url,
            status,
            body: String::from_utf8_lossy(&body[..end]).into_owned(),
        }
        .into()
    }

    pub(crate) fn body(url: Url, reason: impl Into<String>) -> Self {
        Kind::Body {
            url,
            reason: reason.into(),
        }
        .into()
    }
}

#[derive(Debug, thiserror::Error)]
enum Kind {
    #[error("request to {url} failed after {elapsed:?}: {source}")]
    Transport {
        url: Url,
        elapsed: Duration,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out after {elapsed:?}")]
    Timeout { url: Url, elapsed: Duration },
    #[error("unexpected status {status} from {url}: {body:?}")]
    Status {
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("malformed protocol body from {url}: {reason}")]
    Body { url: Url, reason: String },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// An error returned when building a [`BlobClient`] fails.
///
/// [`BlobClient`]: crate::BlobClient
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ClientBuildError {
    #[from]
    kind: BuildErrorKind,
}

impl ClientBuildError {
    pub(crate) fn invalid_authority() -> Self {
        BuildErrorKind::InvalidHostOrPort.into()
    }

    pub(crate) fn empty_secret() -> Self {
        BuildErrorKind::EmptySecret.into()
    }

    pub(crate) fn reqwest(err: reqwest::Error) -> Self {
        BuildErrorKind::Reqwest(err).into()
    }
}

#[derive(Debug, thiserror::Error)]
enum BuildErrorKind {
    #[error("invalid remote node authority")]
    InvalidHostOrPort,
    #[error("the remote node secret must not be empty")]
    EmptySecret,
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://10.0.0.1:8080/blob/001").unwrap()
    }

    #[test]
    fn status_error_truncates_long_bodies() {
        let body = vec![b'x'; MAX_ERROR_BODY_BYTES + 100];
        let error = NodeError::status(url(), StatusCode::INTERNAL_SERVER_ERROR, &body);
        let rendered = error.to_string();
        assert!(rendered.contains("500"));
        assert!(rendered.len() < body.len());
        assert_eq!(error.http_status_code(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(error.kind(), "protocol-status");
    }

    #[test]
    fn timeout_is_classified_as_transport() {
        let error = NodeError::timeout(url(), Duration::from_secs(3));
        assert!(error.is_timeout());
        assert!(error.is_transport());
        assert_eq!(error.http_status_code(), None);
        assert_eq!(error.kind(), "timeout");
    }

    #[test]
    fn body_error_carries_reason() {
        let error = NodeError::body(url(), "missing code");
        assert!(error.to_string().contains("missing code"));
        assert_eq!(error.kind(), "protocol-body");
    }
}
