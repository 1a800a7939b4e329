// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Response decoding for the blob protocol.
//!
//! JSON-returning endpoints answer with the envelope `{"code": <int>,
//! "blob": {...}}`; the envelope code, not only the HTTP status, decides the
//! outcome. Header-only endpoints answer with bare statuses. The mapping
//! functions here are pure so each endpoint's contract can be tested without
//! a peer.

use reqwest::StatusCode;
use serde::Deserialize;
use sfs_core::blob::{DigestBlob, HeaderBlob};
use url::Url;

use crate::error::NodeError;

/// The JSON envelope wrapping every blob-protocol response body.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub code: Option<u16>,
    pub blob: Option<serde_json::Value>,
}

fn parse_envelope(url: &Url, body: &[u8]) -> Result<Envelope, NodeError> {
    serde_json::from_slice(body)
        .map_err(|err| NodeError::body(url.clone(), format!("invalid JSON envelope: {err}")))
}

fn blob_of<T: serde::de::DeserializeOwned>(url: &Url, envelope: Envelope) -> Result<T, NodeError> {
    let blob = envelope
        .blob
        .ok_or_else(|| NodeError::body(url.clone(), "envelope has no blob"))?;
    serde_json::from_value(blob)
        .map_err(|err| NodeError::body(url.clone(), format!("malformed blob: {err}")))
}

/// Maps a checksum response: envelope code 200 yields the digest blob, 404
/// yields `None`, anything else is a protocol error.
pub(crate) fn digest_result(
    url: &Url,
    status: StatusCode,
    body: &[u8],
) -> Result<Option<DigestBlob>, NodeError> {
    if status != StatusCode::OK {
        return Err(NodeError::status(url.clone(), status, body));
    }
    let envelope = parse_envelope(url, body)?;
    match envelope.code {
        Some(200) => blob_of(url, envelope).map(Some),
        Some(404) => Ok(None),
        Some(code) => Err(NodeError::body(
            url.clone(),
            format!("unexpected envelope code {code}"),
        )),
        None => Err(NodeError::body(url.clone(), "envelope has no code")),
    }
}

/// Maps a write receipt: only envelope code 200 with a parseable digest blob
/// succeeds.
pub(crate) fn receipt_result(
    url: &Url,
    status: StatusCode,
    body: &[u8],
) -> Result<DigestBlob, NodeError> {
    if status != StatusCode::OK {
        return Err(NodeError::status(url.clone(), status, body));
    }
    let envelope = parse_envelope(url, body)?;
    match envelope.code {
        Some(200) => blob_of(url, envelope),
        Some(code) => Err(NodeError::body(
            url.clone(),
            format!("unexpected envelope code {code}"),
        )),
        None => Err(NodeError::body(url.clone(), "envelope has no code")),
    }
}

/// Maps a header-only response (delete, acknowledge): 204 affected the
/// blob, 304 means there was nothing to modify.
pub(crate) fn header_result(
    url: &Url,
    status: StatusCode,
    body: &[u8],
    volume_id: &str,
    position: u64,
) -> Result<Option<HeaderBlob>, NodeError> {
    match status {
        StatusCode::NO_CONTENT => Ok(Some(HeaderBlob::new(volume_id, position))),
        StatusCode::NOT_MODIFIED => Ok(None),
        other => Err(NodeError::status(url.clone(), other, body)),
    }
}

/// Maps a capacity probe: any non-error status means the volume accepts a
/// write.
pub(crate) fn can_put_result(url: &Url, status: StatusCode, body: &[u8]) -> Result<bool, NodeError> {
    if status.as_u16() < 400 {
        Ok(true)
    } else {
        Err(NodeError::status(url.clone(), status, body))
    }
}

#[cfg(test)]
mod tests {
    use sfs_core::DigestAlgorithm;
    use sfs_test_utils::{param_test, Result as TestResult};

    use super::*;

    fn url() -> Url {
        Url::parse("http://10.0.0.1:8080/blob/001").unwrap()
    }

    fn receipt_body() -> Vec<u8> {
        serde_json::json!({
            "code": 200,
            "blob": {
                "volume": "v1",
                "primary": true,
                "position": 77,
                "length": 11,
                "digests": {"sha512": "00ff"},
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn digest_result_maps_code_200() -> TestResult {
        let blob = digest_result(&url(), StatusCode::OK, &receipt_body())?
            .expect("code 200 carries a blob");
        assert_eq!(blob.volume, "v1");
        assert_eq!(blob.position, 77);
        assert_eq!(blob.digest(DigestAlgorithm::Sha512), Some(&[0x00, 0xff][..]));
        Ok(())
    }

    #[test]
    fn digest_result_maps_code_404_to_none() -> TestResult {
        let body = br#"{"code": 404}"#;
        assert!(digest_result(&url(), StatusCode::OK, body)?.is_none());
        Ok(())
    }

    param_test! {
        digest_result_rejects: [
            http_status: (StatusCode::INTERNAL_SERVER_ERROR, br#"{"code": 200}"#.as_slice(), "protocol-status"),
            envelope_code: (StatusCode::OK, br#"{"code": 500}"#.as_slice(), "protocol-body"),
            missing_code: (StatusCode::OK, br#"{"blob": {}}"#.as_slice(), "protocol-body"),
            not_json: (StatusCode::OK, b"oops".as_slice(), "protocol-body"),
        ]
    }
    fn digest_result_rejects(status: StatusCode, body: &[u8], expected_kind: &str) {
        let error = digest_result(&url(), status, body).unwrap_err();
        assert_eq!(error.kind(), expected_kind);
    }

    #[test]
    fn receipt_result_requires_code_200() {
        let error = receipt_result(&url(), StatusCode::OK, br#"{"code": 404}"#).unwrap_err();
        assert_eq!(error.kind(), "protocol-body");

        let blob = receipt_result(&url(), StatusCode::OK, &receipt_body()).unwrap();
        assert!(blob.is_primary());
        assert!(!blob.is_replica());
    }

    #[test]
    fn receipt_result_requires_a_blob() {
        let error = receipt_result(&url(), StatusCode::OK, br#"{"code": 200}"#).unwrap_err();
        assert_eq!(error.kind(), "protocol-body");
    }

    param_test! {
        header_result_status_mapping: [
            no_content: (StatusCode::NO_CONTENT, true, true),
            not_modified: (StatusCode::NOT_MODIFIED, true, false),
            not_found: (StatusCode::NOT_FOUND, false, false),
            server_error: (StatusCode::INTERNAL_SERVER_ERROR, false, false),
        ]
    }
    fn header_result_status_mapping(status: StatusCode, ok: bool, some: bool) {
        let result = header_result(&url(), status, b"", "v1", 9);
        assert_eq!(result.is_ok(), ok);
        if let Ok(blob) = result {
            assert_eq!(blob.is_some(), some);
            if let Some(blob) = blob {
                assert_eq!(blob.volume_id, "v1");
                assert_eq!(blob.position, 9);
            }
        }
    }

    param_test! {
        can_put_status_mapping: [
            ok: (StatusCode::OK, true),
            accepted: (StatusCode::ACCEPTED, true),
            redirect: (StatusCode::NOT_MODIFIED, true),
            client_error: (StatusCode::CONFLICT, false),
            server_error: (StatusCode::SERVICE_UNAVAILABLE, false),
        ]
    }
    fn can_put_status_mapping(status: StatusCode, ok: bool) {
        assert_eq!(can_put_result(&url(), status, b"").is_ok(), ok);
    }
}
