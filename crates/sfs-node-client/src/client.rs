// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! The typed client for one peer node's blob endpoints.

use std::{
    io,
    time::{Duration, Instant},
};

use base64::Engine as _;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{
    header::{HeaderValue, CONTENT_LENGTH},
    Method, StatusCode,
};
use sfs_core::{
    blob::{DigestBlob, HeaderBlob, ReadStreamBlob},
    io::ByteStream,
    DigestAlgorithm, NodeId,
};
use tracing::Level;
use url::Url;

use crate::{
    api::{can_put_result, digest_result, header_result, receipt_result},
    error::{ClientBuildError, NodeError},
    params,
};

/// Header carrying the base64-encoded cluster shared secret.
pub const REMOTE_NODE_TOKEN_HEADER: &str = "x-sfs-remote-node-token";

/// Response timeout applied when the builder is not given one.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

const BLOB_PATH: &str = "/blob/001";
const CHECKSUM_PATH: &str = "/blob/001/checksum";
const ACK_PATH: &str = "/blob/001/ack";
const CAN_PUT_PATH: &str = "/blob/001/canput";

/// Builds the operation URLs for one peer node.
#[derive(Debug, Clone)]
struct UrlEndpoints {
    base: Url,
    node_id: NodeId,
}

impl UrlEndpoints {
    fn new(node_id: NodeId, host_and_port: &str) -> Result<Self, ClientBuildError> {
        let base = Url::parse(&format!("http://{host_and_port}"))
            .map_err(|_| ClientBuildError::invalid_authority())?;
        if base.host_str().is_none() || base.port_or_known_default().is_none() {
            return Err(ClientBuildError::invalid_authority());
        }
        Ok(Self { base, node_id })
    }

    fn at(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    fn append_digest_params(url: &mut Url, algorithms: &[DigestAlgorithm]) {
        let mut query = url.query_pairs_mut();
        for algorithm in algorithms {
            query.append_pair(
                &format!("{}{}", params::COMPUTED_DIGEST_PREFIX, algorithm),
                "true",
            );
        }
    }

    fn checksum(
        &self,
        volume_id: &str,
        position: u64,
        keep_alive: Duration,
        algorithms: &[DigestAlgorithm],
    ) -> Url {
        let mut url = self.at(CHECKSUM_PATH);
        url.query_pairs_mut()
            .append_pair(params::KEEP_ALIVE_TIMEOUT, &keep_alive.as_millis().to_string())
            .append_pair(params::NODE, &self.node_id)
            .append_pair(params::VOLUME, volume_id)
            .append_pair(params::POSITION, &position.to_string());
        Self::append_digest_params(&mut url, algorithms);
        url
    }

    fn blob(&self, volume_id: &str, position: u64) -> Url {
        let mut url = self.at(BLOB_PATH);
        url.query_pairs_mut()
            .append_pair(params::NODE, &self.node_id)
            .append_pair(params::VOLUME, volume_id)
            .append_pair(params::POSITION, &position.to_string());
        url
    }

    fn read(&self, volume_id: &str, position: u64, offset: Option<u64>, length: Option<u64>) -> Url {
        let mut url = self.blob(volume_id, position);
        {
            let mut query = url.query_pairs_mut();
            if let Some(offset) = offset {
                query.append_pair(params::OFFSET, &offset.to_string());
            }
            if let Some(length) = length {
                query.append_pair(params::LENGTH, &length.to_string());
            }
        }
        url
    }

    fn acknowledge(&self, volume_id: &str, position: u64) -> Url {
        let mut url = self.at(ACK_PATH);
        url.query_pairs_mut()
            .append_pair(params::NODE, &self.node_id)
            .append_pair(params::VOLUME, volume_id)
            .append_pair(params::POSITION, &position.to_string());
        url
    }

    fn can_put(&self, volume_id: &str) -> Url {
        let mut url = self.at(CAN_PUT_PATH);
        url.query_pairs_mut()
            .append_pair(params::NODE, &self.node_id)
            .append_pair(params::VOLUME, volume_id);
        url
    }

    fn write(
        &self,
        volume_id: &str,
        keep_alive: Duration,
        algorithms: &[DigestAlgorithm],
    ) -> Url {
        let mut url = self.at(BLOB_PATH);
        url.query_pairs_mut()
            .append_pair(params::KEEP_ALIVE_TIMEOUT, &keep_alive.as_millis().to_string())
            .append_pair(params::NODE, &self.node_id)
            .append_pair(params::VOLUME, volume_id);
        Self::append_digest_params(&mut url, algorithms);
        url
    }
}

/// A client for the blob endpoints of one peer node.
///
/// Clients are cheap to clone and share one connection pool when built from
/// the same `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct BlobClient {
    inner: reqwest::Client,
    endpoints: UrlEndpoints,
    host_and_port: String,
    token: HeaderValue,
    response_timeout: Duration,
}

impl BlobClient {
    /// Returns a new [`BlobClientBuilder`].
    pub fn builder() -> BlobClientBuilder {
        BlobClientBuilder::default()
    }

    /// The identifier of the peer node this client addresses.
    pub fn node_id(&self) -> &str {
        &self.endpoints.node_id
    }

    /// The peer's network endpoint, as `host:port`.
    pub fn host_and_port(&self) -> &str {
        &self.host_and_port
    }

    /// The keep-alive interval advertised to the peer.
    fn keep_alive(&self) -> Duration {
        self.response_timeout / 2
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.inner
            .request(method, url)
            .header(REMOTE_NODE_TOKEN_HEADER, self.token.clone())
    }

    /// Sends a request and buffers the whole response body, bounded by the
    /// response timeout.
    async fn send_buffered(
        &self,
        method: Method,
        url: &Url,
    ) -> Result<(StatusCode, Bytes), NodeError> {
        let started = Instant::now();
        let response = self
            .request(method, url.clone())
            .timeout(self.response_timeout)
            .send()
            .await
            .map_err(|err| NodeError::transport(url.clone(), started.elapsed(), err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| NodeError::transport(url.clone(), started.elapsed(), err))?;
        Ok((status, body))
    }

    /// Requests the stored digests of a blob.
    ///
    /// `offset` and `length` are accepted for call-site symmetry with
    /// [`create_read_stream`](Self::create_read_stream); the checksum
    /// endpoint always digests the whole blob.
    #[tracing::instrument(
        skip_all,
        fields(sfs.node = %self.endpoints.node_id, sfs.volume = %volume_id, sfs.position = position),
        err(level = Level::DEBUG)
    )]
    pub async fn checksum(
        &self,
        volume_id: &str,
        position: u64,
        offset: Option<u64>,
        length: Option<u64>,
        algorithms: &[DigestAlgorithm],
    ) -> Result<Option<DigestBlob>, NodeError> {
        let _ = (offset, length);
        let url = self
            .endpoints
            .checksum(volume_id, position, self.keep_alive(), algorithms);
        let (status, body) = self.send_buffered(Method::GET, &url).await?;
        digest_result(&url, status, &body)
    }

    /// Deletes a blob; `None` if it was already absent or not modifiable.
    #[tracing::instrument(
        skip_all,
        fields(sfs.node = %self.endpoints.node_id, sfs.volume = %volume_id, sfs.position = position),
        err(level = Level::DEBUG)
    )]
    pub async fn delete(
        &self,
        volume_id: &str,
        position: u64,
    ) -> Result<Option<HeaderBlob>, NodeError> {
        let url = self.endpoints.blob(volume_id, position);
        let (status, body) = self.send_buffered(Method::DELETE, &url).await?;
        header_result(&url, status, &body, volume_id, position)
    }

    /// Acknowledges a blob; `None` if there was nothing to acknowledge.
    #[tracing::instrument(
        skip_all,
        fields(sfs.node = %self.endpoints.node_id, sfs.volume = %volume_id, sfs.position = position),
        err(level = Level::DEBUG)
    )]
    pub async fn acknowledge(
        &self,
        volume_id: &str,
        position: u64,
    ) -> Result<Option<HeaderBlob>, NodeError> {
        let url = self.endpoints.acknowledge(volume_id, position);
        let (status, body) = self.send_buffered(Method::PUT, &url).await?;
        header_result(&url, status, &body, volume_id, position)
    }

    /// Probes whether the volume accepts another blob.
    #[tracing::instrument(
        skip_all,
        fields(sfs.node = %self.endpoints.node_id, sfs.volume = %volume_id),
        err(level = Level::DEBUG)
    )]
    pub async fn can_put(&self, volume_id: &str) -> Result<bool, NodeError> {
        let url = self.endpoints.can_put(volume_id);
        let (status, body) = self.send_buffered(Method::PUT, &url).await?;
        can_put_result(&url, status, &body)
    }

    /// Opens a read stream for a blob; `None` if the blob is absent.
    ///
    /// The response timeout bounds only the wait for response headers: the
    /// body is surfaced as a lazy stream paced by its consumer.
    #[tracing::instrument(
        skip_all,
        fields(sfs.node = %self.endpoints.node_id, sfs.volume = %volume_id, sfs.position = position),
        err(level = Level::DEBUG)
    )]
    pub async fn create_read_stream(
        &self,
        volume_id: &str,
        position: u64,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> Result<Option<ReadStreamBlob>, NodeError> {
        let url = self.endpoints.read(volume_id, position, offset, length);
        let started = Instant::now();
        let send = self.request(Method::GET, url.clone()).send();
        let response = tokio::time::timeout(self.response_timeout, send)
            .await
            .map_err(|_| NodeError::timeout(url.clone(), started.elapsed()))?
            .map_err(|err| NodeError::transport(url.clone(), started.elapsed(), err))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let length = response.content_length().ok_or_else(|| {
                    NodeError::body(url.clone(), "read response has no content length")
                })?;
                let stream = response
                    .bytes_stream()
                    .map_err(io::Error::other)
                    .boxed();
                Ok(Some(ReadStreamBlob::new(length, stream)))
            }
            StatusCode::NOT_FOUND => {
                // Drain so the pooled connection stays reusable.
                let _ = response.bytes().await;
                Ok(None)
            }
            other => {
                let body = response.bytes().await.unwrap_or_default();
                Err(NodeError::status(url, other, &body))
            }
        }
    }

    /// Opens a write stream for a new blob of `length` bytes.
    ///
    /// No request is sent until the returned stream is driven with a source.
    pub fn create_write_stream(
        &self,
        volume_id: &str,
        length: u64,
        algorithms: &[DigestAlgorithm],
    ) -> WriteStreamBlob {
        let url = self.endpoints.write(volume_id, self.keep_alive(), algorithms);
        WriteStreamBlob {
            client: self.inner.clone(),
            url,
            token: self.token.clone(),
            length,
            response_timeout: self.response_timeout,
        }
    }
}

/// A pending blob write against one peer volume.
///
/// Driving the stream with a byte source uploads the payload and yields the
/// peer's single-shot receipt.
#[derive(Debug, Clone)]
pub struct WriteStreamBlob {
    client: reqwest::Client,
    url: Url,
    token: HeaderValue,
    length: u64,
    response_timeout: Duration,
}

impl WriteStreamBlob {
    /// The number of payload bytes the peer expects.
    pub fn length(&self) -> u64 {
        self.length
    }

    fn build_request(&self, source: ByteStream) -> Result<reqwest::Request, reqwest::Error> {
        self.client
            .put(self.url.clone())
            .header(REMOTE_NODE_TOKEN_HEADER, self.token.clone())
            .header(CONTENT_LENGTH, self.length)
            .timeout(self.response_timeout)
            .body(reqwest::Body::wrap_stream(source))
            .build()
    }

    /// Uploads the payload from `source` and parses the receipt.
    #[tracing::instrument(
        skip_all,
        fields(sfs.url = %self.url, sfs.length = self.length),
        err(level = Level::DEBUG)
    )]
    pub async fn consume(self, source: ByteStream) -> Result<DigestBlob, NodeError> {
        let started = Instant::now();
        let request = self
            .build_request(source)
            .map_err(|err| NodeError::transport(self.url.clone(), started.elapsed(), err))?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| NodeError::transport(self.url.clone(), started.elapsed(), err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| NodeError::transport(self.url.clone(), started.elapsed(), err))?;
        receipt_result(&self.url, status, &body)
    }
}

/// Builder for [`BlobClient`] instances.
#[derive(Debug, Clone, Default)]
pub struct BlobClientBuilder {
    client: Option<reqwest::Client>,
    secret: Option<Vec<u8>>,
    response_timeout: Option<Duration>,
}

impl BlobClientBuilder {
    /// Sets the cluster shared secret sent with every request.
    pub fn shared_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the per-request response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Reuses an existing HTTP client (and its connection pool).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Builds a client addressing the node at `host_and_port`.
    pub fn build(
        self,
        node_id: impl Into<NodeId>,
        host_and_port: &str,
    ) -> Result<BlobClient, ClientBuildError> {
        let secret = self.secret.unwrap_or_default();
        if secret.is_empty() {
            return Err(ClientBuildError::empty_secret());
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(&secret);
        let token =
            HeaderValue::from_str(&encoded).expect("base64 output is a valid header value");

        let inner = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .build()
                .map_err(ClientBuildError::reqwest)?,
        };

        let host_and_port = host_and_port.to_owned();
        Ok(BlobClient {
            inner,
            endpoints: UrlEndpoints::new(node_id.into(), &host_and_port)?,
            host_and_port,
            token,
            response_timeout: self.response_timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT),
        })
    }
}
