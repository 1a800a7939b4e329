// Copyright (c) The Simple File Server Authors
// SPDX-License-Identifier: Apache-2.0

//! Back-pressured byte plumbing between stream sources and channel sinks.
//!
//! Sources are [`Stream`]s of [`Bytes`] chunks; sinks are bounded
//! [`mpsc::Sender`]s whose capacity provides the back-pressure. A sink is
//! terminated by dropping its sender, which the pump does on source end; a
//! sink whose receiver has gone away reports itself closed on the next send.

use std::{future::Future, io};

use bytes::Bytes;
use futures::{future, stream::BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

/// A source of blob bytes, yielded as owned chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Error raised while copying bytes from a source into one or more sinks.
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    /// The source failed mid-stream.
    #[error("byte source failed after {bytes_copied} bytes")]
    Source {
        /// Bytes fully handed to the sink(s) before the failure.
        bytes_copied: u64,
        /// The underlying source error.
        #[source]
        source: io::Error,
    },
    /// A sink stopped accepting bytes before the source ended.
    #[error("byte sink closed after {bytes_copied} bytes")]
    SinkClosed {
        /// Bytes fully handed to the sink(s) before the failure.
        bytes_copied: u64,
    },
}

impl PumpError {
    /// Bytes that were fully delivered before the copy failed.
    pub fn bytes_copied(&self) -> u64 {
        match self {
            PumpError::Source { bytes_copied, .. } | PumpError::SinkClosed { bytes_copied } => {
                *bytes_copied
            }
        }
    }
}

/// Copies `source` into `sink`, honouring the sink's back-pressure.
///
/// The sink is closed when the source ends. Either side's failure is
/// reported as the completion's error, with the number of bytes that were
/// delivered up to that point.
pub async fn pump<S>(mut source: S, sink: mpsc::Sender<Bytes>) -> Result<u64, PumpError>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let mut bytes_copied = 0u64;
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(|source| PumpError::Source {
            bytes_copied,
            source,
        })?;
        let len = chunk.len() as u64;
        sink.send(chunk)
            .await
            .map_err(|_| PumpError::SinkClosed { bytes_copied })?;
        bytes_copied += len;
    }
    Ok(bytes_copied)
}

/// Fans `source` out to every sink in `sinks`, advancing at the rate of the
/// slowest sink.
///
/// Each chunk is delivered to all sinks before the next chunk is pulled from
/// the source. If any sink closes early the source and the remaining sinks
/// are cancelled; if the source fails all sinks are cancelled. All sinks are
/// closed when the source ends.
pub async fn tee<S>(mut source: S, sinks: Vec<mpsc::Sender<Bytes>>) -> Result<u64, PumpError>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let mut bytes_copied = 0u64;
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(|source| PumpError::Source {
            bytes_copied,
            source,
        })?;
        for sink in &sinks {
            sink.send(chunk.clone())
                .await
                .map_err(|_| PumpError::SinkClosed { bytes_copied })?;
        }
        bytes_copied += chunk.len() as u64;
    }
    Ok(bytes_copied)
}

/// Awaits two completions, delaying the first failure until both settled.
///
/// Yields `merge(a, b)` when both sides succeed; otherwise fails with the
/// error that was captured first. A second error is logged and suppressed.
pub async fn combine_delay_error<FA, FB, T, U, R, E>(
    a: FA,
    b: FB,
    merge: impl FnOnce(T, U) -> R,
) -> Result<R, E>
where
    FA: Future<Output = Result<T, E>>,
    FB: Future<Output = Result<U, E>>,
    E: std::fmt::Display,
{
    use std::sync::atomic::{AtomicUsize, Ordering};

    let settled = AtomicUsize::new(0);
    let a = async {
        let result = a.await;
        (settled.fetch_add(1, Ordering::SeqCst), result)
    };
    let b = async {
        let result = b.await;
        (settled.fetch_add(1, Ordering::SeqCst), result)
    };

    match future::join(a, b).await {
        ((_, Ok(left)), (_, Ok(right))) => Ok(merge(left, right)),
        ((_, Err(error)), (_, Ok(_))) | ((_, Ok(_)), (_, Err(error))) => Err(error),
        ((seq_a, Err(error_a)), (seq_b, Err(error_b))) => {
            let (first, second) = if seq_a < seq_b {
                (error_a, error_b)
            } else {
                (error_b, error_a)
            };
            tracing::debug!(suppressed = %second, "both completions failed");
            Err(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use sfs_test_utils::Result as TestResult;

    use super::*;

    fn source_of(chunks: Vec<&'static [u8]>) -> ByteStream {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed()
    }

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn pump_copies_all_chunks_and_closes_sink() -> TestResult {
        let (tx, rx) = mpsc::channel(1);
        let (copied, received) =
            tokio::join!(pump(source_of(vec![b"ab", b"cde"]), tx), drain(rx));
        assert_eq!(copied?, 5);
        assert_eq!(received, b"abcde");
        Ok(())
    }

    #[tokio::test]
    async fn pump_reports_source_failure() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ])
        .boxed();
        let (tx, rx) = mpsc::channel(4);
        let (result, _) = tokio::join!(pump(source, tx), drain(rx));
        let error = result.unwrap_err();
        assert!(matches!(error, PumpError::Source { .. }));
        assert_eq!(error.bytes_copied(), 3);
    }

    #[tokio::test]
    async fn pump_reports_closed_sink() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let error = pump(source_of(vec![b"abc"]), tx).await.unwrap_err();
        assert!(matches!(error, PumpError::SinkClosed { bytes_copied: 0 }));
    }

    #[tokio::test]
    async fn tee_delivers_every_chunk_to_every_sink() -> TestResult {
        let (tx_a, rx_a) = mpsc::channel(1);
        let (tx_b, rx_b) = mpsc::channel(1);
        let (copied, received_a, received_b) = tokio::join!(
            tee(source_of(vec![b"ab", b"c"]), vec![tx_a, tx_b]),
            drain(rx_a),
            drain(rx_b),
        );
        assert_eq!(copied?, 3);
        assert_eq!(received_a, b"abc");
        assert_eq!(received_b, b"abc");
        Ok(())
    }

    #[tokio::test]
    async fn tee_fails_when_any_sink_closes() {
        let (tx_a, rx_a) = mpsc::channel(1);
        let (tx_b, rx_b) = mpsc::channel(1);
        drop(rx_b);
        let (result, _) = tokio::join!(tee(source_of(vec![b"abc"]), vec![tx_a, tx_b]), drain(rx_a));
        assert!(matches!(result, Err(PumpError::SinkClosed { .. })));
    }

    #[tokio::test]
    async fn combine_delay_error_merges_successes() {
        let merged = combine_delay_error(
            async { Ok::<_, PumpError>(2u64) },
            async { Ok::<_, PumpError>(3u64) },
            |a, b| a + b,
        )
        .await;
        assert_eq!(merged.unwrap(), 5);
    }

    #[tokio::test]
    async fn combine_delay_error_waits_for_both_sides() {
        // The failing side settles first; the slow side must still run to
        // completion before the error is reported.
        let slow_side_finished = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = slow_side_finished.clone();
        let result = combine_delay_error(
            async {
                Err::<u64, PumpError>(PumpError::SinkClosed { bytes_copied: 1 })
            },
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<u64, PumpError>(9)
            },
            |a, b| a + b,
        )
        .await;
        assert!(matches!(result, Err(PumpError::SinkClosed { bytes_copied: 1 })));
        assert!(slow_side_finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn combine_delay_error_reports_first_error_of_two() {
        let result = combine_delay_error(
            async { Err::<u64, PumpError>(PumpError::SinkClosed { bytes_copied: 7 }) },
            async {
                Err::<u64, PumpError>(PumpError::Source {
                    bytes_copied: 0,
                    source: io::Error::new(io::ErrorKind::Other, "late"),
                })
            },
            |a, b| a + b,
        )
        .await;
        assert!(matches!(result, Err(PumpError::SinkClosed { bytes_copied: 7 })));
    }
}
