//! Incremental parsing of the backend's pseudo-SSE framing.
//!
//! The Kimi completion endpoint emits records separated by a blank line
//! (`\n\n`), with the payload on a `data:` prefixed line. Bytes arrive in
//! arbitrary chunks, so this module buffers partial data and only processes
//! a record once its full delimiter has been seen. Records without a
//! `data:` line are discarded.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream adapter that turns a raw byte stream into the `data:` payload
/// of each complete SSE record.
///
/// A partial record still buffered when the upstream ends is dropped: a
/// record is only meaningful once its `\n\n` terminator has arrived.
pub struct DataFrames<S> {
    inner: S,
    buffer: BytesMut,
}

impl<S> DataFrames<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }
}

impl<S, E> Stream for DataFrames<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<String, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            // Drain every complete record already buffered before asking the
            // inner stream for more bytes.
            while let Some(pos) = find_record_boundary(&this.buffer) {
                let record = this.buffer.split_to(pos + 2);
                if let Some(payload) = extract_data_payload(&record) {
                    return Poll::Ready(Some(Ok(payload)));
                }
                // No data: line in this record; discard and keep scanning.
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.buffer.clear();
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Position of the first `\n\n` record delimiter, if any.
fn find_record_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\n\n")
}

/// Scans a complete record for a `data:` line and returns its trimmed
/// payload. When a record carries several `data:` lines the last one wins.
/// Empty payloads count as absent.
fn extract_data_payload(record: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(record);
    let mut payload = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                payload = Some(rest.to_owned());
            }
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::convert::Infallible;

    fn chunks_to_stream(
        chunks: Vec<Vec<u8>>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn collect_payloads(chunks: Vec<Vec<u8>>) -> Vec<String> {
        DataFrames::new(chunks_to_stream(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn complete_record_yields_payload() {
        let payloads = collect_payloads(vec![b"data: {\"event\":\"cmpl\"}\n\n".to_vec()]).await;
        assert_eq!(payloads, vec!["{\"event\":\"cmpl\"}"]);
    }

    #[tokio::test]
    async fn one_byte_at_a_time_matches_single_chunk() {
        let record = b"event: message\ndata: {\"text\": \"hello world\"}\n\n";

        let whole = collect_payloads(vec![record.to_vec()]).await;
        let trickled = collect_payloads(record.iter().map(|b| vec![*b]).collect::<Vec<_>>()).await;

        assert_eq!(whole, trickled);
        assert_eq!(whole, vec!["{\"text\": \"hello world\"}"]);
    }

    #[tokio::test]
    async fn multiple_records_in_one_chunk() {
        let payloads = collect_payloads(vec![b"data: first\n\ndata: second\n\n".to_vec()]).await;
        assert_eq!(payloads, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn record_split_at_the_delimiter() {
        let payloads = collect_payloads(vec![b"data: split\n".to_vec(), b"\n".to_vec()]).await;
        assert_eq!(payloads, vec!["split"]);
    }

    #[tokio::test]
    async fn record_without_data_line_is_discarded() {
        let payloads =
            collect_payloads(vec![b"event: ping\n\ndata: kept\n\n: comment\n\n".to_vec()]).await;
        assert_eq!(payloads, vec!["kept"]);
    }

    #[tokio::test]
    async fn last_data_line_wins_within_a_record() {
        let payloads = collect_payloads(vec![b"data: old\ndata: new\n\n".to_vec()]).await;
        assert_eq!(payloads, vec!["new"]);
    }

    #[tokio::test]
    async fn trailing_partial_record_is_dropped_at_eof() {
        let payloads =
            collect_payloads(vec![b"data: done\n\ndata: never-terminated".to_vec()]).await;
        assert_eq!(payloads, vec!["done"]);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let payloads = collect_payloads(vec![]).await;
        assert!(payloads.is_empty());
    }

    #[tokio::test]
    async fn payload_is_trimmed() {
        let payloads = collect_payloads(vec![b"data:   [DONE]  \n\n".to_vec()]).await;
        assert_eq!(payloads, vec!["[DONE]"]);
    }

    #[tokio::test]
    async fn upstream_error_is_propagated() {
        let chunks: Vec<Result<Bytes, &str>> = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err("connection reset"),
        ];
        let mut frames = DataFrames::new(futures_util::stream::iter(chunks));
        assert_eq!(frames.next().await.unwrap().unwrap(), "one");
        assert!(frames.next().await.unwrap().is_err());
    }
}
