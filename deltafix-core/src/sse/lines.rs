use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use futures_util::stream::Stream;

use crate::error::CoreResult;

/// Splits a byte stream into text lines as their terminators arrive.
///
/// Lines are decoded one at a time with lossy UTF-8, so a multi-byte
/// character split across network chunks still decodes intact. The `\n`
/// (and a preceding `\r`) is stripped. An unterminated tail is yielded when
/// the source ends. After a source error the reader yields that error once
/// and then ends.
pub struct LineReader<S> {
    inner: S,
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no `\n`.
    scanned: usize,
    done: bool,
}

impl<S> LineReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scanned: 0,
            done: false,
        }
    }

    fn take_line(&mut self, idx: usize) -> String {
        let raw = self.buf.split_to(idx + 1);
        self.scanned = 0;
        let mut end = idx;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

impl<S, B> Stream for LineReader<S>
where
    S: Stream<Item = CoreResult<B>> + Unpin,
    B: Buf,
{
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let from = this.scanned;
            if let Some(pos) = this.buf[from..].iter().position(|b| *b == b'\n') {
                return Poll::Ready(Some(Ok(this.take_line(from + pos))));
            }
            this.scanned = this.buf.len();
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(mut chunk))) => {
                    while chunk.has_remaining() {
                        let part = chunk.chunk();
                        let n = part.len();
                        this.buf.extend_from_slice(part);
                        chunk.advance(n);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    this.buf.clear();
                    this.scanned = 0;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if this.buf.is_empty() {
                        return Poll::Ready(None);
                    }
                    this.scanned = 0;
                    let mut tail = std::mem::take(&mut this.buf);
                    if tail.last() == Some(&b'\r') {
                        tail.truncate(tail.len() - 1);
                    }
                    return Poll::Ready(Some(Ok(String::from_utf8_lossy(&tail).into_owned())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeltaFixError;
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn reader(
        chunks: Vec<&'static [u8]>,
    ) -> LineReader<impl Stream<Item = CoreResult<Bytes>> + Unpin> {
        LineReader::new(futures_util::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    #[tokio::test]
    async fn splits_lines_and_keeps_blank_ones() {
        let lines: Vec<_> = reader(vec![b"event: ping\ndata: {}\n\n".as_slice()])
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["event: ping", "data: {}", ""]);
    }

    #[tokio::test]
    async fn strips_crlf() {
        let lines: Vec<_> = reader(vec![b"data: a\r\n\r\n".as_slice()])
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["data: a", ""]);
    }

    #[tokio::test]
    async fn joins_lines_split_across_chunks() {
        let lines: Vec<_> = reader(vec![
            b"da".as_slice(),
            b"ta: {\"a\"".as_slice(),
            b":1}\n".as_slice(),
            b"\n".as_slice(),
        ])
        .map(|l| l.unwrap())
        .collect()
        .await;
        assert_eq!(lines, vec!["data: {\"a\":1}", ""]);
    }

    #[tokio::test]
    async fn long_line_in_tiny_chunks() {
        let payload = format!("data: {}", "x".repeat(10_000));
        let mut raw = payload.clone().into_bytes();
        raw.extend_from_slice(b"\ndata: tail\n");
        let src = futures_util::stream::iter(
            raw.chunks(2)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>(),
        );
        let lines: Vec<_> = LineReader::new(src).map(|l| l.unwrap()).collect().await;
        assert_eq!(lines, vec![payload, "data: tail".to_string()]);
    }

    #[tokio::test]
    async fn multibyte_char_split_across_chunks_decodes() {
        // "é" is 0xC3 0xA9
        let lines: Vec<_> = reader(vec![b"data: caf\xC3".as_slice(), b"\xA9\n".as_slice()])
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["data: café"]);
    }

    #[tokio::test]
    async fn invalid_bytes_are_replaced_not_fatal() {
        let lines: Vec<_> = reader(vec![b"data: \xFF\xFE\n".as_slice()])
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["data: \u{FFFD}\u{FFFD}"]);
    }

    #[tokio::test]
    async fn unterminated_tail_is_flushed_at_end() {
        let lines: Vec<_> = reader(vec![b"data: 1\ndata: 2".as_slice()])
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["data: 1", "data: 2"]);
    }

    #[tokio::test]
    async fn end_of_stream_is_not_an_empty_line() {
        let mut r = reader(vec![b"\n".as_slice()]);
        assert_eq!(r.next().await.unwrap().unwrap(), "");
        assert!(r.next().await.is_none());
        assert!(r.next().await.is_none());
    }

    #[tokio::test]
    async fn error_is_yielded_once_then_ends() {
        let src = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: 1\ndata: par")),
            Err(DeltaFixError::UpstreamInterrupted("reset".into())),
            Ok(Bytes::from_static(b"tial\n")),
        ]);
        let mut r = LineReader::new(src);
        assert_eq!(r.next().await.unwrap().unwrap(), "data: 1");
        assert!(matches!(
            r.next().await,
            Some(Err(DeltaFixError::UpstreamInterrupted(_)))
        ));
        assert!(r.next().await.is_none());
    }
}
