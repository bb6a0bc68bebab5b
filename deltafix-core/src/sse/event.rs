use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;

use crate::error::CoreResult;

/// Field prefix of the line carrying an event's structured payload.
pub const DATA_FIELD: &str = "data:";

/// One server-sent event: the non-blank lines between two blank lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    lines: Vec<String>,
}

impl Event {
    /// Returns `None` for an empty line list; events always carry at least one line.
    pub fn new(lines: Vec<String>) -> Option<Self> {
        if lines.is_empty() {
            None
        } else {
            Some(Self { lines })
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Position of the first `data:` line, if any.
    pub fn data_line_index(&self) -> Option<usize> {
        self.lines.iter().position(|l| l.starts_with(DATA_FIELD))
    }

    pub(crate) fn line_mut(&mut self, idx: usize) -> Option<&mut String> {
        self.lines.get_mut(idx)
    }

    /// Wire form: every line followed by `\n`, then the blank separator line.
    pub fn to_bytes(&self) -> Bytes {
        let len = self.lines.iter().map(|l| l.len() + 1).sum::<usize>() + 1;
        let mut out = Vec::with_capacity(len);
        for line in &self.lines {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        Bytes::from(out)
    }
}

/// Groups a line stream into [`Event`]s.
///
/// A blank line closes the pending event; blank lines with nothing pending
/// are skipped. When the source ends, a pending event is emitted as the last
/// item. When the source fails, the pending partial event is discarded and the
/// error is yielded instead.
pub struct EventStream<S> {
    lines: S,
    pending: Vec<String>,
    done: bool,
}

impl<S> EventStream<S> {
    pub fn new(lines: S) -> Self {
        Self {
            lines,
            pending: Vec::new(),
            done: false,
        }
    }
}

impl<S> Stream for EventStream<S>
where
    S: Stream<Item = CoreResult<String>> + Unpin,
{
    type Item = CoreResult<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match Pin::new(&mut this.lines).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    if !line.is_empty() {
                        this.pending.push(line);
                        continue;
                    }
                    if let Some(event) = Event::new(std::mem::take(&mut this.pending)) {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    if !this.pending.is_empty() {
                        tracing::debug!(
                            lines = this.pending.len(),
                            "dropping partial event after upstream failure"
                        );
                        this.pending.clear();
                    }
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(
                        Event::new(std::mem::take(&mut this.pending)).map(Ok),
                    );
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
    use futures_util::StreamExt;

    fn lines(src: &[&str]) -> impl Stream<Item = CoreResult<String>> + Unpin {
        let owned: Vec<CoreResult<String>> = src.iter().map(|s| Ok(s.to_string())).collect();
        futures_util::stream::iter(owned)
    }

    async fn collect(src: &[&str]) -> Vec<Vec<String>> {
        EventStream::new(lines(src))
            .map(|e| e.unwrap().lines().to_vec())
            .collect()
            .await
    }

    #[tokio::test]
    async fn blank_line_closes_event() {
        let events = collect(&["event: a", "data: 1", "", "event: b", "data: 2", ""]).await;
        assert_eq!(
            events,
            vec![
                vec!["event: a".to_string(), "data: 1".to_string()],
                vec!["event: b".to_string(), "data: 2".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn repeated_blank_lines_do_not_make_empty_events() {
        let events = collect(&["", "", "data: 1", "", "", "", "data: 2", ""]).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn trailing_event_without_separator_is_flushed() {
        let events = collect(&["data: 1", "", "data: [DONE]"]).await;
        assert_eq!(events.last().unwrap(), &vec!["data: [DONE]".to_string()]);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        assert!(collect(&[]).await.is_empty());
        assert!(collect(&["", ""]).await.is_empty());
    }

    #[tokio::test]
    async fn failure_discards_partial_event() {
        let src = futures_util::stream::iter(vec![
            Ok("data: 1".to_string()),
            Ok(String::new()),
            Ok("event: half".to_string()),
            Err(DeltaFixError::UpstreamInterrupted("eof".into())),
        ]);
        let mut events = EventStream::new(src);
        assert_eq!(events.next().await.unwrap().unwrap().lines(), ["data: 1"]);
        assert!(events.next().await.unwrap().is_err());
        assert!(events.next().await.is_none());
    }

    #[test]
    fn to_bytes_appends_separator() {
        let ev = Event::new(vec!["event: x".into(), "data: {}".into()]).unwrap();
        assert_eq!(&ev.to_bytes()[..], b"event: x\ndata: {}\n\n");
        assert!(Event::new(vec![]).is_none());
    }

    #[test]
    fn data_line_is_first_data_prefixed_line() {
        let ev = Event::new(vec![
            "event: x".into(),
            "data: first".into(),
            "data: second".into(),
        ])
        .unwrap();
        assert_eq!(ev.data_line_index(), Some(1));
        let ev = Event::new(vec![": keepalive".into()]).unwrap();
        assert_eq!(ev.data_line_index(), None);
    }
}
