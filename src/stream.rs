//! The lazy, cancellable, single-subscription sequence of pipeline messages
//! that flows on every graph edge (spec §9, "Coroutine control flow").
//!
//! Realized over `futures::stream::BoxStream` plus a
//! [`tokio_util::sync::CancellationToken`], the same cancellation primitive
//! used elsewhere in the pack for connection-scoped cancellation. Required
//! operations per spec: `of`, `merge`, `map`, `flat_map`, `combine_latest`,
//! `timeout`, `subscribe` → cancel handle.

use crate::error::ProxyError;
use crate::message::PipelineMessage;
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type Item = Result<PipelineMessage, ProxyError>;

/// A lazy, single-subscription stream of pipeline messages. Nothing runs
/// until [`MessageStream::subscribe`] is called; subscribing a second time
/// on the same instance is a logic error the caller must avoid (mirrors the
/// spec's "single-subscription" requirement).
pub struct MessageStream {
    inner: BoxStream<'static, Item>,
    cancel: CancellationToken,
}

/// Returned by `subscribe`; dropping or calling `cancel()` stops delivery.
#[derive(Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

impl MessageStream {
    pub fn from_boxed(inner: BoxStream<'static, Item>, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }

    /// `of(value)`: a one-shot stream emitting exactly one value, then completing.
    pub fn of(msg: PipelineMessage) -> Self {
        let cancel = CancellationToken::new();
        Self {
            inner: stream::once(async move { Ok(msg) }).boxed(),
            cancel,
        }
    }

    /// An already-failed stream, for propagating a synchronous node error
    /// onto every downstream stream it would otherwise have produced.
    pub fn failed(err: ProxyError) -> Self {
        let cancel = CancellationToken::new();
        Self {
            inner: stream::once(async move { Err(err) }).boxed(),
            cancel,
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: stream::empty().boxed(),
            cancel: CancellationToken::new(),
        }
    }

    /// `merge(streams...)`: concurrent merge, arrival order preserved
    /// relative to when each stream actually emits (spec: "concurrent merge
    /// preserving arrival order").
    pub fn merge(streams: Vec<MessageStream>) -> Self {
        if streams.is_empty() {
            return Self::empty();
        }
        let cancel = CancellationToken::new();
        let children: Vec<CancellationToken> = streams.iter().map(|s| s.cancel.clone()).collect();
        // Propagate cancellation of the merged stream down to every source.
        let guard_cancel = cancel.clone();
        tokio::spawn(async move {
            guard_cancel.cancelled().await;
            for c in children {
                c.cancel();
            }
        });
        let inners: Vec<BoxStream<'static, Item>> = streams.into_iter().map(|s| s.inner).collect();
        let merged = stream::select_all(inners).boxed();
        Self {
            inner: merged,
            cancel,
        }
    }

    /// `map(f)`
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(PipelineMessage) -> PipelineMessage + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let inner = self
            .inner
            .map(move |item| item.map(&f))
            .boxed();
        Self { inner, cancel }
    }

    /// `flat_map(f)`: each input value expands into its own sub-stream,
    /// which are then merged (used by the `StreamingNode` helper).
    pub fn flat_map<F>(self, f: F) -> Self
    where
        F: Fn(PipelineMessage) -> MessageStream + Send + Sync + 'static,
    {
        let cancel = self.cancel.clone();
        let f = std::sync::Arc::new(f);
        let inner = self
            .inner
            .flat_map(move |item| match item {
                Ok(msg) => f(msg).inner,
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed();
        Self { inner, cancel }
    }

    /// `timeout(ms)`: ends the stream with [`ProxyError::Timeout`] if no
    /// item arrives within `duration` of the stream starting (applied per
    /// item here, which is sufficient for the 30s hard request-level cap
    /// applied by the entry point per spec §5).
    pub fn timeout(self, duration: Duration) -> Self {
        let cancel = self.cancel.clone();
        let inner = Box::pin(async_stream::stream! {
            let mut inner = self.inner;
            loop {
                match tokio::time::timeout(duration, inner.next()).await {
                    Ok(Some(item)) => yield item,
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(ProxyError::Timeout);
                        break;
                    }
                }
            }
        }) as BoxStream<'static, Item>;
        Self { inner, cancel }
    }

    /// Consumes the stream, invoking callbacks as items arrive. Returns a
    /// [`CancelHandle`] the caller can use to stop delivery early.
    pub fn subscribe<OnNext, OnError, OnComplete>(
        self,
        mut on_next: OnNext,
        mut on_error: OnError,
        mut on_complete: OnComplete,
    ) -> CancelHandle
    where
        OnNext: FnMut(PipelineMessage) + Send + 'static,
        OnError: FnMut(ProxyError) + Send + 'static,
        OnComplete: FnMut() + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let token = cancel.clone();
        let mut inner = self.inner;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = inner.next() => {
                        match item {
                            Some(Ok(msg)) => on_next(msg),
                            Some(Err(e)) => { on_error(e); break; }
                            None => break,
                        }
                    }
                }
            }
            on_complete();
        });
        CancelHandle(cancel)
    }

    /// Drains the stream into a `Vec`, for tests and for the engine's
    /// "collect the terminal stream's single final value" contract.
    pub async fn collect_all(self) -> Result<Vec<PipelineMessage>, ProxyError> {
        let mut out = Vec::new();
        let mut inner = self.inner;
        while let Some(item) = inner.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// `combine_latest(a, b)`: waits for both sides to have produced at least
/// one value, then re-emits the latest pair whenever either side emits
/// again (spec §4.5, Analyzed combiner).
pub fn combine_latest<F>(a: MessageStream, b: MessageStream, f: F) -> MessageStream
where
    F: Fn(&PipelineMessage, &PipelineMessage) -> PipelineMessage + Send + Sync + 'static,
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    let inner = Box::pin(async_stream::stream! {
        let mut a = a.inner;
        let mut b = b.inner;
        let mut latest_a: Option<PipelineMessage> = None;
        let mut latest_b: Option<PipelineMessage> = None;
        let mut a_done = false;
        let mut b_done = false;
        loop {
            if guard.is_cancelled() || (a_done && b_done) {
                break;
            }
            tokio::select! {
                _ = guard.cancelled() => break,
                next_a = a.next(), if !a_done => {
                    match next_a {
                        Some(Ok(msg)) => {
                            latest_a = Some(msg);
                            if let (Some(x), Some(y)) = (&latest_a, &latest_b) {
                                yield Ok(f(x, y));
                            }
                        }
                        Some(Err(e)) => { yield Err(e); break; }
                        None => a_done = true,
                    }
                }
                next_b = b.next(), if !b_done => {
                    match next_b {
                        Some(Ok(msg)) => {
                            latest_b = Some(msg);
                            if let (Some(x), Some(y)) = (&latest_a, &latest_b) {
                                yield Ok(f(x, y));
                            }
                        }
                        Some(Err(e)) => { yield Err(e); break; }
                        None => b_done = true,
                    }
                }
            }
        }
    }) as BoxStream<'static, Item>;
    MessageStream { inner, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{AcpRequest, RequestId};
    use crate::message::PipelineContext;
    use serde_json::json;

    fn msg(method: &str) -> PipelineMessage {
        let ctx = PipelineContext::new("req-1", None);
        PipelineMessage::new(ctx, AcpRequest::new(method, json!({}), RequestId::Number(1)))
    }

    #[tokio::test]
    async fn of_emits_exactly_one_value() {
        let out = MessageStream::of(msg("acp/ping")).collect_all().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].request.method, "acp/ping");
    }

    #[tokio::test]
    async fn merge_preserves_all_items() {
        let s1 = MessageStream::of(msg("acp/a"));
        let s2 = MessageStream::of(msg("acp/b"));
        let out = MessageStream::merge(vec![s1, s2]).collect_all().await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn map_transforms_each_item() {
        let out = MessageStream::of(msg("acp/a"))
            .map(|mut m| {
                m.backend = Some("anthropic".into());
                m
            })
            .collect_all()
            .await
            .unwrap();
        assert_eq!(out[0].backend.as_deref(), Some("anthropic"));
    }

    #[tokio::test]
    async fn failed_stream_surfaces_error() {
        let err = MessageStream::failed(ProxyError::internal("boom"))
            .collect_all()
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn combine_latest_waits_for_both_sides() {
        let a = MessageStream::of(msg("acp/a"));
        let b = MessageStream::of(msg("acp/b"));
        let out = combine_latest(a, b, |x, _y| x.clone()).collect_all().await.unwrap();
        assert_eq!(out.len(), 1);
    }
}
