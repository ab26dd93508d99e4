//! Stream relay: runs one agent turn on the owner runtime and forwards its
//! chunks to a transport as a [`TurnStream`].
//!
//! The producer task pushes tokens into an unbounded channel.  Whatever
//! happens to the producer (success, core error, panic, abort, or the owner
//! runtime shutting down before it ever ran) the channel receives exactly
//! one terminal token, and the consumer stops reading at that token.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_core::Stream;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sb_domain::agent::{AgentCore, ChunkSink, InboundMessage};
use sb_domain::error::{Error, Result};
use sb_domain::stream::{StreamErrorKind, StreamToken};
use sb_domain::trace::TraceEvent;
use sb_sessions::{SessionHandle, SessionRegistry, TurnGuard};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a turn needs, cloned into the task that runs it.
#[derive(Clone)]
pub(crate) struct TurnContext {
    pub core: Arc<dyn AgentCore>,
    pub registry: Arc<SessionRegistry>,
    pub session: Arc<SessionHandle>,
}

/// Run a non-streaming turn to completion on the current task.
///
/// `turn` is taken by the caller before the work is handed to the owner
/// runtime, so the session reads as busy from the moment it is dispatched.
pub(crate) async fn run_turn(
    ctx: TurnContext,
    message: InboundMessage,
    _turn: TurnGuard,
) -> Result<String> {
    let started = Instant::now();
    TraceEvent::TurnStarted {
        session_key: ctx.session.key.clone(),
        streaming: false,
    }
    .emit();

    let result = ctx
        .core
        .communicate(&ctx.session.context, message, None)
        .await;
    if result.is_ok() {
        ctx.registry.touch_handle(&ctx.session);
    }

    let outcome = match &result {
        Ok(_) => "ok",
        Err(_) => "error",
    };
    TraceEvent::TurnFinished {
        session_key: ctx.session.key.clone(),
        streaming: false,
        outcome: outcome.into(),
        chunks: 0,
        duration_ms: started.elapsed().as_millis() as u64,
    }
    .emit();
    result
}

/// Start a streaming turn on `owner` and return the consumer side.
///
/// A turn still running after `timeout` is dropped and the stream ends with
/// a `TimedOut` error.
pub(crate) fn spawn_turn(
    owner: &Handle,
    ctx: TurnContext,
    message: InboundMessage,
    timeout: Duration,
) -> TurnStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let chunks = Arc::new(AtomicUsize::new(0));
    let session_key = ctx.session.key.clone();

    // Both guards are created here rather than inside the task so that a
    // task dropped before its first poll still settles the stream.
    let turn = ctx.session.begin_turn();
    let terminal = TerminalGuard {
        tx: Some(tx.clone()),
        session_key: session_key.clone(),
        started: Instant::now(),
        chunks: chunks.clone(),
    };

    let sink: ChunkSink = {
        let chunks = chunks.clone();
        Arc::new(move |text: String| {
            chunks.fetch_add(1, Ordering::Relaxed);
            let _ = tx.send(StreamToken::Chunk { text });
        })
    };

    let producer = owner.spawn(async move {
        let _turn = turn;
        TraceEvent::TurnStarted {
            session_key: ctx.session.key.clone(),
            streaming: true,
        }
        .emit();

        let turn = AssertUnwindSafe(ctx.core.communicate(&ctx.session.context, message, Some(sink)))
            .catch_unwind();
        match tokio::time::timeout(timeout, turn).await {
            Ok(Ok(result)) => {
                if result.is_ok() {
                    ctx.registry.touch_handle(&ctx.session);
                }
                terminal.finish(result);
            }
            Ok(Err(_)) => terminal.panicked(),
            Err(_) => terminal.timed_out(timeout),
        }
    });

    TurnStream {
        session_key,
        rx,
        producer: Some(producer),
        finished: false,
        timeout,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sends the one terminal token for a streaming turn.
///
/// `finish` sends `End` or a producer `Error`; `panicked` and `timed_out`
/// send the matching error kinds.  If the guard is dropped first, `Drop` sends a
/// `Cancelled` error.
struct TerminalGuard {
    tx: Option<mpsc::UnboundedSender<StreamToken>>,
    session_key: String,
    started: Instant,
    chunks: Arc<AtomicUsize>,
}

impl TerminalGuard {
    fn finish(mut self, result: Result<String>) {
        let token = match result {
            Ok(text) => StreamToken::End { text },
            Err(e) => {
                tracing::warn!(session_key = %self.session_key, error = %e, "streaming turn failed");
                StreamToken::Error {
                    kind: StreamErrorKind::Producer,
                    message: e.to_string(),
                }
            }
        };
        self.send(token);
    }

    fn panicked(mut self) {
        tracing::error!(session_key = %self.session_key, "streaming turn panicked");
        self.send(StreamToken::Error {
            kind: StreamErrorKind::Panicked,
            message: "agent turn panicked".into(),
        });
    }

    fn timed_out(mut self, timeout: Duration) {
        tracing::warn!(
            session_key = %self.session_key,
            timeout_ms = timeout.as_millis() as u64,
            "streaming turn timed out, stopping it"
        );
        TraceEvent::CrossLoopTimeout {
            operation: "dispatch_streaming".into(),
            timeout_ms: timeout.as_millis() as u64,
        }
        .emit();
        self.send(StreamToken::Error {
            kind: StreamErrorKind::TimedOut,
            message: format!("agent turn exceeded {timeout:?}"),
        });
    }

    fn send(&mut self, token: StreamToken) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let outcome = match &token {
            StreamToken::End { .. } => "ok".to_string(),
            StreamToken::Error { kind, .. } => kind.to_string(),
            StreamToken::Chunk { .. } => "chunk".to_string(),
        };
        TraceEvent::TurnFinished {
            session_key: self.session_key.clone(),
            streaming: true,
            outcome,
            chunks: self.chunks.load(Ordering::Relaxed),
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
        .emit();
        // The consumer may already be gone.
        let _ = tx.send(token);
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.tx.is_none() {
            return;
        }
        tracing::debug!(session_key = %self.session_key, "streaming turn stopped before completion");
        self.send(StreamToken::Error {
            kind: StreamErrorKind::Cancelled,
            message: "agent turn was cancelled".into(),
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnStream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consumer side of a streaming turn.
///
/// Yields zero or more [`StreamToken::Chunk`]s, then exactly one terminal
/// token, then `None`.  Dropping the stream before the terminal token stops
/// the producer.
pub struct TurnStream {
    session_key: String,
    rx: mpsc::UnboundedReceiver<StreamToken>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
    timeout: Duration,
}

impl TurnStream {
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// `true` once the terminal token has been yielded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stop the producer and wait until it has released the session.
    pub async fn cancel(mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
            // Either the abort landed or the task had already finished.
            let _ = producer.await;
        }
        self.finished = true;
    }

    /// Drain the stream into the final reply text.
    pub async fn into_text(mut self) -> Result<String> {
        use futures_util::StreamExt;

        let mut collected = String::new();
        while let Some(token) = self.next().await {
            match token {
                StreamToken::Chunk { text } => collected.push_str(&text),
                StreamToken::End { text } => return Ok(text),
                StreamToken::Error {
                    kind: StreamErrorKind::Cancelled,
                    message,
                } => return Err(Error::Cancelled(message)),
                StreamToken::Error {
                    kind: StreamErrorKind::TimedOut,
                    ..
                } => {
                    return Err(Error::CrossLoopTimeout {
                        operation: "dispatch_streaming".into(),
                        timeout: self.timeout,
                    })
                }
                StreamToken::Error { message, .. } => return Err(Error::Turn(message)),
            }
        }
        // Unreachable in practice: the stream always yields a terminal token.
        Ok(collected)
    }
}

impl Stream for TurnStream {
    type Item = StreamToken;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamToken>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(token)) => {
                if token.is_terminal() {
                    this.finished = true;
                    this.rx.close();
                }
                Poll::Ready(Some(token))
            }
            Poll::Ready(None) => {
                // Every sender is gone without a terminal token.
                this.finished = true;
                Poll::Ready(Some(StreamToken::Error {
                    kind: StreamErrorKind::Cancelled,
                    message: "agent turn ended without a result".into(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            if !self.finished && !producer.is_finished() {
                tracing::debug!(session_key = %self.session_key, "turn stream dropped early, stopping producer");
                producer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use sb_domain::agent::ContextRef;
    use sb_sessions::SessionKeyDeriver;

    const TURN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Streams the words of its input.  "panic" panics and "stall" never
    /// returns.
    struct WordCore;

    #[async_trait::async_trait]
    impl AgentCore for WordCore {
        fn create_context(&self, session_key: &str) -> Result<ContextRef> {
            Ok(ContextRef::new(format!("ctx-{session_key}")))
        }

        fn remove_context(&self, _: &str, _: &ContextRef) -> Result<()> {
            Ok(())
        }

        async fn communicate(
            &self,
            _context: &ContextRef,
            message: InboundMessage,
            on_chunk: Option<ChunkSink>,
        ) -> Result<String> {
            if message.text == "panic" {
                panic!("core exploded");
            }
            if message.text == "stall" {
                if let Some(sink) = &on_chunk {
                    sink("thinking ".into());
                }
                std::future::pending::<()>().await;
            }
            if message.text == "fail" {
                return Err(Error::Turn("model unavailable".into()));
            }
            if let Some(sink) = on_chunk {
                for word in message.text.split_inclusive(' ') {
                    sink(word.to_string());
                }
            }
            Ok(message.text)
        }
    }

    fn context() -> TurnContext {
        let core: Arc<dyn AgentCore> = Arc::new(WordCore);
        let registry = Arc::new(SessionRegistry::new(
            core.clone(),
            SessionKeyDeriver::default(),
        ));
        let session = registry.get_or_create("cli", "u1", "c1", None).unwrap();
        TurnContext {
            core,
            registry,
            session,
        }
    }

    async fn collect(stream: TurnStream) -> Vec<StreamToken> {
        stream.collect().await
    }

    #[tokio::test]
    async fn chunks_then_end() {
        let ctx = context();
        let tokens = collect(spawn_turn(
            &Handle::current(),
            ctx,
            InboundMessage::new("hello there world"),
            TURN_TIMEOUT,
        ))
        .await;

        assert_eq!(
            tokens,
            vec![
                StreamToken::chunk("hello "),
                StreamToken::chunk("there "),
                StreamToken::chunk("world"),
                StreamToken::End {
                    text: "hello there world".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn producer_error_is_single_terminal_token() {
        let tokens = collect(spawn_turn(
            &Handle::current(),
            context(),
            InboundMessage::new("fail"),
            TURN_TIMEOUT,
        ))
        .await;
        assert_eq!(tokens.len(), 1);
        assert!(matches!(
            &tokens[0],
            StreamToken::Error { kind: StreamErrorKind::Producer, message } if message.contains("model unavailable")
        ));
    }

    #[tokio::test]
    async fn panic_becomes_panicked_error() {
        let tokens = collect(spawn_turn(
            &Handle::current(),
            context(),
            InboundMessage::new("panic"),
            TURN_TIMEOUT,
        ))
        .await;
        assert_eq!(tokens.len(), 1);
        assert!(matches!(
            tokens[0],
            StreamToken::Error {
                kind: StreamErrorKind::Panicked,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn in_flight_released_after_turn() {
        let ctx = context();
        let session = ctx.session.clone();
        let text = spawn_turn(&Handle::current(), ctx, InboundMessage::new("a b"), TURN_TIMEOUT)
            .into_text()
            .await
            .unwrap();
        assert_eq!(text, "a b");

        // The producer drops its turn guard right after sending `End`.
        tokio::task::yield_now().await;
        for _ in 0..50 {
            if !session.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn non_streaming_turn_touches_session() {
        let ctx = context();
        let before = ctx.session.last_activity_at();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let turn = ctx.session.begin_turn();
        let reply = run_turn(ctx.clone(), InboundMessage::new("ping"), turn)
            .await
            .unwrap();
        assert_eq!(reply, "ping");
        assert!(ctx.session.last_activity_at() > before);
        assert!(!ctx.session.is_busy());
    }

    #[tokio::test]
    async fn stalled_turn_times_out_with_one_terminal_token() {
        let ctx = context();
        let session = ctx.session.clone();
        let tokens = collect(spawn_turn(
            &Handle::current(),
            ctx,
            InboundMessage::new("stall"),
            Duration::from_millis(30),
        ))
        .await;

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], StreamToken::chunk("thinking "));
        assert!(matches!(
            tokens[1],
            StreamToken::Error {
                kind: StreamErrorKind::TimedOut,
                ..
            }
        ));
        for _ in 0..50 {
            if !session.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn timed_out_stream_drains_to_timeout_error() {
        let err = spawn_turn(
            &Handle::current(),
            context(),
            InboundMessage::new("stall"),
            Duration::from_millis(30),
        )
        .into_text()
        .await
        .unwrap_err();
        assert!(matches!(err, Error::CrossLoopTimeout { .. }));
    }

    #[tokio::test]
    async fn turn_on_replaced_session_leaves_replacement_untouched() {
        let ctx = context();
        let old = ctx.session.clone();
        ctx.registry.remove_key(&old.key, "test").unwrap();
        let replacement = ctx.registry.get_or_create("cli", "u1", "c1", None).unwrap();
        let before = replacement.last_activity_at();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let turn = old.begin_turn();
        run_turn(ctx, InboundMessage::new("ping"), turn).await.unwrap();

        assert_eq!(replacement.last_activity_at(), before);
    }
}
