//! Per-connection session handling: receive loop, session state machine,
//! ticker lifecycle and cleanup.
//!
//! Three tasks cooperate on one connection: the receive loop (this
//! module), the write pump ([`crate::outbound::write_pump`]) and the
//! ticker ([`crate::ticker`]). They share only the outbound queue and the
//! session record.

use std::sync::Arc;

use framerelay_protocol::constants::DEFAULT_SESSION_ID;
use framerelay_protocol::envelope::Envelope;
use framerelay_protocol::error::ProtocolError;
use framerelay_protocol::inbound::{Inbound, classify_binary, classify_text};
use framerelay_protocol::messages::{ControlMessage, StartRequest, StatusNotice};
use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::outbound::{OutboundQueue, Retention, write_pump};
use crate::session::{SessionState, SharedSession};
use crate::ticker::{Ticker, TickerContext, TickerState};

/// Connection handler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    AwaitingStart,
    Active,
    Ended,
}

/// Whether the receive loop keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    End,
}

/// Protocol driver for one connection, independent of the transport.
pub struct Connection {
    id: Uuid,
    config: Arc<RelayConfig>,
    clock: Arc<dyn Clock>,
    queue: Arc<OutboundQueue>,
    state: HandlerState,
    session: Option<SharedSession>,
    ticker: Ticker,
}

impl Connection {
    /// Creates a handler in [`HandlerState::AwaitingStart`].
    ///
    /// Background work is cancelled with `cancel`.
    pub fn new(config: Arc<RelayConfig>, clock: Arc<dyn Clock>, cancel: &CancellationToken) -> Self {
        let queue = Arc::new(OutboundQueue::new(config.outbound_capacity));
        Self {
            id: Uuid::new_v4(),
            config,
            clock,
            queue,
            state: HandlerState::AwaitingStart,
            session: None,
            ticker: Ticker::new(cancel),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn ticker_state(&self) -> TickerState {
        self.ticker.state()
    }

    /// The queue the write pump drains.
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// The active session, if `start` has been processed.
    pub fn session(&self) -> Option<&SharedSession> {
        self.session.as_ref()
    }

    /// Handles a textual message.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        match classify_text(text) {
            Inbound::Control(ControlMessage::Start(req)) => {
                self.on_start(req).await;
                Flow::Continue
            }
            Inbound::Control(ControlMessage::End) => self.on_end().await,
            Inbound::Control(ControlMessage::Unknown) => {
                tracing::debug!(conn = %self.id, "ignoring unknown control message");
                Flow::Continue
            }
            Inbound::Ignored(reason) => {
                tracing::debug!(conn = %self.id, "ignoring text message: {reason}");
                Flow::Continue
            }
            Inbound::Frame { .. } => Flow::Continue,
        }
    }

    /// Handles a binary message.
    pub async fn handle_binary(&mut self, data: &[u8]) -> Flow {
        let frame = match classify_binary(data) {
            Inbound::Frame { data, .. } => data,
            Inbound::Ignored(reason) => {
                tracing::debug!(conn = %self.id, "ignoring binary message: {reason}");
                return Flow::Continue;
            }
            Inbound::Control(_) => return Flow::Continue,
        };

        let Some(session) = &self.session else {
            tracing::trace!(conn = %self.id, bytes = frame.len(), "frame before start, dropped");
            return Flow::Continue;
        };

        let delta = {
            let mut st = session.lock().await;
            st.on_frame(frame.len());
            st.delta_due().then(|| st.delta())
        };

        if let Some(delta) = delta {
            tracing::debug!(conn = %self.id, frame_count = delta.frame_count, "delta");
            self.enqueue(delta.to_envelope(), Retention::Retained);
        }
        Flow::Continue
    }

    async fn on_start(&mut self, req: StartRequest) {
        if let Some(session) = &self.session {
            let existing = session.lock().await.id().to_string();
            tracing::warn!(conn = %self.id, session = %existing, "duplicate start rejected");
            self.enqueue(
                StatusNotice::rejected(Some(existing), "start rejected: session already active")
                    .to_envelope(),
                Retention::Droppable,
            );
            return;
        }

        let session_id = req
            .session_id
            .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
        let period = self.config.resolve_snapshot_period(req.snapshot_period_sec);
        let session = SessionState::new(session_id.clone(), period, self.clock.now()).shared();

        self.enqueue(
            StatusNotice::new(
                Some(session_id.clone()),
                format!("start ok, snapshot_period={period}"),
            )
            .to_envelope(),
            Retention::Retained,
        );

        self.ticker.start(TickerContext {
            session: Arc::clone(&session),
            queue: Arc::clone(&self.queue),
            clock: Arc::clone(&self.clock),
            status_period: self.config.status_period,
            capability: self.config.capability.clone(),
        });

        self.session = Some(session);
        self.state = HandlerState::Active;
        tracing::info!(conn = %self.id, session = %session_id, snapshot_period = period, "session started");
    }

    async fn on_end(&mut self) -> Flow {
        // Stop the ticker first so nothing it produces follows the end ack.
        self.ticker.stop().await;

        let session_id = match &self.session {
            Some(s) => {
                let st = s.lock().await;
                tracing::info!(
                    conn = %self.id,
                    session = %st.id(),
                    frame_count = st.frame_count(),
                    "session ended"
                );
                Some(st.id().to_string())
            }
            None => None,
        };

        self.enqueue(
            StatusNotice::new(session_id, "end received").to_envelope(),
            Retention::Retained,
        );
        self.state = HandlerState::Ended;
        Flow::End
    }

    fn enqueue(&self, envelope: Result<Envelope, ProtocolError>, retention: Retention) {
        match envelope {
            Ok(env) => {
                if let Err(e) = self.queue.push(&env, retention) {
                    tracing::debug!(conn = %self.id, "dropping {:?} envelope: {e}", env.kind);
                }
            }
            Err(e) => tracing::error!(conn = %self.id, "failed to build envelope: {e}"),
        }
    }

    /// Cleanup: stops the ticker, closes the queue and discards the session.
    ///
    /// Idempotent. Envelopes already queued remain for the write pump to drain.
    pub async fn shutdown(&mut self) {
        self.ticker.stop().await;
        self.queue.close();
        self.session = None;
        self.state = HandlerState::Ended;
    }
}

/// Serves one WebSocket connection until `end`, close, error or cancellation.
pub async fn serve_connection<S>(
    ws_stream: S,
    config: Arc<RelayConfig>,
    clock: Arc<dyn Clock>,
    parent: CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + 'static,
{
    let (sink, stream) = ws_stream.split();
    run_connection(sink, stream, config, clock, parent).await;
}

/// Runs the receive loop over separate halves, then cleans up.
pub async fn run_connection<W, R>(
    sink: W,
    mut stream: R,
    config: Arc<RelayConfig>,
    clock: Arc<dyn Clock>,
    parent: CancellationToken,
) where
    W: Sink<WsMessage, Error = tungstenite::Error> + Send + Unpin + 'static,
    R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    let cancel = parent.child_token();
    let drain_timeout = config.drain_timeout;
    let mut conn = Connection::new(config, clock, &cancel);
    let id = conn.id();
    tracing::info!(conn = %id, "connection opened");

    // Write pump.
    let queue = Arc::clone(conn.queue());
    let write_cancel = cancel.clone();
    let mut writer = tokio::spawn(async move {
        write_pump(sink, &queue, write_cancel).await;
    });

    // Receive loop.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                let flow = match frame {
                    Some(Ok(WsMessage::Text(text))) => conn.handle_text(&text).await,
                    Some(Ok(WsMessage::Binary(data))) => conn.handle_binary(&data).await,
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::info!(conn = %id, "received close frame");
                        Flow::End
                    }
                    // Ping/pong are answered by the WebSocket layer.
                    Some(Ok(_)) => Flow::Continue,
                    Some(Err(e)) => {
                        tracing::error!(conn = %id, "read error: {e}");
                        Flow::End
                    }
                    None => Flow::End, // Stream ended.
                };
                if flow == Flow::End {
                    break;
                }
            }
        }
    }

    // Cleanup runs on every exit path.
    conn.shutdown().await;
    if tokio::time::timeout(drain_timeout, &mut writer).await.is_err() {
        tracing::warn!(conn = %id, "outbound drain timed out");
        cancel.cancel();
        writer.abort();
        let _ = writer.await;
    }
    cancel.cancel();
    tracing::info!(conn = %id, "connection closed");
}
