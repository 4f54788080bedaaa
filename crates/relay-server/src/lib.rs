//! WebSocket ingest relay.
//!
//! Each connection carries one session: the client sends JSON control
//! messages (`start`, `end`) and binary image frames; the relay tracks
//! per-session counters and sends back status, delta and snapshot
//! envelopes through a single ordered outbound queue.

pub mod clock;
pub mod config;
mod connection;
mod outbound;
mod server;
pub mod session;
pub mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RelayConfig;
pub use connection::{Connection, Flow, HandlerState, run_connection, serve_connection};
pub use outbound::{OutboundQueue, PushOutcome, QueueClosed, Retention};
pub use server::{RelayServer, ServerConfig};
pub use ticker::{Ticker, TickerState};

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] framerelay_protocol::ProtocolError),
}
