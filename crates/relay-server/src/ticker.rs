//! Status/snapshot ticker.
//!
//! One background loop per session. Every status period it pushes a status
//! report; whenever the session's snapshot period has elapsed since the
//! last snapshot it also pushes a snapshot. Snapshot cadence is therefore
//! rounded up to a whole number of status periods.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::outbound::{OutboundQueue, Retention};
use crate::session::SharedSession;

/// Lifecycle of a connection's ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerState {
    Idle,
    Running,
    Stopped,
}

/// What the ticker loop needs from its connection.
pub struct TickerContext {
    pub session: SharedSession,
    pub queue: Arc<OutboundQueue>,
    pub clock: Arc<dyn Clock>,
    pub status_period: Duration,
    pub capability: String,
}

/// Handle owning the ticker task.
#[derive(Debug)]
pub struct Ticker {
    state: TickerState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Creates an idle ticker whose loop is cancelled together with `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            state: TickerState::Idle,
            cancel: parent.child_token(),
            handle: None,
        }
    }

    pub fn state(&self) -> TickerState {
        self.state
    }

    /// Spawns the loop. Only the first call on an idle ticker does anything;
    /// returns whether a loop was started.
    pub fn start(&mut self, ctx: TickerContext) -> bool {
        if self.state != TickerState::Idle {
            return false;
        }

        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(status_loop(ctx, cancel)));
        self.state = TickerState::Running;
        tracing::info!("ticker started");
        true
    }

    /// Cancels the loop and waits for it to exit.
    ///
    /// Safe to call in any state and more than once. Once this returns the
    /// loop will push nothing more.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                tracing::error!("ticker task panicked: {e}");
            }
            tracing::info!("ticker stopped");
        }
        self.state = TickerState::Stopped;
    }
}

async fn status_loop(ctx: TickerContext, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.status_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the first immediate tick.
    ticker.tick().await;

    let mut last_snapshot = ctx.clock.now();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                let now = ctx.clock.now();
                let (report, snapshot) = {
                    let mut st = ctx.session.lock().await;
                    let report = st.status_report(now, &ctx.capability);
                    let snapshot = if now.saturating_duration_since(last_snapshot) >= st.snapshot_period() {
                        last_snapshot = now;
                        Some(st.snapshot())
                    } else {
                        None
                    };
                    (report, snapshot)
                };

                tracing::trace!(
                    frame_count = report.frame_count,
                    fps = report.fps_est,
                    "status tick"
                );

                let mut envelopes = vec![report.to_envelope()];
                if let Some(snap) = snapshot {
                    envelopes.push(snap.to_envelope());
                }
                for envelope in envelopes {
                    match envelope {
                        Ok(env) => {
                            if ctx.queue.push(&env, Retention::Droppable).is_err() {
                                return; // Connection is shutting down.
                            }
                        }
                        Err(e) => tracing::error!("failed to build ticker envelope: {e}"),
                    }
                }
            }
        }
    }
}
