//! Per-connection session record.

use std::sync::Arc;
use std::time::Duration;

use framerelay_protocol::constants::{DELTA_EVERY_FRAMES, EnvelopeType};
use framerelay_protocol::messages::{DeltaPayload, SnapshotPayload, StatusReport, round2};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Floor on the fps sampling window so back-to-back calls never divide by zero.
const MIN_FPS_WINDOW: Duration = Duration::from_micros(1);

const STATUS_NOTE: &str = "relay: receiving frames + sending status";

/// Session record shared by the receive loop and the ticker.
pub type SharedSession = Arc<Mutex<SessionState>>;

/// Metrics for one client's frame stream, from `start` to cleanup.
#[derive(Debug)]
pub struct SessionState {
    id: String,
    snapshot_period_sec: u32,
    frame_count: u64,
    last_frame_bytes: usize,
    started_at: Instant,
    last_sample_at: Instant,
    last_sample_frames: u64,
}

impl SessionState {
    pub fn new(id: impl Into<String>, snapshot_period_sec: u32, now: Instant) -> Self {
        Self {
            id: id.into(),
            snapshot_period_sec,
            frame_count: 0,
            last_frame_bytes: 0,
            started_at: now,
            last_sample_at: now,
            last_sample_frames: 0,
        }
    }

    /// Wraps the record for sharing with the ticker.
    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.snapshot_period_sec))
    }

    pub fn snapshot_period_sec(&self) -> u32 {
        self.snapshot_period_sec
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn last_frame_bytes(&self) -> usize {
        self.last_frame_bytes
    }

    /// Records one accepted frame of `byte_count` payload bytes.
    pub fn on_frame(&mut self, byte_count: usize) {
        self.frame_count += 1;
        self.last_frame_bytes = byte_count;
    }

    /// Returns `true` when the frame counter sits on a delta boundary.
    pub fn delta_due(&self) -> bool {
        self.frame_count > 0 && self.frame_count % DELTA_EVERY_FRAMES == 0
    }

    /// Frames per second since the previous call, then restarts the window.
    pub fn fps_estimate(&mut self, now: Instant) -> f64 {
        let elapsed = now
            .saturating_duration_since(self.last_sample_at)
            .max(MIN_FPS_WINDOW);
        let frames = self.frame_count - self.last_sample_frames;

        self.last_sample_at = now;
        self.last_sample_frames = self.frame_count;

        frames as f64 / elapsed.as_secs_f64()
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Builds a status report, advancing the fps window.
    pub fn status_report(&mut self, now: Instant, capability: &str) -> StatusReport {
        let fps = self.fps_estimate(now);
        StatusReport {
            msg_type: EnvelopeType::Status,
            session_id: self.id.clone(),
            uptime_sec: round2(self.uptime(now).as_secs_f64()),
            frame_count: self.frame_count,
            last_frame_bytes: self.last_frame_bytes,
            fps_est: round2(fps),
            gpu_visible: capability.to_string(),
            note: STATUS_NOTE.into(),
        }
    }

    pub fn snapshot(&self) -> SnapshotPayload {
        SnapshotPayload::new(&self.id, self.frame_count)
    }

    pub fn delta(&self) -> DeltaPayload {
        DeltaPayload::new(&self.id, self.frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    #[test]
    fn on_frame_counts_and_records_size() {
        let clock = ManualClock::new();
        let mut st = SessionState::new("s1", 3, clock.now());
        st.on_frame(100);
        st.on_frame(250);
        assert_eq!(st.frame_count(), 2);
        assert_eq!(st.last_frame_bytes(), 250);
    }

    #[test]
    fn delta_due_every_thirty_frames() {
        let clock = ManualClock::new();
        let mut st = SessionState::new("s1", 3, clock.now());
        assert!(!st.delta_due());

        let mut deltas = 0;
        for _ in 0..95 {
            st.on_frame(10);
            if st.delta_due() {
                deltas += 1;
            }
        }
        assert_eq!(st.frame_count(), 95);
        assert_eq!(deltas, 3);
    }

    #[test]
    fn fps_over_window() {
        let clock = ManualClock::new();
        let mut st = SessionState::new("s1", 3, clock.now());
        for _ in 0..30 {
            st.on_frame(1);
        }
        clock.advance(Duration::from_secs(2));
        assert_eq!(st.fps_estimate(clock.now()), 15.0);

        // The window restarted: no new frames, one more second.
        clock.advance(Duration::from_secs(1));
        assert_eq!(st.fps_estimate(clock.now()), 0.0);
    }

    #[test]
    fn fps_back_to_back_never_divides_by_zero() {
        let clock = ManualClock::new();
        let mut st = SessionState::new("s1", 3, clock.now());
        st.on_frame(1);

        let first = st.fps_estimate(clock.now());
        assert!(first.is_finite());
        assert!(first >= 0.0);

        let second = st.fps_estimate(clock.now());
        assert_eq!(second, 0.0);
    }

    #[test]
    fn status_report_fields() {
        let clock = ManualClock::new();
        let mut st = SessionState::new("s1", 5, clock.now());
        for _ in 0..30 {
            st.on_frame(100);
        }
        clock.advance(Duration::from_millis(1250));

        let report = st.status_report(clock.now(), "0,1");
        assert_eq!(report.session_id, "s1");
        assert_eq!(report.frame_count, 30);
        assert_eq!(report.last_frame_bytes, 100);
        assert_eq!(report.uptime_sec, 1.25);
        assert_eq!(report.fps_est, 24.0);
        assert_eq!(report.gpu_visible, "0,1");
    }

    #[test]
    fn snapshot_period_duration() {
        let clock = ManualClock::new();
        let st = SessionState::new("s1", 5, clock.now());
        assert_eq!(st.snapshot_period(), Duration::from_secs(5));
    }
}
