//! Keepalive / loss detection.
//!
//! A sliding-window liveness check, not a per-frame timeout: the monitor
//! ticks once per loss window and requires at least one accepted frame in
//! every window. The window that ends with no frame flips the link to
//! `Lost` — exactly once, since the check takes no action while the link
//! is not `Connected`.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::state::{LinkState, Liveness};

/// Repeating window timer over the shared connection flags.
pub(crate) struct KeepAliveMonitor {
    window: Interval,
    state: LinkState,
}

impl KeepAliveMonitor {
    /// Arm the monitor; the first window ends one `loss_window` from now.
    pub(crate) fn new(loss_window: Duration, state: LinkState) -> Self {
        let mut window = interval_at(Instant::now() + loss_window, loss_window);
        window.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { window, state }
    }

    /// Wait for the current window to end and evaluate it.
    pub(crate) async fn check(&mut self) -> Liveness {
        self.window.tick().await;
        self.state.keepalive_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;

    #[tokio::test(start_paused = true)]
    async fn test_lost_at_end_of_first_silent_window() {
        let state = LinkState::new();
        state.set(ConnectionState::Handshaking);
        state.frame_accepted();

        let mut monitor = KeepAliveMonitor::new(Duration::from_millis(1000), state.clone());
        let start = Instant::now();

        // Window 1 had a frame: flag consumed, still alive.
        assert_eq!(monitor.check().await, Liveness::Alive);
        // Window 2 is silent: lost at its end, one window later.
        assert_eq!(monitor.check().await, Liveness::Lost);
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
        assert_eq!(state.state(), ConnectionState::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_every_window_stays_alive() {
        let state = LinkState::new();
        state.set(ConnectionState::Handshaking);
        state.frame_accepted();

        let mut monitor = KeepAliveMonitor::new(Duration::from_millis(500), state.clone());

        for _ in 0..4 {
            assert_eq!(monitor.check().await, Liveness::Alive);
            state.mark_received();
        }
        assert_eq!(state.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_action_while_not_connected() {
        let state = LinkState::new();
        state.set(ConnectionState::Handshaking);

        let mut monitor = KeepAliveMonitor::new(Duration::from_millis(100), state.clone());

        assert_eq!(monitor.check().await, Liveness::NotConnected);
        assert_eq!(state.state(), ConnectionState::Handshaking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_only_once() {
        let state = LinkState::new();
        state.set(ConnectionState::Handshaking);
        state.frame_accepted();

        let mut monitor = KeepAliveMonitor::new(Duration::from_millis(100), state.clone());

        assert_eq!(monitor.check().await, Liveness::Alive);
        assert_eq!(monitor.check().await, Liveness::Lost);
        // Later windows observe a non-connected link and do nothing.
        assert_eq!(monitor.check().await, Liveness::NotConnected);
        assert_eq!(monitor.check().await, Liveness::NotConnected);
    }
}
