//! # Report Decision Engine
//!
//! Decides when a fix is significant enough to spend uplink capacity on.
//!
//! ## Decision Order
//!
//! 1. Recompute the cadence multiplier from the local hour
//! 2. No fix: once the heartbeat window has passed, force a refresh from the
//!    best last-known fix and reset the timer
//! 3. Fix inside the base window: rate limited, whatever the movement
//! 4. Moved past the distance threshold: movement report
//! 5. Heartbeat window passed: heartbeat report
//!
//! Every report goes through a dedup check against the last payload the
//! transport accepted.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::clock::{Cadence, Clock};
use super::state::AgentState;
use crate::codec::{encode, WireForm};
use crate::config::ReportConfig;
use crate::error::Result;
use crate::geo::{great_circle_distance, Position};
use crate::gps::FixProvider;
use crate::transport::{Topic, Transport};

/// Why a report was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Moved past the distance threshold
    Movement,

    /// Stationary for longer than the heartbeat window
    Heartbeat,

    /// No live fix; best last-known fix used instead
    Refresh,

    /// Operator asked for the position
    OnDemand,
}

/// Result of one `consider` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing worth reporting yet
    Idle,

    /// Inside the base interval
    RateLimited,

    /// Payload handed to the transport
    Sent(Trigger),

    /// Payload identical to the last one sent; timer reset without sending
    Suppressed(Trigger),

    /// Forced refresh found no position at all; timer reset
    RefreshUnavailable,
}

/// Report decision engine
pub struct ReportEngine {
    config: ReportConfig,
    cadence: Cadence,
    transport: Arc<dyn Transport>,
    fixes: Arc<dyn FixProvider>,
    clock: Arc<dyn Clock>,
}

impl ReportEngine {
    pub fn new(
        config: ReportConfig,
        transport: Arc<dyn Transport>,
        fixes: Arc<dyn FixProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cadence = Cadence::from_config(&config);
        Self {
            config,
            cadence,
            transport,
            fixes,
            clock,
        }
    }

    fn base_window(&self, multiplier: u32) -> Duration {
        Duration::from_secs(self.config.base_interval_secs).saturating_mul(multiplier)
    }

    fn heartbeat_window(&self, multiplier: u32) -> Duration {
        Duration::from_secs(self.config.heartbeat_interval_secs).saturating_mul(multiplier)
    }

    /// Decide whether `fix` warrants a report, and send it if so
    ///
    /// # Errors
    ///
    /// Returns the transport error if a report was due but could not be sent.
    /// State is left as it was so the next poll decides again.
    pub async fn consider(&self, state: &mut AgentState, fix: Option<Position>) -> Result<Decision> {
        state.cadence_multiplier = self.cadence.multiplier_for(self.clock.local_hour());
        let multiplier = state.cadence_multiplier;

        let now = self.clock.now();
        let elapsed = state.elapsed_since_report(now);
        let heartbeat_due = exceeds(elapsed, self.heartbeat_window(multiplier));

        let Some(position) = fix else {
            if !heartbeat_due {
                return Ok(Decision::Idle);
            }
            return self.forced_refresh(state, now).await;
        };

        if !exceeds(elapsed, self.base_window(multiplier)) {
            return Ok(Decision::RateLimited);
        }

        let moved = state
            .last_reported_position
            .map(|last| great_circle_distance(last, position, self.config.distance_unit))
            .unwrap_or(f64::INFINITY);

        if moved > self.config.distance_threshold {
            debug!("Moved {:.3} {:?} since last report", moved, self.config.distance_unit);
            self.report_now(state, position, Trigger::Movement).await
        } else if heartbeat_due {
            self.report_now(state, position, Trigger::Heartbeat).await
        } else {
            Ok(Decision::Idle)
        }
    }

    async fn forced_refresh(&self, state: &mut AgentState, now: Instant) -> Result<Decision> {
        let decision = match self.fixes.last_known().await {
            Some(position) => self.report_now(state, position, Trigger::Refresh).await,
            None => {
                debug!("Heartbeat due but no position is known");
                Ok(Decision::RefreshUnavailable)
            }
        };

        state.mark_report_time(now);
        decision
    }

    /// Report `position` unless it encodes to the last payload sent
    pub async fn report_now(
        &self,
        state: &mut AgentState,
        position: Position,
        trigger: Trigger,
    ) -> Result<Decision> {
        let payload = self.encode_position(position)?;
        let now = self.clock.now();

        if state.last_sent_payload.as_deref() == Some(payload.as_slice()) {
            debug!("Suppressing duplicate {:?} report of {}", trigger, position);
            state.mark_reported(position, now);
            return Ok(Decision::Suppressed(trigger));
        }

        self.transport.send(&payload, Topic::Gps).await?;
        state.mark_reported(position, now);
        state.last_sent_payload = Some(payload);

        info!("Reported {} ({:?}, cadence x{})", position, trigger, state.cadence_multiplier);
        Ok(Decision::Sent(trigger))
    }

    /// Send `position` in reply to an operator request, bypassing dedup
    pub async fn reply(&self, state: &mut AgentState, position: Position) -> Result<Decision> {
        let payload = self.encode_position(position)?;

        self.transport.send(&payload, Topic::Gps).await?;
        state.mark_reported(position, self.clock.now());
        state.last_sent_payload = Some(payload);

        info!("Replied with position {}", position);
        Ok(Decision::Sent(Trigger::OnDemand))
    }

    fn encode_position(&self, position: Position) -> Result<Vec<u8>> {
        let fields = [position.latitude.to_string(), position.longitude.to_string()];
        encode(&fields, self.wire_form())
    }

    pub fn wire_form(&self) -> WireForm {
        self.config.wire_form
    }
}

/// `elapsed` is past `window`; never having reported counts as past
fn exceeds(elapsed: Option<Duration>, window: Duration) -> bool {
    elapsed.map_or(true, |elapsed| elapsed > window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::clock::mocks::ManualClock;
    use crate::agent::state::Identity;
    use crate::codec::decode;
    use crate::config::tests::create_valid_config;
    use crate::gps::feed::mocks::StaticFixes;
    use crate::transport::mocks::MockTransport;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        engine: ReportEngine,
        transport: MockTransport,
        fixes: StaticFixes,
        clock: ManualClock,
        state: AgentState,
    }

    fn harness() -> Harness {
        let transport = MockTransport::new();
        let fixes = StaticFixes::new();
        let clock = ManualClock::new();
        let engine = ReportEngine::new(
            create_valid_config().report,
            Arc::new(transport.clone()),
            Arc::new(fixes.clone()),
            Arc::new(clock.clone()),
        );
        let state = AgentState::new(Identity {
            truck_id: "T-1".to_string(),
            asset_uuid: "uuid".to_string(),
        });

        Harness {
            engine,
            transport,
            fixes,
            clock,
            state,
        }
    }

    fn origin() -> Position {
        Position::new(40.0, -75.0)
    }

    #[tokio::test]
    async fn test_first_fix_is_reported() {
        let mut h = harness();
        let decision = assert_ok!(h.engine.consider(&mut h.state, Some(origin())).await);

        assert_eq!(decision, Decision::Sent(Trigger::Movement));
        assert_eq!(h.transport.get_sent(), vec![(Topic::Gps, b"40:-75".to_vec())]);
        assert_eq!(h.state.last_reported_position, Some(origin()));
        assert_eq!(h.state.last_sent_payload.as_deref(), Some(&b"40:-75"[..]));
        assert_eq!(h.state.cadence_multiplier, 2);
    }

    #[tokio::test]
    async fn test_daytime_scenario() {
        let mut h = harness();

        // t=0: reported
        h.engine.consider(&mut h.state, Some(origin())).await.unwrap();

        // t=100: inside 120s x2
        h.clock.set_secs(100);
        let decision = h.engine.consider(&mut h.state, Some(origin())).await.unwrap();
        assert_eq!(decision, Decision::RateLimited);

        // t=250: ~0.35mi is under the 0.75mi threshold, heartbeat not due
        let nudged = Position::new(40.005, -75.0);
        h.clock.set_secs(250);
        let decision = h.engine.consider(&mut h.state, Some(nudged)).await.unwrap();
        assert_eq!(decision, Decision::Idle);
        assert_eq!(h.transport.send_count(), 1);

        // t=1761: past 880s x2, heartbeat forces the report
        h.clock.set_secs(1761);
        let decision = h.engine.consider(&mut h.state, Some(nudged)).await.unwrap();
        assert_eq!(decision, Decision::Sent(Trigger::Heartbeat));
        assert_eq!(h.transport.send_count(), 2);
        assert_eq!(h.state.last_report_time, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn test_small_move_inside_base_window_never_reports() {
        let mut h = harness();
        h.engine.consider(&mut h.state, Some(origin())).await.unwrap();

        for (secs, lat) in [(10, 40.001), (60, 40.002), (200, 40.003)] {
            h.clock.set_secs(secs);
            let decision = h
                .engine
                .consider(&mut h.state, Some(Position::new(lat, -75.0)))
                .await
                .unwrap();
            assert!(matches!(decision, Decision::RateLimited | Decision::Idle));
        }
        assert_eq!(h.transport.send_count(), 1);
    }

    #[tokio::test]
    async fn test_large_move_reports_after_base_window() {
        let mut h = harness();
        h.engine.consider(&mut h.state, Some(origin())).await.unwrap();

        let far = Position::new(40.02, -75.0);
        h.clock.set_secs(200);
        assert_eq!(
            h.engine.consider(&mut h.state, Some(far)).await.unwrap(),
            Decision::RateLimited
        );

        h.clock.set_secs(241);
        assert_eq!(
            h.engine.consider(&mut h.state, Some(far)).await.unwrap(),
            Decision::Sent(Trigger::Movement)
        );
    }

    #[tokio::test]
    async fn test_night_multiplier_stretches_windows() {
        let mut h = harness();
        h.clock.set_hour(2);
        h.engine.consider(&mut h.state, Some(origin())).await.unwrap();
        assert_eq!(h.state.cadence_multiplier, 20);

        // 120s x20 = 2400s
        let far = Position::new(41.0, -75.0);
        h.clock.set_secs(2000);
        assert_eq!(
            h.engine.consider(&mut h.state, Some(far)).await.unwrap(),
            Decision::RateLimited
        );

        // Morning arrives: multiplier drops back to 2
        h.clock.set_hour(9);
        assert_eq!(
            h.engine.consider(&mut h.state, Some(far)).await.unwrap(),
            Decision::Sent(Trigger::Movement)
        );
        assert_eq!(h.state.cadence_multiplier, 2);
    }

    #[tokio::test]
    async fn test_duplicate_payload_suppressed_but_timer_reset() {
        let mut h = harness();

        h.clock.set_secs(10);
        let first = assert_ok!(h.engine.report_now(&mut h.state, origin(), Trigger::Heartbeat).await);
        let first_time = h.state.last_report_time;

        h.clock.set_secs(20);
        let second = assert_ok!(h.engine.report_now(&mut h.state, origin(), Trigger::Heartbeat).await);

        assert_eq!(first, Decision::Sent(Trigger::Heartbeat));
        assert_eq!(second, Decision::Suppressed(Trigger::Heartbeat));
        assert_eq!(h.transport.send_count(), 1);
        assert!(h.state.last_report_time > first_time);
        assert_eq!(h.state.last_report_time, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn test_no_fix_before_heartbeat_does_nothing() {
        let mut h = harness();
        h.engine.consider(&mut h.state, Some(origin())).await.unwrap();
        h.fixes.set_last_known(Some(Position::new(40.5, -75.0)));

        h.clock.set_secs(1000);
        assert_eq!(h.engine.consider(&mut h.state, None).await.unwrap(), Decision::Idle);
        assert_eq!(h.transport.send_count(), 1);
    }

    #[tokio::test]
    async fn test_no_fix_after_heartbeat_forces_refresh() {
        let mut h = harness();
        h.engine.consider(&mut h.state, Some(origin())).await.unwrap();
        let refreshed = Position::new(40.5, -75.0);
        h.fixes.set_last_known(Some(refreshed));

        h.clock.set_secs(1800);
        let decision = h.engine.consider(&mut h.state, None).await.unwrap();

        assert_eq!(decision, Decision::Sent(Trigger::Refresh));
        assert_eq!(h.state.last_reported_position, Some(refreshed));
        assert_eq!(h.state.last_report_time, Some(h.clock.now()));

        // Timer was reset: the next poll without a fix stays quiet
        h.clock.set_secs(1830);
        assert_eq!(h.engine.consider(&mut h.state, None).await.unwrap(), Decision::Idle);
    }

    #[tokio::test]
    async fn test_refresh_without_any_position_still_resets_timer() {
        let mut h = harness();
        h.clock.set_secs(5);

        let decision = h.engine.consider(&mut h.state, None).await.unwrap();
        assert_eq!(decision, Decision::RefreshUnavailable);
        assert_eq!(h.state.last_report_time, Some(h.clock.now()));
        assert_eq!(h.transport.send_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_leaves_state_untouched() {
        let mut h = harness();
        h.transport.set_send_error(true);

        assert_err!(h.engine.consider(&mut h.state, Some(origin())).await);
        assert!(h.state.last_sent_payload.is_none());
        assert!(h.state.last_report_time.is_none());
        assert!(h.state.last_reported_position.is_none());

        h.transport.set_send_error(false);
        assert_eq!(
            h.engine.consider(&mut h.state, Some(origin())).await.unwrap(),
            Decision::Sent(Trigger::Movement)
        );
    }

    #[tokio::test]
    async fn test_reply_bypasses_dedup() {
        let mut h = harness();
        h.engine.consider(&mut h.state, Some(origin())).await.unwrap();

        let decision = assert_ok!(h.engine.reply(&mut h.state, origin()).await);
        assert_eq!(decision, Decision::Sent(Trigger::OnDemand));
        assert_eq!(h.transport.send_count(), 2);
    }

    #[tokio::test]
    async fn test_armored_reports_decode_to_coordinates() {
        let transport = MockTransport::new();
        let mut config = create_valid_config().report;
        config.wire_form = WireForm::Armored;
        let engine = ReportEngine::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(StaticFixes::new()),
            Arc::new(ManualClock::new()),
        );
        let mut state = AgentState::new(Identity {
            truck_id: "T".to_string(),
            asset_uuid: "U".to_string(),
        });

        engine.consider(&mut state, Some(Position::new(39.5, -74.25))).await.unwrap();

        let (_, payload) = &transport.get_sent()[0];
        let fields = decode(payload).unwrap().into_fields();
        assert_eq!(fields, vec!["39.5".to_string(), "-74.25".to_string()]);
    }

    #[tokio::test]
    async fn test_extreme_cadence_saturates_instead_of_panicking() {
        let mut config = create_valid_config().report;
        config.base_interval_secs = u64::MAX / 2;
        config.heartbeat_interval_secs = u64::MAX / 2;
        config.day_multiplier = u32::MAX;
        let transport = MockTransport::new();
        let clock = ManualClock::new();
        let engine = ReportEngine::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(StaticFixes::new()),
            Arc::new(clock.clone()),
        );
        let mut state = AgentState::new(Identity {
            truck_id: "T".to_string(),
            asset_uuid: "U".to_string(),
        });

        assert_ok!(engine.consider(&mut state, Some(origin())).await);
        clock.set_secs(3600);
        let decision = assert_ok!(engine.consider(&mut state, Some(Position::new(45.0, -75.0))).await);
        assert_eq!(decision, Decision::RateLimited);
        assert_eq!(transport.send_count(), 1);
    }
}
