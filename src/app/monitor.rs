// The completion monitor: decides whether to show the notice at all, then
// polls the watched unit until it reports `active (exited)`. Drivers in `app`
// feed it the current time and user activations.

use super::model::UnitState;
use super::sink::{ActivationReason, Notice, NotificationSink};
use super::systemd::{QueryError, StateQuery};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_UNIT: &str = "snapd.seeded.service";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Consecutive failed ticks after which the failure streak is logged as an error.
pub const FAILURE_ESCALATION: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub unit: String,
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            unit: DEFAULT_UNIT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The unit was already done at startup; no notice was ever shown.
    AlreadyComplete,
    /// The unit finished while we were watching.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Deciding,
    Watching,
    Terminated(Completion),
}

/// A periodic deadline advanced by whoever owns the clock.
#[derive(Debug)]
pub struct PollTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl PollTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    /// Returns whether the timer was armed.
    pub fn disarm(&mut self) -> bool {
        self.next_due.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Consumes one expiry if due. Missed periods collapse into a single
    /// tick and the next deadline is measured from `now`.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}

pub struct MonitorSession<Q, S> {
    config: MonitorConfig,
    notice: Notice,
    query: Q,
    sink: S,
    timer: PollTimer,
    phase: Phase,
    ui_engaged: bool,
    last_state: Option<UnitState>,
    last_error: Option<String>,
    failure_streak: u32,
    failed_state_reported: bool,
}

impl<Q: StateQuery, S: NotificationSink> MonitorSession<Q, S> {
    pub fn new(config: MonitorConfig, query: Q, sink: S) -> Self {
        let timer = PollTimer::new(config.poll_interval);
        Self {
            config,
            notice: Notice::installation(),
            query,
            sink,
            timer,
            phase: Phase::Deciding,
            ui_engaged: false,
            last_state: None,
            last_error: None,
            failure_streak: 0,
            failed_state_reported: false,
        }
    }

    /// Takes the startup snapshot. A query failure here is returned to the
    /// caller: without an initial state there is nothing safe to decide.
    pub fn decide(&mut self, now: Instant) -> Result<Phase, QueryError> {
        if self.phase != Phase::Deciding {
            return Ok(self.phase);
        }

        let state = self.query.query(&self.config.unit)?;
        info!(unit = %self.config.unit, %state, "initial unit state");

        if state.is_terminal() {
            self.last_state = Some(state);
            self.phase = Phase::Terminated(Completion::AlreadyComplete);
            return Ok(self.phase);
        }

        self.observe(state);
        self.ui_engaged = true;
        self.sink.show(&self.notice);
        self.timer.arm(now);
        self.phase = Phase::Watching;
        Ok(self.phase)
    }

    /// Runs a poll tick if one is due at `now`.
    pub fn advance(&mut self, now: Instant) -> Phase {
        if self.phase == Phase::Watching && self.timer.fire(now) {
            self.tick();
        }
        self.phase
    }

    pub fn activate(&mut self, reason: ActivationReason) {
        if self.phase != Phase::Watching {
            return;
        }
        debug!(?reason, "notification activated");
        if reason == ActivationReason::Trigger {
            self.sink.show(&self.notice);
        }
    }

    fn tick(&mut self) {
        let state = match self.query.query(&self.config.unit) {
            Ok(state) => state,
            Err(err) => {
                self.record_failure(err);
                return;
            }
        };

        if self.failure_streak > 0 {
            info!(failures = self.failure_streak, "unit state query recovered");
            self.failure_streak = 0;
        }
        self.last_error = None;

        if state.is_terminal() {
            info!(unit = %self.config.unit, %state, "unit finished");
            self.last_state = Some(state);
            if self.ui_engaged {
                self.sink.clear();
                self.ui_engaged = false;
            }
            self.timer.disarm();
            self.phase = Phase::Terminated(Completion::Completed);
            return;
        }

        self.observe(state);
    }

    fn observe(&mut self, state: UnitState) {
        if state.is_failed() {
            if !self.failed_state_reported {
                warn!(unit = %self.config.unit, %state, "unit is in a failed state, still waiting");
                self.failed_state_reported = true;
            }
        } else {
            self.failed_state_reported = false;
        }

        if self.last_state.as_ref() != Some(&state) {
            debug!(unit = %self.config.unit, %state, "unit state changed");
        }
        self.last_state = Some(state);
    }

    fn record_failure(&mut self, err: QueryError) {
        self.failure_streak += 1;
        warn!(
            unit = %self.config.unit,
            failures = self.failure_streak,
            "unit state query failed, retrying next tick: {err}"
        );
        if self.failure_streak == FAILURE_ESCALATION {
            error!(
                unit = %self.config.unit,
                failures = self.failure_streak,
                "unit state has been unreadable for {:?}",
                self.config.poll_interval * self.failure_streak
            );
        }
        self.last_error = Some(err.to_string());
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }

    pub fn ui_engaged(&self) -> bool {
        self.ui_engaged
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_due()
    }

    pub fn unit(&self) -> &str {
        &self.config.unit
    }

    pub fn last_state(&self) -> Option<&UnitState> {
        self.last_state.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[cfg(test)]
    fn timer(&self) -> &PollTimer {
        &self.timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const INTERVAL: Duration = Duration::from_millis(5000);

    struct ScriptedQuery {
        replies: VecDeque<Result<UnitState, QueryError>>,
        calls: usize,
    }

    impl ScriptedQuery {
        fn new(replies: Vec<Result<UnitState, QueryError>>) -> Self {
            Self {
                replies: replies.into(),
                calls: 0,
            }
        }
    }

    impl StateQuery for ScriptedQuery {
        fn query(&mut self, unit: &str) -> Result<UnitState, QueryError> {
            assert_eq!(unit, DEFAULT_UNIT);
            self.calls += 1;
            self.replies
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected query #{}", self.calls))
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Show(String),
        Clear,
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<Call>,
    }

    impl NotificationSink for RecordingSink {
        fn show(&mut self, notice: &Notice) {
            self.calls.push(Call::Show(notice.body.clone()));
        }

        fn clear(&mut self) {
            self.calls.push(Call::Clear);
        }
    }

    fn ok(active: &str, sub: &str) -> Result<UnitState, QueryError> {
        Ok(UnitState::new(active, sub))
    }

    fn transport_error() -> Result<UnitState, QueryError> {
        Err(QueryError::Transport(zbus::Error::Failure("bus went away".into())))
    }

    fn session(
        replies: Vec<Result<UnitState, QueryError>>,
    ) -> MonitorSession<ScriptedQuery, RecordingSink> {
        MonitorSession::new(
            MonitorConfig::default(),
            ScriptedQuery::new(replies),
            RecordingSink::default(),
        )
    }

    fn body() -> String {
        Notice::installation().body
    }

    #[test]
    fn already_exited_unit_never_shows_notice() {
        let mut session = session(vec![ok("active", "exited")]);
        let start = Instant::now();

        let phase = session.decide(start).unwrap();

        assert_eq!(phase, Phase::Terminated(Completion::AlreadyComplete));
        assert!(session.sink().calls.is_empty());
        assert!(!session.ui_engaged());
        assert_eq!(session.next_deadline(), None);
        assert_eq!(session.advance(start + INTERVAL * 3), phase);
        assert_eq!(session.query.calls, 1);
    }

    #[test]
    fn unfinished_unit_shows_notice_once_before_first_tick() {
        let mut session = session(vec![ok("activating", "start")]);
        let start = Instant::now();

        assert_eq!(session.decide(start).unwrap(), Phase::Watching);
        assert!(session.ui_engaged());
        assert_eq!(session.sink().calls, vec![Call::Show(body())]);
        assert_eq!(session.next_deadline(), Some(start + INTERVAL));

        // Nothing is due yet.
        assert_eq!(session.advance(start + INTERVAL / 2), Phase::Watching);
        assert_eq!(session.query.calls, 1);
    }

    #[test]
    fn startup_query_failure_is_fatal() {
        let mut session = session(vec![Err(QueryError::UnitNotFound(DEFAULT_UNIT.into()))]);

        let err = session.decide(Instant::now()).unwrap_err();

        assert!(matches!(err, QueryError::UnitNotFound(_)));
        assert_eq!(session.phase(), Phase::Deciding);
        assert!(session.sink().calls.is_empty());
    }

    #[test]
    fn non_terminal_ticks_are_silent() {
        let mut session = session(vec![
            ok("activating", "start"),
            ok("active", "running"),
            ok("failed", "failed"),
            ok("inactive", "dead"),
            ok("active", "running"),
        ]);
        let start = Instant::now();
        session.decide(start).unwrap();

        for n in 1..=4 {
            assert_eq!(session.advance(start + INTERVAL * n), Phase::Watching);
        }

        assert_eq!(session.sink().calls, vec![Call::Show(body())]);
        assert_eq!(session.query.calls, 5);
        assert_eq!(session.last_state(), Some(&UnitState::new("active", "running")));
    }

    #[test]
    fn running_then_exited_clears_once_and_terminates() {
        let mut session = session(vec![
            ok("active", "running"),
            ok("active", "running"),
            ok("active", "exited"),
        ]);
        let start = Instant::now();

        assert_eq!(session.decide(start).unwrap(), Phase::Watching);
        assert_eq!(session.advance(start + INTERVAL), Phase::Watching);
        assert_eq!(
            session.advance(start + INTERVAL * 2),
            Phase::Terminated(Completion::Completed)
        );

        assert_eq!(session.sink().calls, vec![Call::Show(body()), Call::Clear]);
        assert!(!session.ui_engaged());
        assert!(!session.timer().is_armed());

        // No further ticks once terminated; the scripted query would panic.
        session.advance(start + INTERVAL * 10);
        assert_eq!(session.query.calls, 3);
    }

    #[test]
    fn failed_ticks_are_retried() {
        let mut session = session(vec![
            ok("activating", "start"),
            transport_error(),
            transport_error(),
            ok("active", "exited"),
        ]);
        let start = Instant::now();
        session.decide(start).unwrap();

        assert_eq!(session.advance(start + INTERVAL), Phase::Watching);
        assert_eq!(session.advance(start + INTERVAL * 2), Phase::Watching);
        assert_eq!(session.failure_streak(), 2);
        assert!(session.last_error().is_some());
        assert_eq!(session.sink().calls, vec![Call::Show(body())]);

        assert_eq!(
            session.advance(start + INTERVAL * 3),
            Phase::Terminated(Completion::Completed)
        );
        assert_eq!(session.failure_streak(), 0);
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn trigger_reshows_notice_other_reasons_do_not() {
        let mut session = session(vec![ok("activating", "start")]);
        session.decide(Instant::now()).unwrap();

        session.activate(ActivationReason::Trigger);
        session.activate(ActivationReason::Context);
        session.activate(ActivationReason::DoubleClick);
        session.activate(ActivationReason::MiddleClick);
        session.activate(ActivationReason::Unknown);
        session.activate(ActivationReason::Trigger);

        assert_eq!(
            session.sink().calls,
            vec![Call::Show(body()), Call::Show(body()), Call::Show(body())]
        );
    }

    #[test]
    fn activation_outside_watching_is_ignored() {
        let mut session = session(vec![ok("active", "exited")]);
        session.activate(ActivationReason::Trigger);
        session.decide(Instant::now()).unwrap();
        session.activate(ActivationReason::Trigger);

        assert!(session.sink().calls.is_empty());
    }

    #[test]
    fn late_advance_collapses_missed_ticks() {
        let mut session = session(vec![ok("activating", "start"), ok("active", "running")]);
        let start = Instant::now();
        session.decide(start).unwrap();

        let late = start + INTERVAL * 5;
        session.advance(late);

        assert_eq!(session.query.calls, 2);
        assert_eq!(session.next_deadline(), Some(late + INTERVAL));
    }

    #[test]
    fn timer_disarm_reports_previous_state() {
        let mut timer = PollTimer::new(INTERVAL);
        let start = Instant::now();
        assert!(!timer.fire(start + INTERVAL));

        timer.arm(start);
        assert!(!timer.fire(start));
        assert!(timer.fire(start + INTERVAL));
        assert!(timer.disarm());
        assert!(!timer.disarm());
        assert!(!timer.fire(start + INTERVAL * 2));
    }
}
