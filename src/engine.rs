use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::{
    baseline::{
        is_weekend, BaselineConfig, BaselineLearner, DailySummary, Deviation, HourlyRollup,
        LearnerPhase, RolledUp,
    },
    battery::{self, BatteryGate, SharedBattery},
    collaborators::{
        BatterySource, Clock, LocalPromptDispatcher, RemoteAlertDispatcher, RosterProvider,
    },
    db::StateStore,
    escalation::{EscalationConfig, EscalationCoordinator, Resolution, Submission},
    fall::{
        controller::{FallDeps, FallSnapshot},
        FallConfig, FallController, FallDetector,
    },
    inactivity::{
        controller::InactivityDeps, InactivityConfig, InactivityController, InactivitySnapshot,
        MonitoringState, NegativeSpaceMachine,
    },
    ledger::{self, ActivityLedger, SharedLedger},
    models::{
        ActivityEvent, AlertKind, BatteryReading, BatterySnapshot, MotionSample, PromptCategory,
        PromptRequest, SignalKind,
    },
    settings::MonitoringSettings,
};

pub const LEDGER_KEY: &str = "ledger";
pub const BATTERY_KEY: &str = "battery";
pub const BASELINE_KEY: &str = "baseline";
pub const ROLLUP_KEY: &str = "rollup";

pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub inactivity: InactivityConfig,
    pub fall: FallConfig,
    pub escalation: EscalationConfig,
    pub baseline: BaselineConfig,
    /// Period of the background inactivity evaluation.
    pub evaluation_interval: Duration,
    /// Leave the learning phase as soon as the engine starts.
    pub start_monitoring: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inactivity: InactivityConfig::default(),
            fall: FallConfig::default(),
            escalation: EscalationConfig::default(),
            baseline: BaselineConfig::default(),
            evaluation_interval: DEFAULT_EVALUATION_INTERVAL,
            start_monitoring: true,
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &MonitoringSettings) -> Self {
        Self {
            inactivity: settings.inactivity_config(),
            fall: settings.fall_config(),
            escalation: settings.escalation_config(),
            baseline: settings.baseline_config(),
            ..Self::default()
        }
    }
}

/// The outside world as seen by the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub prompts: Arc<dyn LocalPromptDispatcher>,
    pub dispatcher: Arc<dyn RemoteAlertDispatcher>,
    pub roster: Arc<dyn RosterProvider>,
    pub battery_source: Option<Arc<dyn BatterySource>>,
}

/// State restored from a previous run. Missing parts start empty.
#[derive(Debug, Default)]
pub struct PersistedState {
    pub ledger: Option<ActivityLedger>,
    pub battery: Option<BatteryGate>,
    pub baseline: Option<BaselineLearner>,
    pub rollup: Option<HourlyRollup>,
}

impl PersistedState {
    pub async fn load<S: StateStore>(store: &S) -> Result<Self> {
        Ok(Self {
            ledger: store.load(LEDGER_KEY).await.context("failed to restore ledger")?,
            battery: store.load(BATTERY_KEY).await.context("failed to restore battery history")?,
            baseline: store.load(BASELINE_KEY).await.context("failed to restore baseline")?,
            rollup: store.load(ROLLUP_KEY).await.context("failed to restore hourly rollup")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub monitoring: InactivitySnapshot,
    pub fall: FallSnapshot,
    pub learner_phase: LearnerPhase,
    pub in_flight: Vec<AlertKind>,
    pub battery: Option<BatterySnapshot>,
    pub typical_wake_hour: Option<u8>,
}

/// Owns every detector and routes signals between them.
pub struct Engine {
    clock: Arc<dyn Clock>,
    prompts: Arc<dyn LocalPromptDispatcher>,
    battery_source: Option<Arc<dyn BatterySource>>,
    ledger: SharedLedger,
    battery: SharedBattery,
    baseline: Arc<RwLock<BaselineLearner>>,
    rollup: Mutex<HourlyRollup>,
    coordinator: EscalationCoordinator,
    fall: FallController,
    inactivity: InactivityController,
}

impl Engine {
    pub async fn start(
        config: EngineConfig,
        collaborators: Collaborators,
        restored: PersistedState,
    ) -> Result<Self> {
        let Collaborators {
            clock,
            prompts,
            dispatcher,
            roster,
            battery_source,
        } = collaborators;
        let now = clock.now();

        let baseline = match restored.baseline {
            Some(learner) => learner.with_config(config.baseline.clone()),
            None => {
                info!("no stored baseline, learning from {now}");
                BaselineLearner::new(now, config.baseline.clone())
            }
        };
        let ledger = ledger::shared(restored.ledger.unwrap_or_default());
        let battery = battery::shared(restored.battery.unwrap_or_default());
        let coordinator = EscalationCoordinator::new(config.escalation.clone(), dispatcher, roster);

        let fall = FallController::spawn(
            FallDetector::new(config.fall.clone()),
            FallDeps {
                clock: clock.clone(),
                prompts: prompts.clone(),
                coordinator: coordinator.clone(),
            },
        );
        let inactivity = InactivityController::spawn(
            NegativeSpaceMachine::new(config.inactivity.clone()),
            InactivityDeps {
                clock: clock.clone(),
                ledger: ledger.clone(),
                battery: battery.clone(),
                prompts: prompts.clone(),
                coordinator: coordinator.clone(),
            },
            config.evaluation_interval,
        );

        let engine = Self {
            clock,
            prompts,
            battery_source,
            ledger,
            battery,
            baseline: Arc::new(RwLock::new(baseline)),
            rollup: Mutex::new(restored.rollup.unwrap_or_default()),
            coordinator,
            fall,
            inactivity,
        };

        engine.poll_battery().await;
        if config.start_monitoring {
            engine.inactivity.start().await?;
        }

        info!(
            "engine started: threshold {} min, fall detection {}",
            config.inactivity.threshold.num_minutes(),
            if config.fall.enabled { "on" } else { "off" }
        );
        Ok(engine)
    }

    /// Appends to the ledger, rolls up any finished hours and tells the
    /// inactivity machine that the user is alive.
    pub async fn record_activity(&self, event: ActivityEvent) -> Result<()> {
        let local = self.clock.local(event.timestamp);
        let quantity = f64::from(event.quantity());

        self.ledger.write().await.record(event);
        let rolled = self.rollup.lock().await.add(local, quantity);
        self.apply_rollup(rolled).await;

        self.inactivity.notify_activity().await
    }

    pub async fn record_signal(&self, kind: SignalKind, quantity: Option<u32>) -> Result<()> {
        let now = self.clock.now();
        let event = match quantity {
            Some(quantity) => ActivityEvent::with_quantity(now, kind, quantity),
            None => ActivityEvent::new(now, kind),
        };
        self.record_activity(event).await
    }

    /// Explicit "I'm OK". Stops a fall countdown, withdraws a pending pattern
    /// alert and counts as activity.
    pub async fn check_in(&self) -> Result<()> {
        self.fall.cancel().await?;
        self.coordinator.cancel(AlertKind::PatternDeviation);
        self.record_signal(SignalKind::UserCheckIn, None).await
    }

    pub async fn push_motion(&self, sample: MotionSample) -> Result<()> {
        self.fall.push_sample(sample).await
    }

    /// Returns whether the reading was stored as a new snapshot.
    pub async fn record_battery(&self, reading: BatteryReading) -> bool {
        let now = self.clock.now();
        self.battery.write().await.record_snapshot(reading, now)
    }

    pub async fn poll_battery(&self) {
        let Some(source) = &self.battery_source else {
            return;
        };
        match source.current().await {
            Some(reading) => {
                self.record_battery(reading).await;
            }
            None => warn!("battery source returned no reading"),
        }
    }

    /// Feeds one closed hour. The hour is compared against the baseline before
    /// it becomes part of it.
    pub async fn observe_hour(
        &self,
        hour: u8,
        is_weekend: bool,
        activity: f64,
        events: f64,
    ) -> Option<Deviation> {
        let now = self.clock.now();
        let deviation = {
            let learner = self.baseline.read().await;
            match learner.phase(now) {
                LearnerPhase::Mature => learner.deviation(hour, is_weekend, activity, events),
                LearnerPhase::Learning => None,
            }
        };
        self.baseline
            .write()
            .await
            .observe_hour(hour, is_weekend, activity, events);

        if let Some(deviation) = &deviation {
            self.escalate_deviation(deviation).await;
        }
        deviation
    }

    pub async fn record_daily_summary(&self, summary: DailySummary) {
        self.baseline.write().await.record_daily_summary(summary);
    }

    /// Closes hours that ended without any activity. Returns whether anything closed.
    pub async fn tick_rollup(&self) -> bool {
        let local = self.clock.local(self.clock.now());
        let rolled = self.rollup.lock().await.advance(local);
        let closed = !rolled.is_empty();
        self.apply_rollup(rolled).await;
        closed
    }

    pub async fn evaluate_now(&self) -> Result<()> {
        self.inactivity.evaluate_now().await
    }

    pub async fn trigger_manual_fall_test(&self) -> Result<()> {
        self.fall.trigger_manual_test().await
    }

    pub async fn set_fall_detection_enabled(&self, enabled: bool) -> Result<()> {
        self.fall.set_enabled(enabled).await
    }

    pub async fn start_monitoring(&self) -> Result<()> {
        self.inactivity.start().await
    }

    pub async fn pause_monitoring(&self) -> Result<()> {
        self.inactivity.pause().await
    }

    pub async fn resume_monitoring(&self) -> Result<()> {
        self.inactivity.resume().await
    }

    /// Hot-reloads everything that can change without a restart. Grace
    /// periods are fixed for the lifetime of the engine.
    pub async fn apply_settings(&self, settings: &MonitoringSettings) -> Result<()> {
        self.inactivity
            .update_config(settings.inactivity_config())
            .await?;
        self.fall
            .set_enabled(settings.fall_detection_enabled)
            .await?;
        self.baseline
            .write()
            .await
            .set_relaxed_night(settings.relaxed_night);
        self.coordinator.set_location(settings.location.clone());
        Ok(())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn monitoring_state(&self) -> MonitoringState {
        self.inactivity.state()
    }

    pub fn coordinator(&self) -> &EscalationCoordinator {
        &self.coordinator
    }

    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    pub async fn time_since_last_activity(&self) -> Option<ChronoDuration> {
        self.ledger.read().await.time_since_last(self.clock.now())
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let now = self.clock.now();
        let monitoring = self.inactivity.snapshot().await?;
        let fall = self.fall.snapshot().await?;
        let (learner_phase, typical_wake_hour) = {
            let learner = self.baseline.read().await;
            let today = self.clock.local(now).date();
            (
                learner.phase(now),
                learner.typical_wake_hour(is_weekend(today)),
            )
        };

        Ok(EngineStatus {
            monitoring,
            fall,
            learner_phase,
            in_flight: self.coordinator.in_flight(),
            battery: self.battery.read().await.latest().copied(),
            typical_wake_hour,
        })
    }

    pub async fn persist<S: StateStore>(&self, store: &S) -> Result<()> {
        let ledger = self.ledger.read().await.clone();
        store.save(LEDGER_KEY, &ledger).await?;
        let battery = self.battery.read().await.clone();
        store.save(BATTERY_KEY, &battery).await?;
        let baseline = self.baseline.read().await.clone();
        store.save(BASELINE_KEY, &baseline).await?;
        let rollup = self.rollup.lock().await.clone();
        store.save(ROLLUP_KEY, &rollup).await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.fall.shutdown().await;
        self.inactivity.shutdown().await;
        info!("engine stopped");
    }

    async fn apply_rollup(&self, rolled: RolledUp) {
        let RolledUp { hours, days } = rolled;
        let Some((latest, backfill)) = hours.split_last() else {
            for summary in days {
                self.record_daily_summary(summary).await;
            }
            return;
        };

        {
            let mut learner = self.baseline.write().await;
            for closed in backfill {
                learner.observe_hour(closed.hour, closed.is_weekend, closed.activity, closed.events);
            }
        }
        self.observe_hour(latest.hour, latest.is_weekend, latest.activity, latest.events)
            .await;
        for summary in days {
            self.record_daily_summary(summary).await;
        }
    }

    async fn escalate_deviation(&self, deviation: &Deviation) {
        // Goes through the mailbox so a just-queued start or pause is seen.
        let state = match self.inactivity.snapshot().await {
            Ok(snapshot) => snapshot.state,
            Err(_) => self.inactivity.state(),
        };
        match state {
            MonitoringState::Learning | MonitoringState::Paused => {
                info!(
                    "hour {} below routine while monitoring is off, not escalating",
                    deviation.hour
                );
                return;
            }
            _ => {}
        }

        warn!(
            "hour {} activity {:.0} / events {:.0} well below usual {:.0} / {:.0}",
            deviation.hour,
            deviation.current_activity,
            deviation.current_events,
            deviation.expected.activity,
            deviation.expected.events
        );

        match self.coordinator.submit(AlertKind::PatternDeviation) {
            Submission::Scheduled {
                incident_id,
                resolution,
            } => {
                self.prompts
                    .prompt(PromptRequest::new(
                        "Everything alright?",
                        "Today looks quieter than usual. Tap to let us know you're OK.",
                        PromptCategory::UrgentCheckIn,
                    ))
                    .await;

                let prompts = self.prompts.clone();
                tokio::spawn(async move {
                    match resolution.await {
                        Ok(Resolution::Dispatched(receipt)) => {
                            info!(
                                "pattern alert {incident_id} sent to {}/{} contacts",
                                receipt.sent_count, receipt.total_count
                            );
                            prompts
                                .prompt(PromptRequest::new(
                                    "Contacts alerted",
                                    "Your day looked unusual, so we let your contacts know.",
                                    PromptCategory::AlertSent,
                                ))
                                .await;
                        }
                        Ok(Resolution::Cancelled) => {
                            info!("pattern alert {incident_id} withdrawn")
                        }
                        Err(_) => warn!("pattern alert {incident_id} lost its resolution"),
                    }
                });
            }
            Submission::Coalesced { incident_id } => {
                info!("pattern deviation joins outstanding escalation {incident_id}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::time;

    use super::*;
    use crate::{
        collaborators::ManualClock,
        db::SqliteStateStore,
        models::{AlertRequest, ChargeState, Contact, DispatchReceipt},
    };

    #[derive(Default)]
    struct Recorder {
        prompts: StdMutex<Vec<PromptRequest>>,
        alerts: StdMutex<Vec<AlertRequest>>,
    }

    impl Recorder {
        fn prompt_categories(&self) -> Vec<PromptCategory> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .map(|prompt| prompt.category)
                .collect()
        }

        fn alert_kinds(&self) -> Vec<AlertKind> {
            self.alerts
                .lock()
                .unwrap()
                .iter()
                .map(|alert| alert.kind)
                .collect()
        }
    }

    #[async_trait]
    impl LocalPromptDispatcher for Recorder {
        async fn prompt(&self, request: PromptRequest) {
            self.prompts.lock().unwrap().push(request);
        }
    }

    #[async_trait]
    impl RemoteAlertDispatcher for Recorder {
        async fn dispatch(&self, request: &AlertRequest) -> DispatchReceipt {
            self.alerts.lock().unwrap().push(request.clone());
            DispatchReceipt {
                success: true,
                sent_count: request.contacts.len(),
                total_count: request.contacts.len(),
                error: None,
            }
        }
    }

    impl RosterProvider for Recorder {
        fn display_name(&self) -> String {
            "Ada".into()
        }

        fn contacts(&self) -> Vec<Contact> {
            vec![Contact {
                name: "Grace".into(),
                phone: "+15550001".into(),
            }]
        }
    }

    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn quiet_config() -> EngineConfig {
        EngineConfig {
            evaluation_interval: Duration::from_secs(24 * 3_600),
            ..EngineConfig::default()
        }
    }

    async fn start_engine(
        clock: &ManualClock,
        recorder: &Arc<Recorder>,
        restored: PersistedState,
    ) -> Engine {
        Engine::start(
            quiet_config(),
            Collaborators {
                clock: Arc::new(clock.clone()),
                prompts: recorder.clone(),
                dispatcher: recorder.clone(),
                roster: recorder.clone(),
                battery_source: None,
            },
            restored,
        )
        .await
        .unwrap()
    }

    async fn settle(engine: &Engine) -> EngineStatus {
        engine.status().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn silence_nudges_then_alerts_and_check_in_recalls() {
        let t0 = monday_morning();
        let clock = ManualClock::new(t0);
        let recorder = Arc::new(Recorder::default());
        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;

        engine.record_signal(SignalKind::Steps, Some(50)).await.unwrap();

        clock.set(t0 + ChronoDuration::hours(3));
        engine.evaluate_now().await.unwrap();
        let status = settle(&engine).await;
        assert_eq!(status.monitoring.state, MonitoringState::Active);
        assert!(status.monitoring.nudge_sent);
        assert_eq!(recorder.prompt_categories(), vec![PromptCategory::CheckIn]);

        clock.set(t0 + ChronoDuration::minutes(210));
        engine.evaluate_now().await.unwrap();
        settle(&engine).await;
        assert_eq!(recorder.prompt_categories(), vec![PromptCategory::CheckIn]);

        clock.set(t0 + ChronoDuration::hours(4));
        engine.evaluate_now().await.unwrap();
        let status = settle(&engine).await;
        assert_eq!(status.monitoring.state, MonitoringState::AlertPending);
        assert_eq!(status.in_flight, vec![AlertKind::Inactivity]);
        assert_eq!(
            recorder.prompt_categories(),
            vec![PromptCategory::CheckIn, PromptCategory::UrgentCheckIn]
        );

        clock.set(t0 + ChronoDuration::minutes(241));
        engine.check_in().await.unwrap();
        let status = settle(&engine).await;
        assert_eq!(status.monitoring.state, MonitoringState::Active);
        assert!(!status.monitoring.nudge_sent);
        assert!(status.in_flight.is_empty());

        time::sleep(Duration::from_secs(600)).await;
        settle(&engine).await;
        assert!(recorder.alert_kinds().is_empty());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_alert_reaches_contacts() {
        let t0 = monday_morning();
        let clock = ManualClock::new(t0);
        let recorder = Arc::new(Recorder::default());
        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;

        engine.record_signal(SignalKind::Pickup, None).await.unwrap();
        clock.set(t0 + ChronoDuration::hours(5));
        engine.evaluate_now().await.unwrap();
        settle(&engine).await;

        time::sleep(Duration::from_secs(301)).await;
        let status = settle(&engine).await;
        assert_eq!(recorder.alert_kinds(), vec![AlertKind::Inactivity]);
        assert_eq!(status.monitoring.state, MonitoringState::AlertSent);
        assert!(recorder
            .prompt_categories()
            .contains(&PromptCategory::AlertSent));

        engine.check_in().await.unwrap();
        let status = settle(&engine).await;
        assert_eq!(status.monitoring.state, MonitoringState::Active);
        assert_eq!(recorder.alert_kinds().len(), 1);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_check_ins_are_harmless() {
        let clock = ManualClock::new(monday_morning());
        let recorder = Arc::new(Recorder::default());
        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;

        engine.check_in().await.unwrap();
        engine.check_in().await.unwrap();
        let status = settle(&engine).await;

        assert_eq!(status.monitoring.state, MonitoringState::Active);
        assert!(status.in_flight.is_empty());
        assert_eq!(engine.ledger().read().await.len(), 2);
        assert!(recorder.alert_kinds().is_empty());
        assert_eq!(
            engine.time_since_last_activity().await,
            Some(ChronoDuration::zero())
        );

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_monitoring_never_escalates() {
        let t0 = monday_morning();
        let clock = ManualClock::new(t0);
        let recorder = Arc::new(Recorder::default());
        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;

        engine.record_signal(SignalKind::Steps, Some(10)).await.unwrap();
        engine.pause_monitoring().await.unwrap();
        clock.set(t0 + ChronoDuration::hours(12));
        engine.evaluate_now().await.unwrap();
        let status = settle(&engine).await;

        assert_eq!(status.monitoring.state, MonitoringState::Paused);
        assert!(recorder.prompt_categories().is_empty());

        engine.resume_monitoring().await.unwrap();
        assert_eq!(settle(&engine).await.monitoring.state, MonitoringState::Active);

        engine.shutdown().await;
    }

    fn mature_baseline(now: DateTime<Utc>) -> BaselineLearner {
        let installed_at = now - ChronoDuration::days(30);
        let mut learner = BaselineLearner::new(installed_at, BaselineConfig::default());
        for _ in 0..10 {
            learner.observe_hour(10, false, 500.0, 12.0);
        }
        learner
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_hour_raises_pattern_alert_until_check_in() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 11, 5, 0).unwrap();
        let clock = ManualClock::new(now);
        let recorder = Arc::new(Recorder::default());
        let restored = PersistedState {
            baseline: Some(mature_baseline(now)),
            ..PersistedState::default()
        };
        let engine = start_engine(&clock, &recorder, restored).await;

        let deviation = engine.observe_hour(10, false, 20.0, 1.0).await;
        assert!(deviation.is_some());
        assert!(engine.coordinator().is_in_flight(AlertKind::PatternDeviation));
        assert_eq!(recorder.prompt_categories(), vec![PromptCategory::UrgentCheckIn]);

        engine.check_in().await.unwrap();
        assert!(!engine.coordinator().is_in_flight(AlertKind::PatternDeviation));

        time::sleep(Duration::from_secs(600)).await;
        assert!(recorder.alert_kinds().is_empty());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pattern_alert_outlives_later_activity() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 4, 10, 5, 0).unwrap();
        let clock = ManualClock::new(t0);
        let recorder = Arc::new(Recorder::default());
        let restored = PersistedState {
            baseline: Some(mature_baseline(t0)),
            ..PersistedState::default()
        };
        let engine = start_engine(&clock, &recorder, restored).await;

        engine.record_signal(SignalKind::Pickup, None).await.unwrap();
        assert!(!engine.coordinator().is_in_flight(AlertKind::PatternDeviation));

        // The first event of 11:00 closes a near-empty 10:00 hour.
        clock.set(t0 + ChronoDuration::minutes(57));
        engine.record_signal(SignalKind::Steps, Some(10)).await.unwrap();
        assert!(engine.coordinator().is_in_flight(AlertKind::PatternDeviation));

        clock.set(t0 + ChronoDuration::minutes(58));
        engine.record_signal(SignalKind::Pickup, None).await.unwrap();
        assert!(engine.coordinator().is_in_flight(AlertKind::PatternDeviation));

        time::sleep(Duration::from_secs(301)).await;
        for _ in 0..10 {
            if !recorder.alert_kinds().is_empty() {
                break;
            }
            time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(recorder.alert_kinds(), vec![AlertKind::PatternDeviation]);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn learning_baseline_does_not_judge_hours() {
        let now = monday_morning();
        let clock = ManualClock::new(now);
        let recorder = Arc::new(Recorder::default());
        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;

        assert!(engine.observe_hour(10, false, 0.0, 0.0).await.is_none());
        assert_eq!(settle(&engine).await.learner_phase, LearnerPhase::Learning);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_rollup_closes_silent_hours() {
        let t0 = monday_morning();
        let clock = ManualClock::new(t0);
        let recorder = Arc::new(Recorder::default());
        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;

        engine.record_signal(SignalKind::Steps, Some(400)).await.unwrap();
        assert!(!engine.tick_rollup().await);

        clock.set(t0 + ChronoDuration::minutes(150));
        assert!(engine.tick_rollup().await);
        let learner = engine.baseline.read().await;
        assert_eq!(learner.sample_count(10, false), 1);
        assert_eq!(learner.sample_count(11, false), 1);
        assert_eq!(learner.sample_count(12, false), 0);
        drop(learner);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn battery_readings_are_deduplicated() {
        let clock = ManualClock::new(monday_morning());
        let recorder = Arc::new(Recorder::default());
        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;

        let reading = BatteryReading {
            level: Some(80),
            state: ChargeState::Unplugged,
            power_save: false,
        };
        assert!(engine.record_battery(reading).await);
        assert!(!engine.record_battery(reading).await);

        let status = settle(&engine).await;
        assert_eq!(status.battery.and_then(|snapshot| snapshot.level), Some(80));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        let clock = ManualClock::new(monday_morning());
        let recorder = Arc::new(Recorder::default());

        let engine = start_engine(&clock, &recorder, PersistedState::default()).await;
        engine.record_signal(SignalKind::AppOpen, None).await.unwrap();
        let installed_at = engine.baseline.read().await.installed_at();
        engine.persist(&store).await.unwrap();
        engine.shutdown().await;

        clock.advance(ChronoDuration::hours(1));
        let restored = PersistedState::load(&store).await.unwrap();
        let engine = start_engine(&clock, &recorder, restored).await;

        assert_eq!(
            engine.ledger().read().await.last_activity_at(),
            Some(monday_morning())
        );
        assert_eq!(engine.baseline.read().await.installed_at(), installed_at);

        engine.shutdown().await;
    }
}
