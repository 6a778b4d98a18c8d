use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    battery::SharedBattery,
    collaborators::{Clock, LocalPromptDispatcher},
    escalation::{CancelOutcome, EscalationCoordinator, Resolution, Submission},
    ledger::SharedLedger,
    models::{ActivityEvent, AlertKind, PromptCategory, PromptRequest},
};

use super::{InactivityAction, InactivityConfig, MonitoringState, NegativeSpaceMachine};

const MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InactivitySnapshot {
    pub state: MonitoringState,
    pub nudge_sent: bool,
    pub threshold_minutes: i64,
    pub last_activity: Option<DateTime<Utc>>,
    pub silence_minutes: Option<i64>,
}

enum InactivityCommand {
    Evaluate,
    ActivityRecorded,
    Start,
    Pause,
    Resume,
    UpdateConfig(InactivityConfig),
    AlertResolved(Resolution),
    Snapshot(oneshot::Sender<InactivitySnapshot>),
}

/// Everything the inactivity task reads besides its own machine.
#[derive(Clone)]
pub struct InactivityDeps {
    pub clock: Arc<dyn Clock>,
    pub ledger: SharedLedger,
    pub battery: SharedBattery,
    pub prompts: Arc<dyn LocalPromptDispatcher>,
    pub coordinator: EscalationCoordinator,
}

/// Handle to the task that owns the negative-space machine. All inputs are
/// queued into that task, so transitions are evaluated one at a time.
pub struct InactivityController {
    commands: mpsc::Sender<InactivityCommand>,
    state: watch::Receiver<MonitoringState>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InactivityController {
    pub fn spawn(
        machine: NegativeSpaceMachine,
        deps: InactivityDeps,
        evaluation_interval: Duration,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (state_tx, state_rx) = watch::channel(machine.state());
        let cancel_token = CancellationToken::new();

        let worker = InactivityWorker {
            machine,
            deps,
            mailbox: command_tx.clone(),
            state_tx,
        };
        let handle = tokio::spawn(inactivity_loop(
            worker,
            command_rx,
            evaluation_interval,
            cancel_token.clone(),
        ));

        Self {
            commands: command_tx,
            state: state_rx,
            cancel_token,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn state(&self) -> MonitoringState {
        *self.state.borrow()
    }

    pub async fn evaluate_now(&self) -> Result<()> {
        self.send(InactivityCommand::Evaluate).await
    }

    /// Must be called after the event is already in the ledger.
    pub async fn notify_activity(&self) -> Result<()> {
        self.send(InactivityCommand::ActivityRecorded).await
    }

    pub async fn start(&self) -> Result<()> {
        self.send(InactivityCommand::Start).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(InactivityCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(InactivityCommand::Resume).await
    }

    pub async fn update_config(&self, config: InactivityConfig) -> Result<()> {
        self.send(InactivityCommand::UpdateConfig(config)).await
    }

    pub async fn snapshot(&self) -> Result<InactivitySnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(InactivityCommand::Snapshot(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| anyhow!("inactivity task dropped snapshot request"))
    }

    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle.await {
                error!("inactivity task failed to join: {err}");
            }
        }
    }

    async fn send(&self, command: InactivityCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("inactivity task is not running"))
    }
}

struct InactivityWorker {
    machine: NegativeSpaceMachine,
    deps: InactivityDeps,
    mailbox: mpsc::Sender<InactivityCommand>,
    state_tx: watch::Sender<MonitoringState>,
}

async fn inactivity_loop(
    mut worker: InactivityWorker,
    mut commands: mpsc::Receiver<InactivityCommand>,
    evaluation_interval: Duration,
    cancel_token: CancellationToken,
) {
    // Skipped ticks are harmless: every evaluation recomputes from the ledger.
    let mut ticker = time::interval_at(Instant::now() + evaluation_interval, evaluation_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => worker.evaluate().await,
            command = commands.recv() => match command {
                Some(command) => worker.handle(command).await,
                None => break,
            },
            _ = cancel_token.cancelled() => {
                info!("inactivity loop shutting down");
                break;
            }
        }
        worker.publish();
    }
}

impl InactivityWorker {
    async fn handle(&mut self, command: InactivityCommand) {
        match command {
            InactivityCommand::Evaluate => self.evaluate().await,
            InactivityCommand::ActivityRecorded => {
                if let Some(InactivityAction::AlertCancelled) = self.machine.activity_recorded() {
                    match self.deps.coordinator.cancel(AlertKind::Inactivity) {
                        CancelOutcome::Recalled => info!("inactivity alert recalled before hand-off"),
                        CancelOutcome::AlreadyHandedOff => {
                            warn!("inactivity alert already handed off; contacts were notified")
                        }
                        CancelOutcome::NothingPending => {}
                    }
                }
            }
            InactivityCommand::Start => {
                if self.machine.start() {
                    info!("inactivity monitoring started");
                }
            }
            InactivityCommand::Pause => {
                if !self.machine.pause() {
                    warn!("pause ignored in state {:?}", self.machine.state());
                }
            }
            InactivityCommand::Resume => {
                if !self.machine.resume() {
                    warn!("resume ignored in state {:?}", self.machine.state());
                }
            }
            InactivityCommand::UpdateConfig(config) => {
                info!(
                    "inactivity threshold now {} min",
                    config.threshold.num_minutes()
                );
                self.machine.update_config(config);
            }
            InactivityCommand::AlertResolved(resolution) => self.alert_resolved(resolution).await,
            InactivityCommand::Snapshot(reply) => {
                let snapshot = self.snapshot().await;
                let _ = reply.send(snapshot);
            }
        }
    }

    async fn evaluate(&mut self) {
        let now = self.deps.clock.now();
        let local_time = self.deps.clock.local_time(now);
        let last_activity = self.last_activity_or_bootstrap(now).await;

        let action = {
            let battery = self.deps.battery.read().await;
            self.machine
                .evaluate(now, local_time, last_activity, &battery)
        };

        match action {
            Some(InactivityAction::RequestCheckIn { elapsed }) => {
                self.deps
                    .prompts
                    .prompt(PromptRequest::new(
                        "Checking in",
                        format!(
                            "We haven't noticed any activity for {} hours. Tap to let us know you're OK.",
                            elapsed.num_hours()
                        ),
                        PromptCategory::CheckIn,
                    ))
                    .await;
            }
            Some(InactivityAction::RaiseAlert { elapsed, .. }) => {
                self.deps
                    .prompts
                    .prompt(PromptRequest::new(
                        "Are you OK?",
                        format!(
                            "No activity for {} hours. Your contacts will be alerted unless you respond.",
                            elapsed.num_hours()
                        ),
                        PromptCategory::UrgentCheckIn,
                    ))
                    .await;
                self.escalate();
            }
            Some(InactivityAction::Suppressed { .. })
            | Some(InactivityAction::AlertCancelled)
            | None => {}
        }
    }

    fn escalate(&self) {
        match self.deps.coordinator.submit(AlertKind::Inactivity) {
            Submission::Scheduled { resolution, .. } => {
                let mailbox = self.mailbox.clone();
                tokio::spawn(async move {
                    if let Ok(resolution) = resolution.await {
                        let _ = mailbox
                            .send(InactivityCommand::AlertResolved(resolution))
                            .await;
                    }
                });
            }
            Submission::Coalesced { incident_id } => {
                info!("inactivity alert joins outstanding escalation {incident_id}");
            }
        }
    }

    async fn alert_resolved(&mut self, resolution: Resolution) {
        let Resolution::Dispatched(receipt) = resolution else {
            return;
        };
        if !self.machine.alert_dispatched() {
            return;
        }

        let body = if receipt.success {
            format!(
                "We've let {} of your contacts know.",
                receipt.sent_count
            )
        } else {
            "We tried to reach your contacts but the message may not have gone through.".to_string()
        };
        self.deps
            .prompts
            .prompt(PromptRequest::new("Contacts alerted", body, PromptCategory::AlertSent))
            .await;
    }

    /// First run: an empty ledger gets a synthetic event so silence is measured from now.
    async fn last_activity_or_bootstrap(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(last) = self.deps.ledger.read().await.last_activity_at() {
            return Some(last);
        }
        if matches!(
            self.machine.state(),
            MonitoringState::Learning | MonitoringState::Paused
        ) {
            return None;
        }

        let mut ledger = self.deps.ledger.write().await;
        if ledger.is_empty() {
            info!("activity ledger empty, recording bootstrap event");
            ledger.record(ActivityEvent::bootstrap(now));
        }
        ledger.last_activity_at()
    }

    async fn snapshot(&self) -> InactivitySnapshot {
        let now = self.deps.clock.now();
        let ledger = self.deps.ledger.read().await;
        InactivitySnapshot {
            state: self.machine.state(),
            nudge_sent: self.machine.nudge_sent(),
            threshold_minutes: self.machine.config().threshold.num_minutes(),
            last_activity: ledger.last_activity_at(),
            silence_minutes: ledger.time_since_last(now).map(|d| d.num_minutes()),
        }
    }

    fn publish(&self) {
        self.state_tx.send_if_modified(|current| {
            let next = self.machine.state();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    use super::*;
    use crate::{
        battery::{self, BatteryGate},
        collaborators::{ManualClock, RemoteAlertDispatcher, RosterProvider},
        escalation::EscalationConfig,
        ledger::{self, ActivityLedger},
        models::{AlertRequest, Contact, DispatchReceipt, SignalKind},
    };

    #[derive(Default)]
    struct RecordingPrompts {
        prompts: StdMutex<Vec<PromptRequest>>,
    }

    impl RecordingPrompts {
        fn categories(&self) -> Vec<PromptCategory> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .map(|prompt| prompt.category)
                .collect()
        }
    }

    #[async_trait]
    impl LocalPromptDispatcher for RecordingPrompts {
        async fn prompt(&self, request: PromptRequest) {
            self.prompts.lock().unwrap().push(request);
        }
    }

    #[derive(Default)]
    struct FailingDispatcher {
        attempts: StdMutex<usize>,
    }

    #[async_trait]
    impl RemoteAlertDispatcher for FailingDispatcher {
        async fn dispatch(&self, request: &AlertRequest) -> DispatchReceipt {
            *self.attempts.lock().unwrap() += 1;
            DispatchReceipt::failed(request.contacts.len(), "gateway down")
        }
    }

    struct Roster;

    impl RosterProvider for Roster {
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

    struct Fixture {
        clock: ManualClock,
        ledger: SharedLedger,
        prompts: Arc<RecordingPrompts>,
        dispatcher: Arc<FailingDispatcher>,
        controller: InactivityController,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()
    }

    fn fixture(history: ActivityLedger) -> Fixture {
        let clock = ManualClock::new(t0());
        let ledger = ledger::shared(history);
        let prompts = Arc::new(RecordingPrompts::default());
        let dispatcher = Arc::new(FailingDispatcher::default());
        let coordinator = EscalationCoordinator::new(
            EscalationConfig::default(),
            dispatcher.clone(),
            Arc::new(Roster),
        );
        let deps = InactivityDeps {
            clock: Arc::new(clock.clone()),
            ledger: ledger.clone(),
            battery: battery::shared(BatteryGate::new()),
            prompts: prompts.clone(),
            coordinator,
        };
        let controller = InactivityController::spawn(
            NegativeSpaceMachine::new(InactivityConfig::default()),
            deps,
            Duration::from_secs(3_600),
        );
        Fixture {
            clock,
            ledger,
            prompts,
            dispatcher,
            controller,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_ledger_gets_bootstrap_event() {
        let fixture = fixture(ActivityLedger::default());
        fixture.controller.start().await.unwrap();
        fixture.controller.evaluate_now().await.unwrap();

        let snapshot = fixture.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state, MonitoringState::Active);
        assert_eq!(snapshot.last_activity, Some(t0()));
        {
            let ledger = fixture.ledger.read().await;
            assert_eq!(ledger.len(), 1);
            let event = ledger.last().unwrap();
            assert_eq!(event.kind, SignalKind::Movement);
            let source = event.metadata.as_ref().and_then(|meta| meta.source.as_deref());
            assert_eq!(source, Some("bootstrap"));
        }

        // Silence is measured from the bootstrap event, not from "never".
        fixture.clock.advance(ChronoDuration::hours(2));
        fixture.controller.evaluate_now().await.unwrap();
        let snapshot = fixture.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state, MonitoringState::Active);
        assert_eq!(snapshot.silence_minutes, Some(120));
        assert_eq!(fixture.ledger.read().await.len(), 1);
        assert!(fixture.prompts.categories().is_empty());

        fixture.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn learning_machine_does_not_bootstrap() {
        let fixture = fixture(ActivityLedger::default());
        fixture.controller.evaluate_now().await.unwrap();

        let snapshot = fixture.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state, MonitoringState::Learning);
        assert!(fixture.ledger.read().await.is_empty());

        fixture.controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_still_marks_alert_sent() {
        let mut history = ActivityLedger::default();
        history.record(ActivityEvent::new(t0(), SignalKind::Pickup));
        let fixture = fixture(history);
        fixture.clock.advance(ChronoDuration::hours(5));

        fixture.controller.start().await.unwrap();
        fixture.controller.evaluate_now().await.unwrap();
        let snapshot = fixture.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state, MonitoringState::AlertPending);

        tokio::time::sleep(Duration::from_secs(301)).await;
        let mut state = fixture.controller.snapshot().await.unwrap().state;
        for _ in 0..10 {
            if state == MonitoringState::AlertSent {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            state = fixture.controller.snapshot().await.unwrap().state;
        }

        assert_eq!(state, MonitoringState::AlertSent);
        assert_eq!(*fixture.dispatcher.attempts.lock().unwrap(), 1);
        assert_eq!(
            fixture.prompts.categories(),
            vec![PromptCategory::UrgentCheckIn, PromptCategory::AlertSent]
        );
        let last = fixture.prompts.prompts.lock().unwrap().last().cloned().unwrap();
        assert!(last.body.contains("may not have gone through"));

        // A retry is never attempted on its own.
        fixture.controller.evaluate_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(*fixture.dispatcher.attempts.lock().unwrap(), 1);

        fixture.controller.shutdown().await;
    }
}
