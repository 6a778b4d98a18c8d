use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::error;
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    collaborators::{Clock, LocalPromptDispatcher},
    escalation::{CancelOutcome, EscalationCoordinator, Resolution, Submission},
    models::{AlertKind, FallEvent, MotionSample, PromptCategory, PromptRequest},
};

use super::{state::to_chrono, CancelEffect, FallDetector, FallSignal, FallState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Room for a few seconds of 50 Hz samples while a prompt is being delivered.
const MAILBOX_CAPACITY: usize = 512;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallSnapshot {
    pub state: FallState,
    pub pending_event: Option<FallEvent>,
}

enum FallCommand {
    Sample(MotionSample),
    Cancel,
    ManualTest,
    SetEnabled(bool),
    CountdownElapsed(u64),
    CooldownElapsed(DateTime<Utc>),
    AlertResolved { incident: u64, resolution: Resolution },
    Snapshot(oneshot::Sender<FallSnapshot>),
}

#[derive(Clone)]
pub struct FallDeps {
    pub clock: Arc<dyn Clock>,
    pub prompts: Arc<dyn LocalPromptDispatcher>,
    pub coordinator: EscalationCoordinator,
}

/// Handle to the task that owns the fall detector. Samples, cancellations and
/// timer expiries all go through one queue and are applied strictly in order.
pub struct FallController {
    commands: mpsc::Sender<FallCommand>,
    state: watch::Receiver<FallState>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FallController {
    pub fn spawn(detector: FallDetector, deps: FallDeps) -> Self {
        let (command_tx, command_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (state_tx, state_rx) = watch::channel(detector.state());
        let cancel_token = CancellationToken::new();

        let worker = FallWorker {
            detector,
            deps,
            mailbox: command_tx.clone(),
            state_tx,
            countdown: None,
        };
        let handle = tokio::spawn(fall_loop(worker, command_rx, cancel_token.clone()));

        Self {
            commands: command_tx,
            state: state_rx,
            cancel_token,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn state(&self) -> FallState {
        *self.state.borrow()
    }

    pub async fn push_sample(&self, sample: MotionSample) -> Result<()> {
        self.send(FallCommand::Sample(sample)).await
    }

    /// The user's "I'm OK".
    pub async fn cancel(&self) -> Result<()> {
        self.send(FallCommand::Cancel).await
    }

    pub async fn trigger_manual_test(&self) -> Result<()> {
        self.send(FallCommand::ManualTest).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.send(FallCommand::SetEnabled(enabled)).await
    }

    pub async fn snapshot(&self) -> Result<FallSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(FallCommand::Snapshot(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| anyhow!("fall task dropped snapshot request"))
    }

    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle.await {
                error!("fall task failed to join: {err}");
            }
        }
    }

    async fn send(&self, command: FallCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("fall task is not running"))
    }
}

struct FallWorker {
    detector: FallDetector,
    deps: FallDeps,
    mailbox: mpsc::Sender<FallCommand>,
    state_tx: watch::Sender<FallState>,
    countdown: Option<CancellationToken>,
}

async fn fall_loop(
    mut worker: FallWorker,
    mut commands: mpsc::Receiver<FallCommand>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => worker.handle(command).await,
                None => break,
            },
            _ = cancel_token.cancelled() => {
                log_info!("fall loop shutting down");
                break;
            }
        }
        worker.publish();
    }

    worker.stop_countdown();
}

impl FallWorker {
    async fn handle(&mut self, command: FallCommand) {
        match command {
            FallCommand::Sample(sample) => {
                if let Some(signal) = self.detector.process(sample) {
                    self.on_signal(signal).await;
                }
            }
            FallCommand::ManualTest => {
                let now = self.deps.clock.now();
                match self.detector.trigger_manual_test(now) {
                    Some(signal) => self.on_signal(signal).await,
                    None => log_warn!("manual fall test ignored while an incident is open"),
                }
            }
            FallCommand::Cancel => self.cancel(),
            FallCommand::SetEnabled(enabled) => {
                self.detector.set_enabled(enabled);
                log_info!("fall detection enabled={enabled}");
            }
            FallCommand::CountdownElapsed(incident) => self.countdown_elapsed(incident),
            FallCommand::CooldownElapsed(until) => {
                self.detector.finish_cooldown(until);
            }
            FallCommand::AlertResolved {
                incident,
                resolution,
            } => self.alert_resolved(incident, resolution).await,
            FallCommand::Snapshot(reply) => {
                let _ = reply.send(FallSnapshot {
                    state: self.detector.state(),
                    pending_event: self.detector.pending_event().cloned(),
                });
            }
        }
    }

    async fn on_signal(&mut self, signal: FallSignal) {
        match signal {
            FallSignal::Impact { at, magnitude } => {
                log_info!("impact {magnitude:.2} g at {at}, watching for stillness");
            }
            FallSignal::FalseImpact { at } => {
                log_info!("impact at {at} dismissed, movement continued");
            }
            FallSignal::Confirmed { incident, event } => {
                let countdown = self.detector.config().response_countdown;
                log_warn!(
                    "fall confirmed (incident {incident}, peak {:.2} g, still {:.1}s), {}s to respond",
                    event.peak_magnitude,
                    event.stillness_secs,
                    countdown.as_secs()
                );
                self.start_countdown(incident, countdown);
                self.deps
                    .prompts
                    .prompt(PromptRequest::new(
                        "Did you fall?",
                        format!(
                            "Tap \"I'm OK\" within {} seconds or your contacts will be alerted.",
                            countdown.as_secs()
                        ),
                        PromptCategory::FallCountdown,
                    ))
                    .await;
            }
        }
    }

    fn start_countdown(&mut self, incident: u64, duration: std::time::Duration) {
        self.stop_countdown();
        let token = CancellationToken::new();
        let timer_token = token.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(duration) => {
                    let _ = mailbox.send(FallCommand::CountdownElapsed(incident)).await;
                }
                _ = timer_token.cancelled() => {}
            }
        });
        self.countdown = Some(token);
    }

    fn stop_countdown(&mut self) {
        if let Some(token) = self.countdown.take() {
            token.cancel();
        }
    }

    fn countdown_elapsed(&mut self, incident: u64) {
        self.countdown = None;
        // A cancellation queued ahead of this message has already moved the detector on.
        let Some(_event) = self.detector.countdown_elapsed(incident) else {
            return;
        };

        match self.deps.coordinator.submit(AlertKind::Fall) {
            Submission::Scheduled { resolution, .. } => {
                let mailbox = self.mailbox.clone();
                tokio::spawn(async move {
                    if let Ok(resolution) = resolution.await {
                        let _ = mailbox
                            .send(FallCommand::AlertResolved {
                                incident,
                                resolution,
                            })
                            .await;
                    }
                });
            }
            Submission::Coalesced { incident_id } => {
                log_info!("fall incident {incident} merged into escalation {incident_id}");
                self.detector.alert_resolved(incident, self.deps.clock.now());
            }
        }
    }

    fn cancel(&mut self) {
        let now = self.deps.clock.now();
        let effect = self.detector.cancel(now);
        if effect == CancelEffect::Ignored {
            return;
        }

        self.stop_countdown();
        if let CancelEffect::AlertCancelled { incident } = effect {
            match self.deps.coordinator.cancel(AlertKind::Fall) {
                CancelOutcome::Recalled => log_info!("fall alert {incident} recalled"),
                CancelOutcome::AlreadyHandedOff => {
                    log_warn!("fall alert {incident} already handed off, cancelling locally")
                }
                CancelOutcome::NothingPending => {}
            }
        } else {
            log_info!("fall countdown cancelled by user");
        }

        let cooldown = self.detector.config().cooldown;
        let until = now + to_chrono(cooldown);
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            time::sleep(cooldown).await;
            let _ = mailbox.send(FallCommand::CooldownElapsed(until)).await;
        });
    }

    async fn alert_resolved(&mut self, incident: u64, resolution: Resolution) {
        let now = self.deps.clock.now();
        if !self.detector.alert_resolved(incident, now) {
            return;
        }

        if let Resolution::Dispatched(receipt) = resolution {
            if !receipt.success {
                log_error!(
                    "fall alert {incident} not delivered: {}",
                    receipt.error.as_deref().unwrap_or("unknown error")
                );
            }
            self.deps
                .prompts
                .prompt(PromptRequest::new(
                    "Contacts alerted",
                    format!(
                        "We contacted {} of {} people about a possible fall.",
                        receipt.sent_count, receipt.total_count
                    ),
                    PromptCategory::AlertSent,
                ))
                .await;
        }
    }

    fn publish(&self) {
        self.state_tx.send_if_modified(|current| {
            let next = self.detector.state();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
