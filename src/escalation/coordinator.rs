use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{error, info, warn};
use tokio::{sync::oneshot, time};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    collaborators::{RemoteAlertDispatcher, RosterProvider},
    models::{AlertKind, AlertRequest, DispatchReceipt, LocationContext},
};

use super::EscalationConfig;

/// How an escalation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Handed to the remote dispatcher; the receipt says whether it worked.
    Dispatched(DispatchReceipt),
    /// Cancelled before hand-off. Nothing left the device.
    Cancelled,
}

#[derive(Debug)]
pub enum Submission {
    Scheduled {
        incident_id: Uuid,
        resolution: oneshot::Receiver<Resolution>,
    },
    /// An escalation of the same kind is already outstanding.
    Coalesced { incident_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Recalled,
    AlreadyHandedOff,
    NothingPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    HandedOff,
}

struct InFlight {
    incident_id: Uuid,
    stage: Stage,
    cancel_token: CancellationToken,
    reply: Option<oneshot::Sender<Resolution>>,
}

struct CoordinatorInner {
    config: EscalationConfig,
    dispatcher: Arc<dyn RemoteAlertDispatcher>,
    roster: Arc<dyn RosterProvider>,
    location: Mutex<Option<LocationContext>>,
    in_flight: Mutex<HashMap<AlertKind, InFlight>>,
}

/// Turns triggers from every detector into at most one outstanding remote alert
/// per kind. Cancellation and hand-off are decided under the same lock, so a
/// cancellation that wins the lock guarantees nothing is sent.
#[derive(Clone)]
pub struct EscalationCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl EscalationCoordinator {
    pub fn new(
        config: EscalationConfig,
        dispatcher: Arc<dyn RemoteAlertDispatcher>,
        roster: Arc<dyn RosterProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                dispatcher,
                roster,
                location: Mutex::new(None),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn set_location(&self, location: Option<LocationContext>) {
        *lock(&self.inner.location) = location;
    }

    pub fn submit(&self, kind: AlertKind) -> Submission {
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(existing) = in_flight.get(&kind) {
            info!(
                "{} escalation {} already outstanding, coalescing",
                kind.as_str(),
                existing.incident_id
            );
            return Submission::Coalesced {
                incident_id: existing.incident_id,
            };
        }

        let incident_id = Uuid::new_v4();
        let cancel_token = CancellationToken::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        in_flight.insert(
            kind,
            InFlight {
                incident_id,
                stage: Stage::Pending,
                cancel_token: cancel_token.clone(),
                reply: Some(reply_tx),
            },
        );
        drop(in_flight);

        let grace = self.inner.config.grace_for(kind);
        info!(
            "{} escalation {} scheduled, hand-off in {}s",
            kind.as_str(),
            incident_id,
            grace.as_secs()
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(grace) => {}
                _ = cancel_token.cancelled() => return,
            }
            run_hand_off(inner, kind, incident_id).await;
        });

        Submission::Scheduled {
            incident_id,
            resolution: reply_rx,
        }
    }

    /// Withdraws a pending escalation. After hand-off only local state can change.
    pub fn cancel(&self, kind: AlertKind) -> CancelOutcome {
        let mut in_flight = lock(&self.inner.in_flight);
        let Some(entry) = in_flight.get(&kind) else {
            return CancelOutcome::NothingPending;
        };

        if entry.stage == Stage::HandedOff {
            warn!(
                "{} escalation {} already handed off; cancellation is local only",
                kind.as_str(),
                entry.incident_id
            );
            return CancelOutcome::AlreadyHandedOff;
        }

        let Some(mut entry) = in_flight.remove(&kind) else {
            return CancelOutcome::NothingPending;
        };
        drop(in_flight);

        entry.cancel_token.cancel();
        info!("{} escalation {} cancelled", kind.as_str(), entry.incident_id);
        if let Some(reply) = entry.reply.take() {
            let _ = reply.send(Resolution::Cancelled);
        }
        CancelOutcome::Recalled
    }

    pub fn in_flight(&self) -> Vec<AlertKind> {
        let in_flight = lock(&self.inner.in_flight);
        AlertKind::ALL
            .into_iter()
            .filter(|kind| in_flight.contains_key(kind))
            .collect()
    }

    pub fn is_in_flight(&self, kind: AlertKind) -> bool {
        lock(&self.inner.in_flight).contains_key(&kind)
    }
}

async fn run_hand_off(inner: Arc<CoordinatorInner>, kind: AlertKind, incident_id: Uuid) {
    {
        let mut in_flight = lock(&inner.in_flight);
        match in_flight.get_mut(&kind) {
            Some(entry)
                if entry.incident_id == incident_id
                    && entry.stage == Stage::Pending
                    && !entry.cancel_token.is_cancelled() =>
            {
                entry.stage = Stage::HandedOff;
            }
            _ => return,
        }
    }

    let request = AlertRequest {
        incident_id,
        display_name: inner.roster.display_name(),
        kind,
        location: lock(&inner.location).clone(),
        contacts: inner.roster.contacts(),
    };

    let receipt = if request.contacts.is_empty() {
        DispatchReceipt::failed(0, "no contacts configured")
    } else {
        inner.dispatcher.dispatch(&request).await
    };

    if receipt.success {
        info!(
            "{} alert {} sent to {}/{} contacts",
            kind.as_str(),
            incident_id,
            receipt.sent_count,
            receipt.total_count
        );
    } else {
        error!(
            "{} alert {} failed ({}/{} sent): {}",
            kind.as_str(),
            incident_id,
            receipt.sent_count,
            receipt.total_count,
            receipt.error.as_deref().unwrap_or("unknown error")
        );
    }

    let reply = lock(&inner.in_flight)
        .remove(&kind)
        .and_then(|mut entry| entry.reply.take());
    if let Some(reply) = reply {
        let _ = reply.send(Resolution::Dispatched(receipt));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::models::Contact;

    #[derive(Default)]
    struct RecordingDispatcher {
        requests: Mutex<Vec<AlertRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteAlertDispatcher for RecordingDispatcher {
        async fn dispatch(&self, request: &AlertRequest) -> DispatchReceipt {
            lock(&self.requests).push(request.clone());
            if self.fail {
                DispatchReceipt::failed(request.contacts.len(), "gateway down")
            } else {
                DispatchReceipt {
                    success: true,
                    sent_count: request.contacts.len(),
                    total_count: request.contacts.len(),
                    error: None,
                }
            }
        }
    }

    struct Roster;

    impl RosterProvider for Roster {
        fn display_name(&self) -> String {
            "Ada".into()
        }

        fn contacts(&self) -> Vec<Contact> {
            vec![
                Contact {
                    name: "Grace".into(),
                    phone: "+15550001".into(),
                },
                Contact {
                    name: "Alan".into(),
                    phone: "+15550002".into(),
                },
            ]
        }
    }

    fn coordinator(dispatcher: Arc<RecordingDispatcher>) -> EscalationCoordinator {
        EscalationCoordinator::new(EscalationConfig::default(), dispatcher, Arc::new(Roster))
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_after_grace_with_roster() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let coordinator = coordinator(dispatcher.clone());

        let Submission::Scheduled { resolution, .. } = coordinator.submit(AlertKind::Inactivity)
        else {
            panic!("first submission should schedule");
        };
        let resolution = resolution.await.unwrap();

        assert!(matches!(resolution, Resolution::Dispatched(ref receipt) if receipt.success));
        let requests = lock(&dispatcher.requests);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, AlertKind::Inactivity);
        assert_eq!(requests[0].display_name, "Ada");
        assert_eq!(requests[0].contacts[0].name, "Grace");
        drop(requests);
        assert!(coordinator.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_trigger_is_coalesced() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let coordinator = coordinator(dispatcher.clone());

        let first = coordinator.submit(AlertKind::Fall);
        let second = coordinator.submit(AlertKind::Fall);
        let other = coordinator.submit(AlertKind::PatternDeviation);

        let Submission::Scheduled { incident_id, resolution } = first else {
            panic!("first submission should schedule");
        };
        assert!(matches!(second, Submission::Coalesced { incident_id: id } if id == incident_id));
        assert!(matches!(other, Submission::Scheduled { .. }));

        resolution.await.unwrap();
        time::sleep(Duration::from_secs(600)).await;
        let kinds: Vec<AlertKind> = lock(&dispatcher.requests)
            .iter()
            .map(|request| request.kind)
            .collect();
        assert_eq!(kinds, vec![AlertKind::Fall, AlertKind::PatternDeviation]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_hand_off_sends_nothing() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let coordinator = coordinator(dispatcher.clone());

        let Submission::Scheduled { resolution, .. } = coordinator.submit(AlertKind::Inactivity)
        else {
            panic!("first submission should schedule");
        };
        assert_eq!(coordinator.cancel(AlertKind::Inactivity), CancelOutcome::Recalled);
        assert_eq!(resolution.await.unwrap(), Resolution::Cancelled);

        time::sleep(Duration::from_secs(900)).await;
        assert!(lock(&dispatcher.requests).is_empty());
        assert_eq!(
            coordinator.cancel(AlertKind::Inactivity),
            CancelOutcome::NothingPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_reported_not_retried() {
        let dispatcher = Arc::new(RecordingDispatcher {
            fail: true,
            ..RecordingDispatcher::default()
        });
        let coordinator = coordinator(dispatcher.clone());

        let Submission::Scheduled { resolution, .. } = coordinator.submit(AlertKind::Fall) else {
            panic!("first submission should schedule");
        };
        let Resolution::Dispatched(receipt) = resolution.await.unwrap() else {
            panic!("expected a dispatch attempt");
        };
        assert!(!receipt.success);
        assert_eq!(receipt.error.as_deref(), Some("gateway down"));

        time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(lock(&dispatcher.requests).len(), 1);
        assert!(!coordinator.is_in_flight(AlertKind::Fall));
    }
}
