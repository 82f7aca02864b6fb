//! Platform adapter around a [`LifecycleHandler`].
//!
//! The host owns the registration (installing / waiting / active workers),
//! drives the handler through install and activate, waits for each handler
//! to finish before moving on, and only routes fetches to an activated
//! worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use errqr_net::{Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::controller::{ActivateOutcome, InstallOutcome, LifecycleHandler};
use crate::SwError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Registered, install not started.
    #[default]
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate handler running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// A service worker instance.
#[derive(Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub state: ServiceWorkerState,
    handler: Arc<dyn LifecycleHandler>,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("state", &self.state)
            .finish()
    }
}

impl ServiceWorker {
    fn new(handler: Arc<dyn LifecycleHandler>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            state: ServiceWorkerState::Parsed,
            handler,
        }
    }

    /// Cache version owned by this worker.
    pub fn version(&self) -> &str {
        self.handler.version()
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// Events the host reports to its embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new worker started installing.
    UpdateFound { worker_id: ServiceWorkerId },
    /// Open pages are now controlled by this worker.
    ControllerChange { worker_id: ServiceWorkerId },
}

#[derive(Debug, Default)]
struct Registration {
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
    clients_claimed: bool,
}

/// Drives lifecycle handlers the way a browser drives service workers.
pub struct ServiceWorkerHost {
    registration: RwLock<Registration>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
}

impl ServiceWorkerHost {
    /// Create a host and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration: RwLock::new(Registration::default()),
                event_tx,
            },
            event_rx,
        )
    }

    fn transition(&self, worker: &mut ServiceWorker, state: ServiceWorkerState) {
        worker.set_state(state);
        let _ = self.event_tx.send(HostEvent::StateChange {
            worker_id: worker.id,
            new_state: state,
        });
    }

    /// Register and install a new worker version.
    ///
    /// If the handler asks to skip waiting, activation follows immediately;
    /// otherwise the worker waits until [`activate`](Self::activate).
    pub async fn register(
        &self,
        handler: Arc<dyn LifecycleHandler>,
    ) -> Result<InstallOutcome, SwError> {
        let mut worker = ServiceWorker::new(handler);
        let _ = self.event_tx.send(HostEvent::UpdateFound {
            worker_id: worker.id,
        });
        info!(version = worker.version(), "Registering worker");

        self.transition(&mut worker, ServiceWorkerState::Installing);
        {
            let mut registration = self.registration.write().await;
            if let Some(mut previous) = registration.installing.replace(worker.clone()) {
                self.transition(&mut previous, ServiceWorkerState::Redundant);
            }
        }

        let result = worker.handler.on_install().await;

        let mut registration = self.registration.write().await;
        registration.installing = None;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(version = worker.version(), error = %e, "Install failed");
                self.transition(&mut worker, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };

        self.transition(&mut worker, ServiceWorkerState::Installed);
        if let Some(mut replaced) = registration.waiting.replace(worker) {
            self.transition(&mut replaced, ServiceWorkerState::Redundant);
        }
        drop(registration);

        if outcome.skip_waiting {
            self.activate().await?;
        }
        Ok(outcome)
    }

    /// Activate the waiting worker, replacing the active one.
    ///
    /// If the activate handler fails, the previous worker stays in control
    /// and the new one goes back to waiting.
    pub async fn activate(&self) -> Result<ActivateOutcome, SwError> {
        let mut registration = self.registration.write().await;
        let mut worker = registration
            .waiting
            .take()
            .ok_or_else(|| SwError::StateError("no waiting worker".into()))?;

        self.transition(&mut worker, ServiceWorkerState::Activating);
        let outcome = match worker.handler.on_activate().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(version = worker.version(), error = %e, "Activate failed");
                self.transition(&mut worker, ServiceWorkerState::Installed);
                registration.waiting = Some(worker);
                return Err(e);
            }
        };

        if let Some(mut old) = registration.active.take() {
            self.transition(&mut old, ServiceWorkerState::Redundant);
        }
        self.transition(&mut worker, ServiceWorkerState::Activated);
        info!(version = worker.version(), deleted = outcome.deleted.len(), "Worker activated");

        registration.clients_claimed = outcome.claim_clients;
        if outcome.claim_clients {
            let _ = self.event_tx.send(HostEvent::ControllerChange {
                worker_id: worker.id,
            });
        }
        registration.active = Some(worker);
        Ok(outcome)
    }

    /// Route a request to the active worker.
    ///
    /// Returns `None` when no worker is active; the caller then goes to the
    /// network directly.
    pub async fn handle_fetch(&self, request: Request) -> Option<Response> {
        let handler = {
            let registration = self.registration.read().await;
            let active = registration.active.as_ref().filter(|w| w.is_active())?;
            Arc::clone(&active.handler)
        };
        Some(handler.on_fetch(request).await)
    }

    /// The active worker, if any.
    pub async fn active(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    /// The waiting worker, if any.
    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    /// Whether the active worker claimed already open pages.
    pub async fn clients_claimed(&self) -> bool {
        self.registration.read().await.clients_claimed
    }
}
