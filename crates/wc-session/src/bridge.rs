//! Seam between the orchestrator and whatever renders it.
//!
//! The current step lives in a `watch` channel so late subscribers see it
//! immediately; every change and modal request is also fanned out on a
//! `broadcast` channel. Writes are numbered so a deferred restore can tell
//! whether anything was shown since it captured the step.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use wc_core::{ConnectionStep, StepChange};

/// Modal opened when a dapp launch begins.
pub const WALLET_CONNECT_MODAL: &str = "WALLET_CONNECT_MODAL";
pub const MODAL_ORIGIN: &str = "WalletConnect";

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    StepChanged { step: StepChange },
    ModalRequested { modal: String, origin: String },
}

/// Marks one step write. Any later write invalidates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepToken(u64);

pub struct UiBridge {
    step: watch::Sender<StepChange>,
    events: broadcast::Sender<UiEvent>,
    generation: Mutex<u64>,
}

impl UiBridge {
    pub fn new() -> Self {
        let (step, _) = watch::channel(StepChange::new(ConnectionStep::Loading));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            step,
            events,
            generation: Mutex::new(0),
        }
    }

    pub fn current_step(&self) -> StepChange {
        self.step.borrow().clone()
    }

    pub fn watch_step(&self) -> watch::Receiver<StepChange> {
        self.step.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub fn set_step(&self, change: StepChange) {
        let mut generation = self.generation.lock();
        self.publish(&mut generation, change);
    }

    /// Show `change`, returning the step it replaced and a token for
    /// [`UiBridge::restore_step`].
    pub fn replace_step(&self, change: StepChange) -> (StepChange, StepToken) {
        let mut generation = self.generation.lock();
        let previous = self.publish(&mut generation, change);
        (previous, StepToken(*generation))
    }

    /// Show `previous` again, but only if nothing was written since `token`.
    pub fn restore_step(&self, token: StepToken, previous: StepChange) -> bool {
        let mut generation = self.generation.lock();
        if *generation != token.0 {
            debug!(step = %previous.name, "newer step shown, not restoring");
            return false;
        }
        self.publish(&mut generation, previous);
        true
    }

    fn publish(&self, generation: &mut u64, change: StepChange) -> StepChange {
        *generation += 1;
        debug!(step = %change.name, "step changed");
        let previous = self.step.send_replace(change.clone());
        // No subscribers is fine
        let _ = self.events.send(UiEvent::StepChanged { step: change });
        previous
    }

    pub fn request_modal(&self, modal: &str, origin: &str) {
        let _ = self.events.send(UiEvent::ModalRequested {
            modal: modal.to_string(),
            origin: origin.to_string(),
        });
    }
}

impl Default for UiBridge {
    fn default() -> Self {
        Self::new()
    }
}
