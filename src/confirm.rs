//! Yes/no confirmation for destructive or mode-crossing actions.
//!
//! The tracker never blocks waiting for a user. It describes what needs
//! confirming with a [`ConfirmPrompt`]; the host answers through a oneshot
//! channel whenever the user gets round to it. A dropped sender reads as
//! "no".

use log::warn;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::models::TrackingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum ConfirmAction {
    Reset { mode: TrackingMode },
    SwitchMode { from: TrackingMode, to: TrackingMode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPrompt {
    pub action: ConfirmAction,
    pub message: String,
}

impl ConfirmPrompt {
    pub fn reset(mode: TrackingMode) -> Self {
        let message = if mode == TrackingMode::Verification {
            "Verification mode is active. The reset will be recorded as suspicious activity. Proceed?"
        } else {
            "Reset all statistics?"
        };
        Self {
            action: ConfirmAction::Reset { mode },
            message: message.to_string(),
        }
    }

    pub fn switch_mode(from: TrackingMode, to: TrackingMode) -> Self {
        Self {
            action: ConfirmAction::SwitchMode { from, to },
            message: format!("Leave {from} mode and switch to {to} mode?"),
        }
    }
}

pub trait Confirmer: Send + Sync {
    fn request(&self, prompt: ConfirmPrompt) -> oneshot::Receiver<bool>;
}

/// Answers every prompt the same way. Handy for kiosks and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmer(pub bool);

impl Confirmer for StaticConfirmer {
    fn request(&self, _prompt: ConfirmPrompt) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(self.0);
        rx
    }
}

/// A prompt waiting for the user, with the channel to answer it on.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub prompt: ConfirmPrompt,
    reply: oneshot::Sender<bool>,
}

impl PendingConfirmation {
    pub fn answer(self, confirmed: bool) {
        if self.reply.send(confirmed).is_err() {
            warn!("Confirmation answered after the requester went away");
        }
    }
}

/// Forwards prompts to whoever owns the receiving end, typically the host's
/// input loop.
#[derive(Debug, Clone)]
pub struct ChannelConfirmer {
    sender: mpsc::UnboundedSender<PendingConfirmation>,
}

impl ChannelConfirmer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingConfirmation>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Confirmer for ChannelConfirmer {
    fn request(&self, prompt: ConfirmPrompt) -> oneshot::Receiver<bool> {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(PendingConfirmation { prompt, reply })
            .is_err()
        {
            warn!("No one is listening for confirmations; treating as declined");
        }
        rx
    }
}

/// Resolves a confirmation receiver; a dropped sender counts as declined.
pub async fn await_answer(rx: oneshot::Receiver<bool>) -> bool {
    rx.await.unwrap_or(false)
}
