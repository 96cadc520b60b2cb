//! Inbound message routing.
//!
//! Classifies each channel payload and hands it to at most one handler
//! category: code, then timer, then drawing. Malformed payloads and
//! unrecognized discriminators are dropped — logged at debug, never
//! surfaced as errors.
//!
//! Timer handling is a single mutable slot. The slot is seeded from the
//! callbacks given at init and replaced wholesale by
//! `register_timer_action_handler`; unregistering empties it. There is no
//! default-handler fallback behind the slot.

use std::sync::RwLock;

use crate::identity::ParticipantId;
use crate::protocol::{Action, CodeAction, DrawingAction, TimerAction};

pub type DrawingHandler = Box<dyn Fn(DrawingAction, &ParticipantId) + Send + Sync>;
pub type CodeHandler = Box<dyn Fn(CodeAction, &ParticipantId) + Send + Sync>;
pub type TimerHandler = Box<dyn Fn(TimerAction, &ParticipantId) + Send + Sync>;

/// Outcome of a dispatch, for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Drawing,
    Code,
    Timer,
    /// The action carried our own sender id; discarded.
    EchoSuppressed,
    /// No handler registered for the action's category.
    NoHandler,
    /// Payload failed to decode.
    Malformed,
    /// Discriminator matched no category.
    Unrecognized,
}

/// Routes classified actions to the registered handlers.
pub struct ActionRouter {
    local: ParticipantId,
    drawing: DrawingHandler,
    code: Option<CodeHandler>,
    timer: RwLock<Option<TimerHandler>>,
}

impl ActionRouter {
    pub fn new(
        local: ParticipantId,
        drawing: DrawingHandler,
        code: Option<CodeHandler>,
        timer: Option<TimerHandler>,
    ) -> Self {
        Self {
            local,
            drawing,
            code,
            timer: RwLock::new(timer),
        }
    }

    /// Replace the timer slot.
    pub fn set_timer_handler(&self, handler: TimerHandler) {
        let mut slot = self.timer.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handler);
    }

    /// Empty the timer slot; subsequent timer actions are dropped.
    pub fn clear_timer_handler(&self) {
        let mut slot = self.timer.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// Classify `payload` from `from` and invoke at most one handler.
    pub fn dispatch(&self, payload: &[u8], from: &ParticipantId) -> Dispatch {
        let action = match Action::decode(payload) {
            Ok(action) => action,
            Err(e) => {
                log::debug!("Dropping malformed payload from {from}: {e}");
                return Dispatch::Malformed;
            }
        };

        match action {
            Action::Code(action) => {
                if action.sender_id.as_ref() == Some(&self.local) {
                    return Dispatch::EchoSuppressed;
                }
                match &self.code {
                    Some(handler) => {
                        handler(action, from);
                        Dispatch::Code
                    }
                    None => Dispatch::NoHandler,
                }
            }
            Action::Timer(action) => {
                if action.sender_id.as_ref() == Some(&self.local) {
                    return Dispatch::EchoSuppressed;
                }
                let slot = self.timer.read().unwrap_or_else(|e| e.into_inner());
                match slot.as_ref() {
                    Some(handler) => {
                        handler(action, from);
                        Dispatch::Timer
                    }
                    None => Dispatch::NoHandler,
                }
            }
            Action::Drawing(action) => {
                (self.drawing)(action, from);
                Dispatch::Drawing
            }
            Action::Unrecognized(tag) => {
                log::debug!("Dropping unrecognized action `{tag}` from {from}");
                Dispatch::Unrecognized
            }
        }
    }
}
