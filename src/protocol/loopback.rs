//! In-process [`Channel`] whose controller side is driven directly.
//!
//! Useful when the controller lives in the same process (or in tests): the
//! controller posts messages with [`LoopbackChannel::post`] and reads what the
//! session sent with [`LoopbackChannel::sent`] or [`LoopbackChannel::drain`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{Channel, Event, Inbound, MessageHandler};
use crate::{Error, Result};

/// An event the session sent, with its binary attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub event: Event,
    pub data: Option<Vec<u8>>,
}

type SharedHandler = Arc<dyn Fn(Inbound) + Send + Sync>;

#[derive(Default)]
struct State {
    queued: HashMap<String, VecDeque<Inbound>>,
    handlers: HashMap<String, Vec<SharedHandler>>,
    sent: Vec<Sent>,
    closed: bool,
}

/// Both ends of a controller link in one process.
///
/// Every sent event is kept, attachments included, until [`drain`](Self::drain)
/// takes it. A long-lived in-process controller must drain regularly or the
/// captured module bytes accumulate here.
#[derive(Default)]
pub struct LoopbackChannel {
    state: Mutex<State>,
    arrived: Condvar,
    // Held while handlers run so messages of one tag are handled in order.
    dispatch: Mutex<()>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message from the controller.
    ///
    /// Runs registered handlers for the tag on the calling thread, or queues
    /// the message for [`Channel::await_message`] / a later handler.
    pub fn post(&self, tag: &str, payload: serde_json::Value) {
        self.deliver(Inbound::new(tag, payload));
    }

    /// Deliver a controller message given as a JSON text frame.
    pub fn post_json(&self, frame: &str) -> Result<()> {
        self.deliver(Inbound::from_json(frame)?);
        Ok(())
    }

    fn deliver(&self, message: Inbound) {
        let _order = self.dispatch.lock();

        let handlers = {
            let mut state = self.state.lock();
            match state.handlers.get(&message.tag) {
                Some(handlers) if !handlers.is_empty() => handlers.clone(),
                _ => {
                    state.queued.entry(message.tag.clone()).or_default().push_back(message);
                    self.arrived.notify_all();
                    return;
                }
            }
        };

        for handler in &handlers {
            handler(message.clone());
        }
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().sent.clone()
    }

    /// Take everything sent so far.
    pub fn drain(&self) -> Vec<Sent> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// Disconnect. Pending and future waits fail with [`Error::Channel`].
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.arrived.notify_all();
    }
}

impl Channel for LoopbackChannel {
    fn send(&self, event: &Event, data: Option<&[u8]>) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Channel(format!("closed while sending `{}`", event.tag())));
        }
        state.sent.push(Sent {
            event: event.clone(),
            data: data.map(<[u8]>::to_vec),
        });
        Ok(())
    }

    fn await_message(&self, tag: &str) -> Result<Inbound> {
        let mut state = self.state.lock();
        loop {
            if let Some(message) = state.queued.get_mut(tag).and_then(VecDeque::pop_front) {
                return Ok(message);
            }
            if state.closed {
                return Err(Error::Channel(format!("closed while waiting for `{tag}`")));
            }
            self.arrived.wait(&mut state);
        }
    }

    fn on_message(&self, tag: &str, handler: MessageHandler) -> Result<()> {
        let handler: SharedHandler = Arc::from(handler);
        let _order = self.dispatch.lock();

        let backlog = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Channel(format!("closed while subscribing to `{tag}`")));
            }
            state
                .handlers
                .entry(tag.to_string())
                .or_default()
                .push(Arc::clone(&handler));
            state.queued.remove(tag).unwrap_or_default()
        };

        for message in backlog {
            handler(message);
        }
        Ok(())
    }
}
