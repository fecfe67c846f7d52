// hub.rs

use log::*;
use tokio::sync::mpsc;

use crate::CMD_GET_READINGS;

pub type SubscriberTx = mpsc::UnboundedSender<String>;

/// One connected real-time listener. Owned by the hub; the transport
/// task keeps only the receiving end of `tx`.
pub struct Subscriber {
    pub id: u64,
    tx: SubscriberTx,
}

/// Everything a transport can tell the hub. Transports translate their
/// own connection lifecycle into these; tests inject them directly.
#[derive(Debug)]
pub enum SubscriberEvent {
    Connect { tx: SubscriberTx },
    Disconnect { id: u64 },
    Message { id: u64, text: String },
}

/// What the caller has to do after an event has been absorbed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubAction {
    None,
    Registered(u64),
    ReadingRequested(u64),
}

/// Registry of live subscribers with broadcast and unicast delivery.
/// Mutated only behind the shared state lock; delivery to one dead
/// subscriber never affects the others.
#[derive(Default)]
pub struct SubscriberHub {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, event: SubscriberEvent) -> HubAction {
        match event {
            SubscriberEvent::Connect { tx } => {
                let id = self.next_id;
                self.next_id += 1;
                self.subscribers.push(Subscriber { id, tx });
                info!("Subscriber {id} connected ({n} live)", n = self.subscribers.len());
                HubAction::Registered(id)
            }
            SubscriberEvent::Disconnect { id } => {
                self.subscribers.retain(|s| s.id != id);
                info!("Subscriber {id} disconnected ({n} live)", n = self.subscribers.len());
                HubAction::None
            }
            SubscriberEvent::Message { id, text } => {
                if text == CMD_GET_READINGS {
                    HubAction::ReadingRequested(id)
                } else {
                    // anything else on the channel is not an error
                    debug!("Subscriber {id} sent {len} bytes, ignored", len = text.len());
                    HubAction::None
                }
            }
        }
    }

    /// Best-effort fan-out: a closed transport is a per-subscriber
    /// no-op, the remaining subscribers still get the payload.
    pub fn broadcast(&self, line: &str) {
        for sub in &self.subscribers {
            if sub.tx.send(line.to_string()).is_err() {
                debug!("Subscriber {id} transport closed, skipping", id = sub.id);
            }
        }
    }

    /// Returns false when the subscriber is gone or its transport closed.
    pub fn unicast(&self, id: u64, line: &str) -> bool {
        match self.subscribers.iter().find(|s| s.id == id) {
            Some(sub) => sub.tx.send(line.to_string()).is_ok(),
            None => {
                debug!("Unicast to unknown subscriber {id}");
                false
            }
        }
    }

    /// Drop subscribers whose transport went away without a disconnect
    /// event. Runs once per pipeline loop iteration.
    pub fn prune(&mut self) {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| !s.tx.is_closed());
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            info!("Pruned {dropped} stale subscribers");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}


// EOF
