// SPDX-License-Identifier: Apache-2.0

//! Typed one-shot event rendezvous with cancellation.
//!
//! An [`EventChannel`] keeps a table of one-shot listeners. `emit` wakes
//! every listener registered at that moment and clears the table. A
//! listener removes itself when it is dropped, so a wait that ends through
//! cancellation never leaves an entry behind.

use parking_lot::Mutex;
use tokio::sync::oneshot;

pub use tokio_util::sync::CancellationToken;

use crate::error::{GateError, GateResult};

struct Listeners<T> {
    next_id: u64,
    slots: Vec<(u64, oneshot::Sender<T>)>,
}

/// Publish/subscribe point for a single event type
pub struct EventChannel<T> {
    name: &'static str,
    listeners: Mutex<Listeners<T>>,
}

impl<T: Clone> EventChannel<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Mutex::new(Listeners {
                next_id: 0,
                slots: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers a listener for the next emission.
    ///
    /// Registration happens immediately, before the returned listener is
    /// awaited, so a caller can subscribe and then re-check its condition
    /// without missing an emission in between.
    pub fn once(&self) -> EventListener<'_, T> {
        let (tx, rx) = oneshot::channel();
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.slots.push((id, tx));

        EventListener {
            channel: self,
            id,
            rx,
        }
    }

    /// Wakes every registered listener. Returns how many were woken.
    pub fn emit(&self, value: T) -> usize {
        let slots = std::mem::take(&mut self.listeners.lock().slots);
        slots
            .into_iter()
            .filter(|(_, tx)| !tx.is_closed())
            .filter_map(|(_, tx)| tx.send(value.clone()).ok())
            .count()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().slots.len()
    }

    fn off(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.slots.len();
        listeners.slots.retain(|(slot_id, _)| *slot_id != id);
        listeners.slots.len() != before
    }
}

/// A registered, not yet fired listener
pub struct EventListener<'a, T: Clone> {
    channel: &'a EventChannel<T>,
    id: u64,
    rx: oneshot::Receiver<T>,
}

impl<T: Clone> EventListener<'_, T> {
    /// Waits for the event or for `token` to fire, whichever comes first.
    pub async fn wait(mut self, token: &CancellationToken) -> GateResult<T> {
        let event = self.channel.name();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::trace!(event, "Wait cancelled");
                Err(GateError::OperationCancelled)
            }
            received = &mut self.rx => received.map_err(|_| GateError::OperationCancelled),
        }
    }
}

impl<T: Clone> Drop for EventListener<'_, T> {
    fn drop(&mut self) {
        self.channel.off(self.id);
    }
}

/// Waits for the next emission on `channel`, cancellable via `token`.
pub async fn wait_event<T: Clone>(
    channel: &EventChannel<T>,
    token: &CancellationToken,
) -> GateResult<T> {
    channel.once().wait(token).await
}
