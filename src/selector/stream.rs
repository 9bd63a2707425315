use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SelectorError, SelectorResult};

use super::listener::Listener;
use super::Selector;

/// A value delivered to a [`SelectorStream`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorEvent {
    /// Selector output; `None` when the condition does not hold.
    pub value: Option<Value>,
}

/// Pull-based view of a selector's notifications.
///
/// The stream registers a repeat-mode listener that pushes into a bounded
/// channel. When the channel is full the value is dropped and counted rather
/// than blocking the updater. Dropping this stream removes the listener.
#[derive(Debug)]
pub struct SelectorStream {
    selector: Weak<Selector>,
    listener: Listener,
    rx: Receiver<SelectorEvent>,
    dropped: Rc<Cell<u64>>,
    unsubscribed: Cell<bool>,
}

impl SelectorStream {
    pub(crate) fn open(selector: &Rc<Selector>, capacity: usize) -> SelectorResult<Self> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let dropped = Rc::new(Cell::new(0_u64));
        let counter = Rc::clone(&dropped);
        let listener = Listener::new(move |value| {
            match tx.try_send(SelectorEvent {
                value: value.cloned(),
            }) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    counter.set(counter.get().saturating_add(1));
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(SelectorError::Disconnected.into()),
            }
        });
        selector.listen(&listener)?;
        Ok(Self {
            selector: Rc::downgrade(selector),
            listener,
            rx,
            dropped,
            unsubscribed: Cell::new(false),
        })
    }

    /// Number of values discarded because the channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    /// Number of values waiting to be received.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Stops receiving new values. Idempotent; already queued values can
    /// still be drained.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.replace(true) {
            return;
        }
        if let Some(selector) = self.selector.upgrade() {
            selector.remove_listener(&self.listener);
        }
    }

    /// Receive the next queued value without waiting.
    pub fn try_recv(&self) -> SelectorResult<Option<SelectorEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SelectorError::Disconnected),
        }
    }

    /// Receive the next value with a timeout.
    ///
    /// Values are produced by updates on the store's own thread, so waiting
    /// only makes progress if they were queued beforehand.
    pub fn recv_timeout(&self, timeout: Duration) -> SelectorResult<SelectorEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => SelectorError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => SelectorError::Disconnected,
        })
    }

    /// Takes every queued value.
    #[must_use]
    pub fn drain(&self) -> Vec<SelectorEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for SelectorStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
