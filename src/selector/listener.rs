//! Listener handles and the per-selector listener registry.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ListenerFailure, SelectorError};

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new random listener ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a listener invocation. `Err` removes the listener.
pub type ListenerResult = Result<(), ListenerFailure>;

type Callback = dyn Fn(Option<&Value>) -> ListenerResult;

/// A listener callback with a stable identity.
///
/// Identity belongs to the handle: clones of a `Listener` are the same
/// listener, while two handles wrapping equal closures are different ones.
/// The callback receives `None` when the selector's condition does not hold.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Rc<Callback>,
}

impl Listener {
    /// Wraps a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Option<&Value>) -> ListenerResult + 'static,
    {
        Self {
            id: ListenerId::new(),
            callback: Rc::new(callback),
        }
    }

    /// The listener's identity.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn invoke(&self, value: Option<&Value>) -> ListenerResult {
        (self.callback)(value)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish_non_exhaustive()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

/// How a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    /// Fires on every qualifying change until removed.
    Repeat,
    /// Fires at most once, then is removed.
    Once,
}

impl ListenMode {
    /// Mode name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Repeat => "repeat",
            Self::Once => "once",
        }
    }
}

impl fmt::Display for ListenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
struct Registration {
    listener: Listener,
    mode: ListenMode,
}

/// Insertion-ordered listener registry.
///
/// Notification rounds iterate a snapshot of the ids and re-check membership
/// before each invocation, so removals made by listeners (including the
/// listener being invoked) are never re-visited.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    entries: Vec<Registration>,
}

impl ListenerRegistry {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn mode_of(&self, id: ListenerId) -> Option<ListenMode> {
        self.entries
            .iter()
            .find(|r| r.listener.id == id)
            .map(|r| r.mode)
    }

    /// Registers `listener`. Returns false if it is already registered in the
    /// same mode; fails if it is registered in the other mode.
    pub(crate) fn insert(&mut self, listener: &Listener, mode: ListenMode) -> Result<bool, SelectorError> {
        match self.mode_of(listener.id) {
            Some(existing) if existing == mode => Ok(false),
            Some(existing) => Err(SelectorError::ConflictingRegistration {
                listener: listener.id.to_string(),
                existing: existing.name(),
            }),
            None => {
                self.entries.push(Registration {
                    listener: listener.clone(),
                    mode,
                });
                Ok(true)
            }
        }
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.listener.id != id);
        self.entries.len() != before
    }

    pub(crate) fn get(&self, id: ListenerId) -> Option<(Listener, ListenMode)> {
        self.entries
            .iter()
            .find(|r| r.listener.id == id)
            .map(|r| (r.listener.clone(), r.mode))
    }

    pub(crate) fn ids(&self) -> Vec<ListenerId> {
        self.entries.iter().map(|r| r.listener.id).collect()
    }
}
