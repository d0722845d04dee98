use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tinglemap_shared::{MapConfig, ToggleKey};
use tracing::{debug, warn};

use crate::layers::SharedLayers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    Key(ToggleKey),
    /// Notified for every key.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type ToggleListener = Rc<dyn Fn(ToggleKey, bool) -> anyhow::Result<()>>;
/// A UI element mirroring one toggle, e.g. a checkbox.
pub type ToggleControl = Rc<dyn Fn(bool)>;
pub type ToggleSnapshot = BTreeMap<ToggleKey, bool>;

/// Layer and label visibility switches.
///
/// Changing a value pushes it to the rendering layer, then to the bound
/// control, then to listeners. Persisting values is left to listeners.
pub struct ToggleState {
    states: RefCell<ToggleSnapshot>,
    layers: SharedLayers,
    listeners: RefCell<Vec<(ListenerId, ListenerScope, ToggleListener)>>,
    controls: RefCell<HashMap<ToggleKey, ToggleControl>>,
    next_listener: Cell<u64>,
}

impl ToggleState {
    pub fn new(config: &MapConfig, layers: SharedLayers) -> Self {
        let states = ToggleKey::ALL
            .into_iter()
            .map(|key| (key, config.layer_default(key)))
            .collect();
        Self {
            states: RefCell::new(states),
            layers,
            listeners: RefCell::new(Vec::new()),
            controls: RefCell::new(HashMap::new()),
            next_listener: Cell::new(0),
        }
    }

    pub fn get_state(&self, key: ToggleKey) -> bool {
        self.states
            .borrow()
            .get(&key)
            .copied()
            .unwrap_or_else(|| key.default_visibility())
    }

    /// Copy of every current value.
    pub fn states(&self) -> ToggleSnapshot {
        self.states.borrow().clone()
    }

    /// Returns false, and notifies nobody, when `value` is already current.
    pub fn set_state(&self, key: ToggleKey, value: bool) -> bool {
        {
            let mut states = self.states.borrow_mut();
            if states.get(&key) == Some(&value) {
                return false;
            }
            states.insert(key, value);
        }
        debug!(key = %key, value, "toggle changed");

        self.layers.borrow_mut().set_layer_visibility(key, value);
        let control = self.controls.borrow().get(&key).cloned();
        if let Some(control) = control {
            control(value);
        }
        self.notify(key, value);
        true
    }

    /// Apply several values one by one. Returns how many changed.
    pub fn set_states(&self, values: impl IntoIterator<Item = (ToggleKey, bool)>) -> usize {
        values
            .into_iter()
            .filter(|(key, value)| self.set_state(*key, *value))
            .count()
    }

    /// Push every current value to the rendering layer without notifying listeners.
    pub fn apply_all(&self) {
        let states = self.states();
        let mut layers = self.layers.borrow_mut();
        for (key, value) in states {
            layers.set_layer_visibility(key, value);
        }
    }

    pub fn bind_control(&self, key: ToggleKey, control: impl Fn(bool) + 'static) {
        let control: ToggleControl = Rc::new(control);
        control(self.get_state(key));
        self.controls.borrow_mut().insert(key, control);
    }

    pub fn unbind_control(&self, key: ToggleKey) -> bool {
        self.controls.borrow_mut().remove(&key).is_some()
    }

    pub fn add_listener(
        &self,
        scope: ListenerScope,
        listener: impl Fn(ToggleKey, bool) -> anyhow::Result<()> + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.get() + 1);
        self.next_listener.set(id.0);
        self.listeners
            .borrow_mut()
            .push((id, scope, Rc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn clear_listeners(&self) {
        self.listeners.borrow_mut().clear();
        self.controls.borrow_mut().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn notify(&self, key: ToggleKey, value: bool) {
        // Key listeners first, then the catch-all group.
        let listeners: Vec<ToggleListener> = {
            let listeners = self.listeners.borrow();
            let keyed = listeners
                .iter()
                .filter(|(_, scope, _)| *scope == ListenerScope::Key(key));
            let all = listeners
                .iter()
                .filter(|(_, scope, _)| *scope == ListenerScope::All);
            keyed
                .chain(all)
                .map(|(_, _, listener)| Rc::clone(listener))
                .collect()
        };
        for listener in listeners {
            if let Err(e) = listener(key, value) {
                warn!(key = %key, value, error = %e, "toggle listener failed");
            }
        }
    }

    pub fn snapshot(&self) -> ToggleSnapshot {
        self.states()
    }

    /// Restore saved values through `set_states`. Returns how many changed.
    pub fn restore(&self, snapshot: &ToggleSnapshot) -> usize {
        self.set_states(snapshot.iter().map(|(k, v)| (*k, *v)))
    }

    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }

    /// Restore from saved JSON. Keys this build does not know are ignored.
    pub fn restore_json(&self, raw: &str) -> serde_json::Result<usize> {
        let saved: BTreeMap<String, bool> = serde_json::from_str(raw)?;
        let mut snapshot = ToggleSnapshot::new();
        for (raw_key, value) in saved {
            match raw_key.parse::<ToggleKey>() {
                Ok(key) => {
                    snapshot.insert(key, value);
                }
                Err(e) => debug!(error = %e, "ignoring saved toggle"),
            }
        }
        Ok(self.restore(&snapshot))
    }
}
