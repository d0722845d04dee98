use std::collections::BTreeMap;
use std::rc::Rc;

use tinglemap_shared::Viewport;

use crate::error::SurfaceError;

/// Renderer events the engine listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEvent {
    /// Panning settled.
    MoveEnd,
    /// Zoom animation settled.
    ZoomEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type ViewportHandler = Rc<dyn Fn(Viewport)>;

/// The map widget owned by the engine: mounted once, observed through
/// explicit subscriptions, released on cleanup.
pub trait MapSurface {
    fn mount(&mut self) -> Result<(), SurfaceError>;
    fn add_event_listener(&mut self, event: MapEvent, handler: ViewportHandler) -> SubscriptionId;
    /// Returns false if `id` was not subscribed.
    fn remove_event_listener(&mut self, id: SubscriptionId) -> bool;
    fn current_view(&self) -> Viewport;
    fn release(&mut self);
}

/// Subscription bookkeeping for surfaces that dispatch events themselves.
#[derive(Default)]
pub struct ListenerSet {
    next_id: u64,
    handlers: BTreeMap<SubscriptionId, (MapEvent, ViewportHandler)>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: MapEvent, handler: ViewportHandler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers.insert(id, (event, handler));
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Handlers for `event` in subscription order. Call them after releasing
    /// any borrow of the set; a handler may subscribe or unsubscribe.
    pub fn handlers_for(&self, event: MapEvent) -> Vec<ViewportHandler> {
        self.handlers
            .values()
            .filter(|(e, _)| *e == event)
            .map(|(_, handler)| Rc::clone(handler))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tinglemap_shared::Bounds;

    use super::*;

    #[test]
    fn handlers_are_filtered_by_event_and_removable() {
        let mut set = ListenerSet::new();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let move_id = set.add(MapEvent::MoveEnd, Rc::new(move |_: Viewport| counter.set(counter.get() + 1)));
        set.add(MapEvent::ZoomEnd, Rc::new(|_: Viewport| {}));

        let view = Viewport::new(Bounds::new(0.0, 0.0, 10.0, 10.0), -2.0);
        for handler in set.handlers_for(MapEvent::MoveEnd) {
            handler(view);
        }
        assert_eq!(hits.get(), 1);

        assert!(set.remove(move_id));
        assert!(!set.remove(move_id));
        assert!(set.handlers_for(MapEvent::MoveEnd).is_empty());
        assert_eq!(set.len(), 1);
    }
}
