//! Typed notifications emitted by a controller and its subsystems.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::geometry::ScreenSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    // Lifecycle
    Start,
    Restart,
    Stop,
    BeforeReady,
    Ready,
    AfterReady,
    ViewReady,
    ViewCompleted,
    Resize,
    End,
    // Subsystems
    RenderStart,
    RenderEnd,
    RenderNext,
    LayoutEnd,
    WatchData,
}

/// Size change of a controller's surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResizeEvent {
    pub size: ScreenSize,
    pub old: ScreenSize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventType,
    pub resize: Option<ResizeEvent>,
}

impl Event {
    pub fn new(kind: EventType) -> Self {
        Self { kind, resize: None }
    }

    pub fn resize(event: ResizeEvent) -> Self {
        Self {
            kind: EventType::Resize,
            resize: Some(event),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Rc<dyn Fn(&Event)>;

struct Listener {
    id: ListenerId,
    kind: EventType,
    once: bool,
    handler: Handler,
}

/// Listener registry for one event target.
///
/// Handlers run in registration order. A handler may register or remove
/// listeners while an event is dispatched; the change applies to the next
/// emission.
#[derive(Default)]
pub struct Emitter {
    listeners: RefCell<Vec<Listener>>,
    next_id: Cell<u64>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventType, handler: impl Fn(&Event) + 'static) -> ListenerId {
        self.add(kind, false, Rc::new(handler))
    }

    /// Like [`Emitter::on`], but the listener is removed after its first call.
    pub fn once(&self, kind: EventType, handler: impl Fn(&Event) + 'static) -> ListenerId {
        self.add(kind, true, Rc::new(handler))
    }

    fn add(&self, kind: EventType, once: bool, handler: Handler) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            kind,
            once,
            handler,
        });
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn off_many(&self, ids: impl IntoIterator<Item = ListenerId>) {
        for id in ids {
            self.off(id);
        }
    }

    pub fn off_all(&self) {
        self.listeners.borrow_mut().clear();
    }

    pub fn has(&self, kind: EventType) -> bool {
        self.listeners.borrow().iter().any(|l| l.kind == kind)
    }

    pub fn emit(&self, event: &Event) {
        // Snapshot first so handlers can touch the registry.
        let handlers: Vec<Handler> = {
            let mut listeners = self.listeners.borrow_mut();
            let handlers = listeners
                .iter()
                .filter(|l| l.kind == event.kind)
                .map(|l| l.handler.clone())
                .collect();
            listeners.retain(|l| !(l.once && l.kind == event.kind));
            handlers
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn emit_type(&self, kind: EventType) {
        self.emit(&Event::new(kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_fires_a_single_time() {
        let emitter = Emitter::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        emitter.once(EventType::Ready, move |_| c.set(c.get() + 1));

        emitter.emit_type(EventType::Ready);
        emitter.emit_type(EventType::Ready);
        assert_eq!(count.get(), 1);
        assert!(!emitter.has(EventType::Ready));
    }

    #[test]
    fn test_off_and_kind_filter() {
        let emitter = Emitter::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let id = emitter.on(EventType::RenderEnd, move |_| c.set(c.get() + 1));

        emitter.emit_type(EventType::RenderStart);
        emitter.emit_type(EventType::RenderEnd);
        assert!(emitter.off(id));
        emitter.emit_type(EventType::RenderEnd);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_handler_can_register_during_emit() {
        let emitter = Rc::new(Emitter::new());
        let inner = emitter.clone();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        emitter.on(EventType::Stop, move |_| {
            let h = h.clone();
            inner.on(EventType::Stop, move |_| h.set(h.get() + 1));
        });

        emitter.emit_type(EventType::Stop);
        assert_eq!(hits.get(), 0);
        emitter.emit_type(EventType::Stop);
        assert_eq!(hits.get(), 1);
    }
}
