// ============================================================================
// Change Watcher
// ============================================================================
//
// Node mutations call `notify` synchronously. The watcher batches every
// notification made before the next scheduler round into one WatchData
// event followed by one render request.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use crate::control::Control;
use crate::error::Result;
use crate::events::{Emitter, EventType};
use crate::renderer::Renderer;
use crate::scheduler::{self, TaskId};

pub struct Watcher {
    weak: Weak<Watcher>,
    emitter: Rc<Emitter>,
    renderer: Rc<Renderer>,
    running: Cell<bool>,
    destroyed: Cell<bool>,
    dirty: Cell<bool>,
    children_changed: Cell<bool>,
    flush_task: Cell<Option<TaskId>>,
}

impl Watcher {
    pub fn new(emitter: Rc<Emitter>, renderer: Rc<Renderer>) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            emitter,
            renderer,
            running: Cell::new(false),
            destroyed: Cell::new(false),
            dirty: Cell::new(false),
            children_changed: Cell::new(false),
            flush_task: Cell::new(None),
        })
    }

    /// Record a change. `children` marks an insertion or removal.
    pub fn notify(&self, children: bool) {
        if self.destroyed.get() {
            return;
        }
        self.dirty.set(true);
        if children {
            self.children_changed.set(true);
        }
        if self.running.get() {
            self.schedule_flush();
        }
    }

    /// Whether the batch being announced added or removed nodes.
    /// Meaningful while WatchData listeners run.
    pub fn children_changed(&self) -> bool {
        self.children_changed.get()
    }

    pub fn has_changes(&self) -> bool {
        self.dirty.get()
    }

    fn schedule_flush(&self) {
        if self.flush_task.get().is_some() {
            return;
        }
        let weak = self.weak.clone();
        let task = scheduler::defer(move || {
            if let Some(watcher) = weak.upgrade() {
                watcher.flush_task.set(None);
                watcher.flush();
            }
        });
        self.flush_task.set(Some(task));
    }

    fn flush(&self) {
        if !self.running.get() || !self.dirty.replace(false) {
            return;
        }
        log::trace!(
            target: "leafer::watch",
            "Flushing changes (children changed: {})",
            self.children_changed.get()
        );
        self.emitter.emit_type(EventType::WatchData);
        self.children_changed.set(false);
        self.renderer.update();
    }
}

impl Control for Watcher {
    fn name(&self) -> &'static str {
        "watcher"
    }

    fn start(&self) -> Result<()> {
        if self.destroyed.get() {
            return Ok(());
        }
        self.running.set(true);
        if self.dirty.get() {
            self.schedule_flush();
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.set(false);
        if let Some(task) = self.flush_task.take() {
            scheduler::cancel(task);
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.stop()?;
        self.destroyed.set(true);
        self.dirty.set(false);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::geometry::ScreenSize;
    use crate::layout::Layouter;
    use crate::node::NodeData;
    use crate::paint::SkiaPaint;
    use crate::tree::Tree;
    use std::cell::RefCell;

    fn watcher() -> (Rc<Watcher>, Rc<Emitter>, Rc<Renderer>) {
        let (tree, _) = Tree::with_root(NodeData::group());
        let tree = tree.shared();
        let emitter = Rc::new(Emitter::new());
        let layouter = Rc::new(Layouter::new(tree.clone(), emitter.clone()));
        let canvas = Canvas::new(ScreenSize::new(4.0, 4.0, 1.0)).unwrap().shared();
        let renderer = Renderer::new(tree, canvas, emitter.clone(), layouter, Rc::new(SkiaPaint));
        (Watcher::new(emitter.clone(), renderer.clone()), emitter, renderer)
    }

    #[test]
    fn test_batches_notifications() {
        let (watcher, emitter, renderer) = watcher();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let w = watcher.clone();
        emitter.on(EventType::WatchData, move |_| log.borrow_mut().push(w.children_changed()));

        watcher.start().unwrap();
        watcher.notify(false);
        watcher.notify(true);
        watcher.notify(false);
        assert!(seen.borrow().is_empty());

        scheduler::run_pending();
        assert_eq!(*seen.borrow(), vec![true]);
        assert!(renderer.is_update_pending());
        assert!(!watcher.children_changed());
    }

    #[test]
    fn test_changes_wait_for_start() {
        let (watcher, emitter, _renderer) = watcher();
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        emitter.on(EventType::WatchData, move |_| counter.set(counter.get() + 1));

        watcher.notify(false);
        scheduler::run_until_idle();
        assert_eq!(count.get(), 0);
        assert!(watcher.has_changes());

        watcher.start().unwrap();
        scheduler::run_until_idle();
        assert_eq!(count.get(), 1);
    }
}
