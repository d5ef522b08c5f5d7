use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::canvas::{Canvas, SharedCanvas};
use crate::error::Result;
use crate::geometry::ScreenSize;

/// Pool of drawing surfaces.
///
/// Tracks the surfaces a controller manages and keeps released scratch
/// surfaces for reuse until the next [`CanvasManager::clear_recycled`].
#[derive(Default)]
pub struct CanvasManager {
    list: RefCell<Vec<SharedCanvas>>,
    recycled: RefCell<Vec<Canvas>>,
    destroyed: Cell<bool>,
}

impl CanvasManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a managed surface, destroyed together with the manager.
    pub fn add(&self, canvas: SharedCanvas) {
        self.list.borrow_mut().push(canvas);
    }

    /// Stop tracking a managed surface without destroying it.
    pub fn remove(&self, canvas: &SharedCanvas) {
        self.list.borrow_mut().retain(|c| !Rc::ptr_eq(c, canvas));
    }

    /// A cleared scratch surface of `size`, reused from the pool if possible.
    pub fn get(&self, size: ScreenSize) -> Result<Canvas> {
        let reused = {
            let mut recycled = self.recycled.borrow_mut();
            recycled
                .iter()
                .position(|c| c.is_same_size(&size))
                .map(|i| recycled.swap_remove(i))
        };
        match reused {
            Some(mut canvas) => {
                canvas.clear();
                canvas.set_path(None);
                Ok(canvas)
            }
            None => Canvas::new(size),
        }
    }

    /// Return a scratch surface to the pool.
    pub fn recycle(&self, canvas: Canvas) {
        if self.destroyed.get() || canvas.is_destroyed() {
            return;
        }
        self.recycled.borrow_mut().push(canvas);
    }

    pub fn recycled_len(&self) -> usize {
        self.recycled.borrow().len()
    }

    /// Drop every pooled scratch surface.
    pub fn clear_recycled(&self) {
        let count = {
            let mut recycled = self.recycled.borrow_mut();
            let count = recycled.len();
            recycled.clear();
            count
        };
        if count > 0 {
            log::debug!(target: "leafer::render", "Released {} recycled canvases", count);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        for canvas in self.list.borrow_mut().drain(..) {
            if let Ok(mut canvas) = canvas.try_borrow_mut() {
                canvas.destroy();
            }
        }
        self.recycled.borrow_mut().clear();
    }
}
