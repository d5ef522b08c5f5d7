//! Frame production for one controller.
//!
//! A render pass lays out pending changes, repaints the dirty area of the
//! controller's canvas and announces itself through the emitter:
//!
//! ```text
//! RenderStart → layout → clear dirty area → root fill → nodes → layers
//!             → RenderEnd → watch loading images → RenderNext
//! ```
//!
//! Passes are requested with [`Renderer::update`], which coalesces every
//! request made before the next scheduler round into one pass.

pub mod dispatch;
pub mod traverse;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::canvas::{BlendMode, SharedCanvas};
use crate::control::Control;
use crate::error::Result;
use crate::events::{Emitter, EventType};
use crate::geometry::Bounds;
use crate::image_manager::LeaferImage;
use crate::layout::Layouter;
use crate::paint::PaintService;
use crate::scheduler::{self, TaskId};
use crate::tree::SharedTree;

pub use dispatch::Classification;
pub use traverse::{render_node, RenderOptions};

/// Repaints a controller's canvas from its tree.
pub struct Renderer {
    weak: Weak<Renderer>,
    tree: SharedTree,
    canvas: SharedCanvas,
    emitter: Rc<Emitter>,
    layouter: Rc<Layouter>,
    paint: Rc<dyn PaintService>,
    running: Cell<bool>,
    destroyed: Cell<bool>,
    rendering: Cell<bool>,
    full: Cell<bool>,
    blocks: RefCell<Vec<Bounds>>,
    update_task: Cell<Option<TaskId>>,
    /// Canvases composited over the tree, in order.
    layers: RefCell<Vec<SharedCanvas>>,
    image_waits: RefCell<Vec<LeaferImage>>,
    renders: Cell<u64>,
}

impl Renderer {
    pub fn new(
        tree: SharedTree,
        canvas: SharedCanvas,
        emitter: Rc<Emitter>,
        layouter: Rc<Layouter>,
        paint: Rc<dyn PaintService>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            tree,
            canvas,
            emitter,
            layouter,
            paint,
            running: Cell::new(false),
            destroyed: Cell::new(false),
            rendering: Cell::new(false),
            // The first pass always covers the whole canvas.
            full: Cell::new(true),
            blocks: RefCell::new(Vec::new()),
            update_task: Cell::new(None),
            layers: RefCell::new(Vec::new()),
            image_waits: RefCell::new(Vec::new()),
            renders: Cell::new(0),
        })
    }

    /// Request a pass on the next scheduler round.
    pub fn update(&self) {
        if self.destroyed.get() || self.update_task.get().is_some() {
            return;
        }
        let weak = self.weak.clone();
        let task = scheduler::defer(move || {
            if let Some(renderer) = weak.upgrade() {
                renderer.update_task.set(None);
                renderer.render();
            }
        });
        self.update_task.set(Some(task));
    }

    /// Run a pass now. Does nothing while stopped or already rendering.
    pub fn render(&self) {
        if !self.running.get() || self.destroyed.get() || self.rendering.replace(true) {
            return;
        }

        self.emitter.emit_type(EventType::RenderStart);
        self.layouter.layout();

        let area = self.dirty_area();
        if let Some(area) = area {
            self.paint_area(&area);
        }

        let pass = self.renders.get() + 1;
        self.renders.set(pass);
        log::trace!(target: "leafer::render", "Render pass {} repainted {:?}", pass, area);

        self.rendering.set(false);
        self.emitter.emit_type(EventType::RenderEnd);
        self.watch_images();
        self.emitter.emit_type(EventType::RenderNext);
    }

    /// Repaint the whole canvas on the next pass.
    pub fn force_full(&self) {
        self.full.set(true);
    }

    /// Repaint `bounds` (canvas units) on the next pass.
    pub fn add_block(&self, bounds: Bounds) {
        self.blocks.borrow_mut().push(bounds);
    }

    /// The canvas changed size; everything is stale.
    pub fn on_resize(&self) {
        self.force_full();
        self.update();
    }

    /// Composite `layer` over the tree on every pass.
    pub fn add_layer(&self, layer: SharedCanvas) {
        self.layers.borrow_mut().push(layer);
    }

    pub fn remove_layer(&self, layer: &SharedCanvas) {
        self.layers.borrow_mut().retain(|l| !Rc::ptr_eq(l, layer));
    }

    /// Completed passes.
    pub fn renders(&self) -> u64 {
        self.renders.get()
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering.get()
    }

    pub fn is_update_pending(&self) -> bool {
        self.update_task.get().is_some()
    }

    fn dirty_area(&self) -> Option<Bounds> {
        let canvas_bounds = self.canvas.borrow().bounds();
        let mut blocks = self.layouter.take_blocks();
        blocks.append(&mut self.blocks.borrow_mut());

        if self.full.replace(false) {
            return Some(canvas_bounds);
        }
        let union = blocks
            .iter()
            .filter(|b| !b.is_empty())
            .fold(None, |acc: Option<Bounds>, b| {
                Some(acc.map_or(*b, |a| a.union(b)))
            })?;
        // Cover anti-aliased edges and snap to whole units.
        let spread = union.spread(1.0);
        let x = spread.x.floor();
        let y = spread.y.floor();
        let snapped = Bounds::new(
            x,
            y,
            spread.right().ceil() - x,
            spread.bottom().ceil() - y,
        );
        snapped.intersect(&canvas_bounds)
    }

    fn paint_area(&self, area: &Bounds) {
        let tree = self.tree.borrow();
        let Ok(mut canvas) = self.canvas.try_borrow_mut() else {
            log::warn!(target: "leafer::render", "Canvas busy, skipping pass");
            return;
        };
        if canvas.is_destroyed() {
            return;
        }

        canvas.save();
        canvas.clip_bounds(area);
        canvas.clear_world(area);

        if !canvas.allow_background_color() {
            let fill = tree
                .root()
                .and_then(|root| tree.get(root))
                .and_then(|data| data.fill_color());
            if let Some(color) = fill {
                canvas.fill_world(area, color, BlendMode::SourceOver);
            }
        }

        if let Some(root) = tree.root() {
            let options = RenderOptions {
                matrix: None,
                bounds: Some(*area),
            };
            render_node(&tree, root, &mut canvas, &options, self.paint.as_ref());
        }

        for layer in self.layers.borrow().iter() {
            match layer.try_borrow() {
                Ok(layer) if !layer.is_destroyed() => {
                    canvas.copy_world(&layer, area, None);
                }
                Ok(_) => {}
                Err(_) => log::warn!(target: "leafer::render", "Layer busy, skipping it"),
            }
        }

        canvas.restore();
    }

    /// Schedule a full repaint for every image still loading.
    fn watch_images(&self) {
        let pending = self.tree.borrow().pending_images();
        for image in pending {
            if self.image_waits.borrow().iter().any(|i| i.ptr_eq(&image)) {
                continue;
            }
            self.image_waits.borrow_mut().push(image.clone());

            let weak = self.weak.clone();
            let loaded = image.clone();
            image.on_ready(move || {
                if let Some(renderer) = weak.upgrade() {
                    renderer.image_waits.borrow_mut().retain(|i| !i.ptr_eq(&loaded));
                    renderer.force_full();
                    renderer.update();
                }
            });
        }
    }
}

impl Control for Renderer {
    fn name(&self) -> &'static str {
        "renderer"
    }

    fn start(&self) -> Result<()> {
        if !self.destroyed.get() {
            self.running.set(true);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.set(false);
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        if self.destroyed.replace(true) {
            return Ok(());
        }
        self.running.set(false);
        if let Some(task) = self.update_task.take() {
            scheduler::cancel(task);
        }
        self.layers.borrow_mut().clear();
        self.image_waits.borrow_mut().clear();
        self.blocks.borrow_mut().clear();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }
}
