//! Lifecycle controller.
//!
//! A [`Leafer`] owns one drawing surface, the scene rooted on it and the
//! subsystems that keep the surface in sync with the scene. It sequences
//! those subsystems as a unit and turns their events into readiness
//! milestones:
//!
//! - **created**: the first render pass started
//! - **ready**: the first layout pass finished
//! - **view ready**: the first render pass finished
//! - **view completed**: a render pass finished with every image loaded;
//!   cleared again while a newly referenced image is still loading
//!
//! Work that depends on a milestone registers a callback with the matching
//! `wait_*` method. Teardown is deferred one scheduler round, see
//! [`Leafer::destroy`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::canvas::{Canvas, SharedCanvas};
use crate::canvas_manager::CanvasManager;
use crate::config::{LeaferConfig, LeaferId};
use crate::control::{Control, Shared};
use crate::error::{Error, Result};
use crate::events::{Emitter, Event, EventType, ListenerId, ResizeEvent};
use crate::geometry::{Bounds, Point, ScreenSize, Size};
use crate::image_manager::ImageManager;
use crate::interaction::{Cursor, Interaction, Selector};
use crate::layout::Layouter;
use crate::node::{NodeData, NodeRef};
use crate::paint::{Color, PaintService, SkiaPaint};
use crate::renderer::{render_node, RenderOptions, Renderer};
use crate::scheduler::{self, TaskId};
use crate::tree::{NodeId, SharedTree, Tree};
use crate::watcher::Watcher;

bitflags! {
    /// Readiness milestones reached by a controller.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Milestones: u8 {
        const CREATED = 1 << 0;
        const READY = 1 << 1;
        const VIEW_READY = 1 << 2;
        const VIEW_COMPLETED = 1 << 3;
    }
}

/// Handle for a pending [`Leafer::next_render`] callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaitId(u64);

type Callback = Box<dyn FnOnce()>;

/// Everything that exists only between init and destroy.
#[derive(Clone)]
struct Subsystems {
    canvas: SharedCanvas,
    renderer: Rc<Renderer>,
    watcher: Rc<Watcher>,
    layouter: Rc<Layouter>,
    selector: Shared<Selector>,
    interaction: Shared<Interaction>,
    canvas_manager: Shared<CanvasManager>,
    hit_canvas_manager: Shared<CanvasManager>,
    /// Started and stopped together, in order.
    controllers: Vec<Shared<dyn Control>>,
}

pub(crate) struct LeaferInner {
    weak: Weak<LeaferInner>,
    id: LeaferId,
    is_app: bool,
    config: RefCell<LeaferConfig>,
    emitter: Rc<Emitter>,
    tree: SharedTree,
    root: NodeId,
    paint: Rc<dyn PaintService>,
    subsystems: RefCell<Option<Subsystems>>,
    milestones: Cell<Milestones>,
    running: Cell<bool>,
    started: Cell<bool>,
    destroyed: Cell<bool>,
    start_task: Cell<Option<TaskId>>,
    parent: RefCell<Weak<LeaferInner>>,
    children: RefCell<Vec<Leafer>>,
    listener_ids: RefCell<Vec<ListenerId>>,
    ready_waits: RefCell<Vec<Callback>>,
    view_ready_waits: RefCell<Vec<Callback>>,
    view_completed_waits: RefCell<Vec<Callback>>,
    next_render_waits: RefCell<Vec<(WaitId, Callback)>>,
    next_wait_id: Cell<u64>,
}

impl LeaferInner {
    /// A node of this controller's tree changed.
    pub(crate) fn node_changed(&self, children: bool) {
        let watcher = self.subsystems.borrow().as_ref().map(|s| s.watcher.clone());
        if let Some(watcher) = watcher {
            watcher.notify(children);
        }
    }
}

/// Shared handle to a lifecycle controller.
#[derive(Clone)]
pub struct Leafer {
    inner: Rc<LeaferInner>,
}

impl fmt::Debug for Leafer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leafer")
            .field("id", &self.inner.id)
            .field("is_app", &self.inner.is_app)
            .field("running", &self.inner.running.get())
            .field("milestones", &self.inner.milestones.get())
            .finish()
    }
}

impl PartialEq for Leafer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Leafer {
    /// Create and initialize a controller.
    pub fn new(config: LeaferConfig) -> Result<Self> {
        let leafer = Self::empty();
        leafer.init(config)?;
        Ok(leafer)
    }

    /// Create a controller without a surface. Call [`Leafer::init`] before
    /// starting it.
    pub fn empty() -> Self {
        Self::create(false)
    }

    pub(crate) fn create(is_app: bool) -> Self {
        let (tree, root) = Tree::with_root(NodeData::leafer());
        let inner = Rc::new_cyclic(|weak: &Weak<LeaferInner>| LeaferInner {
            weak: weak.clone(),
            id: LeaferId::next(),
            is_app,
            config: RefCell::new(LeaferConfig::default()),
            emitter: Rc::new(Emitter::new()),
            tree: tree.shared(),
            root,
            paint: Rc::new(SkiaPaint),
            subsystems: RefCell::new(None),
            milestones: Cell::new(Milestones::empty()),
            running: Cell::new(false),
            started: Cell::new(false),
            destroyed: Cell::new(false),
            start_task: Cell::new(None),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            listener_ids: RefCell::new(Vec::new()),
            ready_waits: RefCell::new(Vec::new()),
            view_ready_waits: RefCell::new(Vec::new()),
            view_completed_waits: RefCell::new(Vec::new()),
            next_render_waits: RefCell::new(Vec::new()),
            next_wait_id: Cell::new(0),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<LeaferInner>) -> Self {
        Self { inner }
    }

    /// Bind a surface and build the subsystems. A second call is a no-op.
    ///
    /// With `config.start` set, [`Leafer::start`] runs on the next scheduler
    /// round so that configuration made right after this call is not raced.
    pub fn init(&self, config: LeaferConfig) -> Result<()> {
        self.init_with_parent(config, None)
    }

    pub(crate) fn init_with_parent(&self, config: LeaferConfig, parent: Option<&Leafer>) -> Result<()> {
        let inner = &self.inner;
        if inner.destroyed.get() {
            return Err(Error::Destroyed);
        }
        if inner.subsystems.borrow().is_some() {
            return Ok(());
        }

        let mut canvas = Canvas::new(config.screen_size())?;
        canvas.set_allow_background_color(config.allow_background_color);
        canvas.hittable = config.hittable;
        if config.allow_background_color {
            canvas.set_background_color(config.fill);
        }
        if config.is_auto_layout() {
            canvas.start_auto_layout();
        }
        let canvas = canvas.shared();

        let layouter = Rc::new(Layouter::new(inner.tree.clone(), inner.emitter.clone()));
        let renderer = Renderer::new(
            inner.tree.clone(),
            canvas.clone(),
            inner.emitter.clone(),
            layouter.clone(),
            inner.paint.clone(),
        );
        let watcher = Watcher::new(inner.emitter.clone(), renderer.clone());

        let mut controllers: Vec<Shared<dyn Control>> = Vec::new();
        let parent_subsystems = parent.and_then(|p| p.subsystems());
        let (selector, interaction, canvas_manager, hit_canvas_manager, start) =
            match (parent, parent_subsystems) {
                (Some(parent), Some(bound)) => {
                    *inner.parent.borrow_mut() = Rc::downgrade(&parent.inner);
                    (
                        bound.selector.lend(),
                        bound.interaction.lend(),
                        bound.canvas_manager.lend(),
                        bound.hit_canvas_manager.lend(),
                        parent.is_running(),
                    )
                }
                (Some(_), None) => return Err(Error::Uninitialized),
                (None, _) => {
                    let hit_canvas_manager = Rc::new(CanvasManager::new());
                    let selector = Rc::new(Selector::new(hit_canvas_manager.clone()));
                    let interaction = Rc::new(Interaction::new(selector.clone()));
                    let as_control: Rc<dyn Control> = interaction.clone();
                    controllers.push(Shared::Owned(as_control));
                    (
                        Shared::Owned(selector),
                        Shared::Owned(interaction),
                        Shared::Owned(Rc::new(CanvasManager::new())),
                        Shared::Owned(hit_canvas_manager),
                        config.start,
                    )
                }
            };
        interaction.add_target(inner.tree.clone());

        let as_control: Rc<dyn Control> = renderer.clone();
        controllers.push(Shared::Owned(as_control));
        let as_control: Rc<dyn Control> = watcher.clone();
        controllers.push(Shared::Owned(as_control));
        let as_control: Rc<dyn Control> = layouter.clone();
        controllers.push(Shared::Owned(as_control));

        canvas_manager.add(canvas.clone());

        {
            let size = canvas.borrow().size();
            let mut tree = inner.tree.borrow_mut();
            tree.owner = inner.weak.clone();
            tree.update_silent(inner.root, |root| {
                root.width = size.width;
                root.height = size.height;
                root.hittable = config.hittable;
                root.set_fill(config.fill.map(Into::into));
            });
        }

        *inner.subsystems.borrow_mut() = Some(Subsystems {
            canvas,
            renderer,
            watcher,
            layouter,
            selector,
            interaction,
            canvas_manager,
            hit_canvas_manager,
            controllers,
        });
        *inner.config.borrow_mut() = config;

        self.listen_events();

        log::debug!(target: "leafer", "{} initialized", inner.id);

        if start {
            let leafer = self.clone();
            let task = scheduler::defer(move || {
                leafer.inner.start_task.set(None);
                leafer.start();
            });
            inner.start_task.set(Some(task));
        }
        Ok(())
    }

    fn listen_events(&self) {
        let emitter = &self.inner.emitter;
        let mut ids = Vec::new();

        let weak = self.inner.weak.clone();
        ids.push(emitter.once(EventType::LayoutEnd, move |_| {
            if let Some(inner) = weak.upgrade() {
                Leafer::from_inner(inner).on_ready();
            }
        }));
        let weak = self.inner.weak.clone();
        ids.push(emitter.once(EventType::RenderStart, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.milestones.set(inner.milestones.get() | Milestones::CREATED);
            }
        }));
        let weak = self.inner.weak.clone();
        ids.push(emitter.once(EventType::RenderEnd, move |_| {
            if let Some(inner) = weak.upgrade() {
                Leafer::from_inner(inner).on_view_ready();
            }
        }));
        let weak = self.inner.weak.clone();
        ids.push(emitter.on(EventType::RenderNext, move |_| {
            if let Some(inner) = weak.upgrade() {
                Leafer::from_inner(inner).on_next_render();
            }
        }));
        let weak = self.inner.weak.clone();
        ids.push(emitter.on(EventType::WatchData, move |_| {
            if let Some(inner) = weak.upgrade() {
                Leafer::from_inner(inner).on_watch_data();
            }
        }));

        self.inner.listener_ids.borrow_mut().extend(ids);
    }

    fn subsystems(&self) -> Option<Subsystems> {
        self.inner.subsystems.borrow().clone()
    }

    // Lifecycle

    /// Start every subsystem and render once.
    ///
    /// Emits [`EventType::Start`] the first time and [`EventType::Restart`]
    /// afterwards. Does nothing while running, before init or after destroy.
    pub fn start(&self) {
        let inner = &self.inner;
        if let Some(task) = inner.start_task.take() {
            scheduler::cancel(task);
        }
        if inner.running.get() || inner.destroyed.get() {
            return;
        }
        let Some(subsystems) = self.subsystems() else {
            return;
        };

        let kind = if inner.started.replace(true) {
            EventType::Restart
        } else {
            EventType::Start
        };
        log::info!(target: "leafer", "{} {:?}", inner.id, kind);
        inner.emitter.emit_type(kind);

        for controller in &subsystems.controllers {
            if let Err(e) = controller.start() {
                log::warn!(target: "leafer", "{} failed to start {}: {}", inner.id, controller.name(), e);
            }
        }
        inner.running.set(true);

        if inner.is_app {
            for child in self.children() {
                child.start();
            }
        } else {
            subsystems.renderer.render();
        }
    }

    /// Stop every subsystem. Does nothing unless running.
    pub fn stop(&self) {
        let inner = &self.inner;
        if let Some(task) = inner.start_task.take() {
            scheduler::cancel(task);
        }
        if !inner.running.get() {
            return;
        }
        let Some(subsystems) = self.subsystems() else {
            return;
        };

        for controller in &subsystems.controllers {
            if let Err(e) = controller.stop() {
                log::warn!(target: "leafer", "{} failed to stop {}: {}", inner.id, controller.name(), e);
            }
        }
        inner.running.set(false);
        if inner.is_app {
            for child in self.children() {
                child.stop();
            }
        }
        log::info!(target: "leafer", "{} stopped", inner.id);
        inner.emitter.emit_type(EventType::Stop);
    }

    /// Tear the controller down on the next scheduler round.
    ///
    /// Statements that follow the call in the same round still see a live
    /// controller. Calling it again, before or after the teardown ran, has
    /// no further effect. Failures during teardown are logged, never
    /// returned.
    pub fn destroy(&self) {
        let leafer = self.clone();
        scheduler::defer(move || leafer.teardown());
    }

    fn teardown(&self) {
        let inner = &self.inner;
        if inner.destroyed.replace(true) {
            return;
        }
        log::debug!(target: "leafer", "{} destroying", inner.id);

        self.stop();
        inner.emitter.emit(&Event::new(EventType::End));
        inner.emitter.off_many(inner.listener_ids.take());

        if inner.is_app {
            for child in inner.children.take() {
                child.teardown();
            }
        }

        let subsystems = inner.subsystems.take();
        if let Some(subsystems) = subsystems {
            let has_parent = inner.parent.borrow().upgrade().is_some();

            for controller in &subsystems.controllers {
                if !controller.is_owned() {
                    continue;
                }
                if let Err(e) = controller.destroy() {
                    log::error!(target: "leafer", "{} failed to destroy {}: {}", inner.id, controller.name(), e);
                }
            }

            subsystems.interaction.remove_target(&inner.tree);
            if !subsystems.canvas_manager.is_owned() {
                subsystems.canvas_manager.remove(&subsystems.canvas);
            }
            if !has_parent {
                if subsystems.selector.is_owned() {
                    subsystems.selector.destroy();
                }
                if subsystems.hit_canvas_manager.is_owned() {
                    subsystems.hit_canvas_manager.destroy();
                }
                if subsystems.canvas_manager.is_owned() {
                    subsystems.canvas_manager.destroy();
                }
            }

            match subsystems.canvas.try_borrow_mut() {
                Ok(mut canvas) => canvas.destroy(),
                Err(_) => log::error!(target: "leafer", "{} failed to destroy canvas: {}", inner.id, Error::Busy("canvas")),
            }

            if let Some(parent) = inner.parent.borrow().upgrade() {
                parent.children.borrow_mut().retain(|c| !Rc::ptr_eq(&c.inner, inner));
                if let Some(parent_subsystems) = parent.subsystems.borrow().as_ref() {
                    parent_subsystems.renderer.remove_layer(&subsystems.canvas);
                }
            }
        }

        match inner.tree.try_borrow_mut() {
            Ok(mut tree) => {
                tree.clear();
                tree.owner = Weak::new();
            }
            Err(_) => log::error!(target: "leafer", "{} failed to clear tree: {}", inner.id, Error::Busy("tree")),
        }

        inner.ready_waits.borrow_mut().clear();
        inner.view_ready_waits.borrow_mut().clear();
        inner.view_completed_waits.borrow_mut().clear();
        inner.next_render_waits.borrow_mut().clear();

        scheduler::defer(|| {
            ImageManager::clear_recycled();
        });
        log::info!(target: "leafer", "{} destroyed", inner.id);
    }

    // Milestone handlers

    fn on_ready(&self) {
        let inner = &self.inner;
        if inner.milestones.get().contains(Milestones::READY) {
            return;
        }
        inner.milestones.set(inner.milestones.get() | Milestones::READY);
        inner.emitter.emit_type(EventType::BeforeReady);
        inner.emitter.emit_type(EventType::Ready);
        inner.emitter.emit_type(EventType::AfterReady);
        drain(&inner.ready_waits);
    }

    fn on_view_ready(&self) {
        let inner = &self.inner;
        if inner.milestones.get().contains(Milestones::VIEW_READY) {
            return;
        }
        inner.milestones.set(inner.milestones.get() | Milestones::VIEW_READY);
        log::debug!(target: "leafer", "{} view ready", inner.id);
        inner.emitter.emit_type(EventType::ViewReady);
        drain(&inner.view_ready_waits);
    }

    fn on_next_render(&self) {
        let inner = &self.inner;
        if !self.view_ready() {
            return;
        }
        let waits = inner.next_render_waits.take();
        for (_, callback) in waits {
            callback();
        }

        let image_ready = self.image_ready();
        if image_ready && !self.view_completed() {
            self.check_view_completed(true);
        }
        if !image_ready {
            inner.milestones.set(inner.milestones.get() - Milestones::VIEW_COMPLETED);
        }
    }

    fn check_view_completed(&self, emit: bool) {
        let inner = &self.inner;
        if !self.image_ready() {
            return;
        }
        if emit {
            log::debug!(target: "leafer", "{} view completed", inner.id);
            inner.emitter.emit_type(EventType::ViewCompleted);
        }
        inner.milestones.set(inner.milestones.get() | Milestones::VIEW_COMPLETED);
        drain(&inner.view_completed_waits);
    }

    fn on_watch_data(&self) {
        let Some(subsystems) = self.subsystems() else {
            return;
        };
        if subsystems.watcher.children_changed() {
            let interaction = subsystems.interaction.rc().clone();
            self.next_render(move || interaction.update_cursor());
        }
    }

    // Waits

    /// Run `f` once the first layout pass finished, or right away if it has.
    pub fn wait_ready(&self, f: impl FnOnce() + 'static) {
        if self.ready() {
            f();
        } else {
            self.inner.ready_waits.borrow_mut().push(Box::new(f));
        }
    }

    /// Run `f` once the first render pass finished, or right away if it has.
    pub fn wait_view_ready(&self, f: impl FnOnce() + 'static) {
        if self.view_ready() {
            f();
        } else {
            self.inner.view_ready_waits.borrow_mut().push(Box::new(f));
        }
    }

    /// Run `f` once a render pass finishes with every image loaded.
    ///
    /// If the view is already complete `f` runs right away; otherwise a
    /// stopped controller is started so that a pass eventually happens.
    /// A destroyed controller drops `f` without running it.
    pub fn wait_view_completed(&self, f: impl FnOnce() + 'static) {
        if self.inner.destroyed.get() {
            return;
        }
        self.inner.view_completed_waits.borrow_mut().push(Box::new(f));
        if self.view_completed() {
            self.check_view_completed(false);
        } else if !self.is_running() {
            self.start();
        }
    }

    /// Run `f` after the next completed render pass.
    pub fn next_render(&self, f: impl FnOnce() + 'static) -> WaitId {
        let id = WaitId(self.inner.next_wait_id.get());
        self.inner.next_wait_id.set(id.0 + 1);
        self.inner.next_render_waits.borrow_mut().push((id, Box::new(f)));
        id
    }

    /// Remove a [`Leafer::next_render`] callback that has not run yet.
    pub fn off_next_render(&self, id: WaitId) -> bool {
        let mut waits = self.inner.next_render_waits.borrow_mut();
        match waits.iter().position(|(wait, _)| *wait == id) {
            Some(index) => {
                waits.remove(index);
                true
            }
            None => false,
        }
    }

    // Size

    /// Resize to an explicit size. Leaves auto-layout mode.
    pub fn resize(&self, size: ScreenSize) -> Result<()> {
        {
            let mut config = self.inner.config.borrow_mut();
            config.width = Some(size.width);
            config.height = Some(size.height);
            config.pixel_ratio = size.pixel_ratio;
        }
        if let Some(subsystems) = self.subsystems() {
            subsystems.canvas.borrow_mut().stop_auto_layout();
        }
        self.do_resize(size)
    }

    pub fn set_width(&self, width: f32) -> Result<()> {
        self.inner.config.borrow_mut().width = Some(width);
        self.change_canvas_size(|size| size.width = width)
    }

    pub fn set_height(&self, height: f32) -> Result<()> {
        self.inner.config.borrow_mut().height = Some(height);
        self.change_canvas_size(|size| size.height = height)
    }

    pub fn set_pixel_ratio(&self, pixel_ratio: f32) -> Result<()> {
        self.inner.config.borrow_mut().pixel_ratio = pixel_ratio;
        self.change_canvas_size(|size| size.pixel_ratio = pixel_ratio)
    }

    fn change_canvas_size(&self, apply: impl FnOnce(&mut ScreenSize)) -> Result<()> {
        let subsystems = self.live_subsystems()?;
        let mut size = subsystems.canvas.borrow().size();
        apply(&mut size);
        subsystems.canvas.borrow_mut().stop_auto_layout();
        self.do_resize(size)
    }

    /// The host view changed its client size. Only followed in auto-layout
    /// mode; an explicit size wins.
    pub fn view_resized(&self, width: f32, height: f32) -> Result<()> {
        let subsystems = self.live_subsystems()?;
        let size = {
            let canvas = subsystems.canvas.borrow();
            if !canvas.is_auto_layout() {
                return Ok(());
            }
            ScreenSize::new(width, height, canvas.pixel_ratio())
        };
        self.inner.config.borrow_mut().view_size = Size::new(width, height);
        self.do_resize(size)
    }

    fn do_resize(&self, size: ScreenSize) -> Result<()> {
        let subsystems = self.live_subsystems()?;
        let old = {
            let mut canvas = subsystems.canvas.try_borrow_mut().map_err(|_| Error::Busy("canvas"))?;
            if canvas.is_same_size(&size) {
                return Ok(());
            }
            let old = canvas.size();
            canvas.resize(size)?;
            old
        };
        self.on_resize(ResizeEvent { size, old }, &subsystems);
        Ok(())
    }

    fn on_resize(&self, event: ResizeEvent, subsystems: &Subsystems) {
        let inner = &self.inner;
        log::debug!(
            target: "leafer",
            "{} resized {}x{} -> {}x{}",
            inner.id,
            event.old.width,
            event.old.height,
            event.size.width,
            event.size.height
        );
        inner.emitter.emit(&Event::resize(event));
        inner.tree.borrow_mut().update_silent(inner.root, |root| {
            root.width = event.size.width;
            root.height = event.size.height;
        });
        subsystems.renderer.on_resize();

        let canvas_manager = subsystems.canvas_manager.rc().clone();
        scheduler::defer(move || canvas_manager.clear_recycled());
    }

    pub fn size(&self) -> Option<ScreenSize> {
        self.canvas().map(|c| c.borrow().size())
    }

    // Attributes

    /// Change the background fill. A surface with a native background takes
    /// it directly; otherwise the whole view is repainted.
    pub fn set_fill(&self, fill: Option<Color>) {
        self.inner.config.borrow_mut().fill = fill;
        self.inner
            .tree
            .borrow_mut()
            .update_silent(self.inner.root, |root| root.set_fill(fill.map(Into::into)));

        let Some(subsystems) = self.subsystems() else {
            return;
        };
        let native = subsystems.canvas.borrow().allow_background_color();
        if native {
            subsystems.canvas.borrow_mut().set_background_color(fill);
        } else {
            self.force_full_render();
        }
    }

    pub fn fill(&self) -> Option<Color> {
        self.inner.config.borrow().fill
    }

    pub fn set_hittable(&self, hittable: bool) {
        self.inner.config.borrow_mut().hittable = hittable;
        self.inner
            .tree
            .borrow_mut()
            .update_silent(self.inner.root, |root| root.hittable = hittable);
        if let Some(subsystems) = self.subsystems() {
            subsystems.canvas.borrow_mut().hittable = hittable;
        }
    }

    // Rendering

    /// Repaint `bounds`, or the whole view, on the next pass. The pass is
    /// only requested once the view is ready.
    pub fn force_render(&self, bounds: Option<Bounds>) {
        let Some(subsystems) = self.subsystems() else {
            return;
        };
        let bounds = bounds.unwrap_or_else(|| subsystems.canvas.borrow().bounds());
        subsystems.renderer.add_block(bounds);
        if self.view_ready() {
            subsystems.renderer.update();
        }
    }

    pub fn force_full_render(&self) {
        self.force_render(None);
    }

    /// Run a layout pass now if anything changed.
    pub fn update_layout(&self) {
        if let Some(subsystems) = self.subsystems() {
            subsystems.layouter.layout_now();
        }
    }

    pub fn lock_layout(&self) {
        self.update_layout();
        if let Some(subsystems) = self.subsystems() {
            subsystems.layouter.lock();
        }
    }

    pub fn unlock_layout(&self) {
        if let Some(subsystems) = self.subsystems() {
            subsystems.layouter.unlock();
        }
        self.update_layout();
    }

    pub fn is_layout_locked(&self) -> bool {
        self.subsystems()
            .map_or(true, |s| s.layouter.is_locked() || !s.layouter.is_running())
    }

    /// Paint `node` of this controller onto `canvas`. The root of an app
    /// paints its child scenes with their backgrounds.
    pub(crate) fn render_into(&self, node: NodeId, canvas: &mut Canvas, options: &RenderOptions) {
        if self.inner.is_app && node == self.inner.root {
            for child in self.children() {
                child.render_scene_into(canvas, options);
            }
            return;
        }
        let tree = self.inner.tree.borrow();
        render_node(&tree, node, canvas, options, self.inner.paint.as_ref());
    }

    fn render_scene_into(&self, canvas: &mut Canvas, options: &RenderOptions) {
        let Some(subsystems) = self.subsystems() else {
            return;
        };
        subsystems.layouter.layout_now();
        let (bounds, native) = {
            let own = subsystems.canvas.borrow();
            (own.bounds(), own.allow_background_color())
        };
        if let (Some(fill), false) = (self.fill(), native) {
            canvas.set_world(options.matrix.unwrap_or_default());
            canvas.fill_bounds(&bounds, fill);
        }
        self.render_into(self.inner.root, canvas, options);
    }

    // Pointer

    /// Pointer moved to `point` in world units. Returns the hovered node.
    pub fn pointer_move(&self, point: Point) -> Option<NodeRef> {
        let interaction = self.subsystems()?.interaction;
        interaction.pointer_move(point)
    }

    pub fn pointer_leave(&self) {
        if let Some(subsystems) = self.subsystems() {
            subsystems.interaction.pointer_leave();
        }
    }

    pub fn update_cursor(&self) {
        if let Some(subsystems) = self.subsystems() {
            subsystems.interaction.update_cursor();
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.subsystems()
            .map_or(Cursor::Default, |s| s.interaction.cursor())
    }

    // Events

    pub fn on(&self, kind: EventType, handler: impl Fn(&Event) + 'static) -> ListenerId {
        self.inner.emitter.on(kind, handler)
    }

    pub fn once(&self, kind: EventType, handler: impl Fn(&Event) + 'static) -> ListenerId {
        self.inner.emitter.once(kind, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.emitter.off(id)
    }

    // Accessors

    pub fn id(&self) -> LeaferId {
        self.inner.id
    }

    pub fn is_app(&self) -> bool {
        self.inner.is_app
    }

    pub fn config(&self) -> LeaferConfig {
        self.inner.config.borrow().clone()
    }

    /// The scene root.
    pub fn root(&self) -> NodeRef {
        NodeRef::new(self.inner.tree.clone(), self.inner.root)
    }

    /// Append a node under the scene root.
    pub fn add(&self, data: NodeData) -> Result<NodeRef> {
        self.root().add(data)
    }

    pub fn parent(&self) -> Option<Leafer> {
        self.inner.parent.borrow().upgrade().map(Leafer::from_inner)
    }

    pub fn children(&self) -> Vec<Leafer> {
        self.inner.children.borrow().clone()
    }

    pub(crate) fn push_child(&self, child: Leafer) {
        self.inner.children.borrow_mut().push(child);
    }

    pub fn canvas(&self) -> Option<SharedCanvas> {
        self.subsystems().map(|s| s.canvas)
    }

    pub fn renderer(&self) -> Option<Rc<Renderer>> {
        self.subsystems().map(|s| s.renderer)
    }

    pub fn watcher(&self) -> Option<Rc<Watcher>> {
        self.subsystems().map(|s| s.watcher)
    }

    pub fn layouter(&self) -> Option<Rc<Layouter>> {
        self.subsystems().map(|s| s.layouter)
    }

    pub fn interaction(&self) -> Option<Rc<Interaction>> {
        self.subsystems().map(|s| s.interaction.rc().clone())
    }

    pub fn selector(&self) -> Option<Rc<Selector>> {
        self.subsystems().map(|s| s.selector.rc().clone())
    }

    pub fn canvas_manager(&self) -> Option<Rc<CanvasManager>> {
        self.subsystems().map(|s| s.canvas_manager.rc().clone())
    }

    pub fn hit_canvas_manager(&self) -> Option<Rc<CanvasManager>> {
        self.subsystems().map(|s| s.hit_canvas_manager.rc().clone())
    }

    /// Whether this controller created its interaction rather than binding
    /// to a parent's.
    pub fn owns_interaction(&self) -> bool {
        self.subsystems().is_some_and(|s| s.interaction.is_owned())
    }

    fn live_subsystems(&self) -> Result<Subsystems> {
        if self.inner.destroyed.get() {
            return Err(Error::Destroyed);
        }
        self.subsystems().ok_or(Error::Uninitialized)
    }

    // State

    pub fn is_initialized(&self) -> bool {
        self.inner.subsystems.borrow().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub fn milestones(&self) -> Milestones {
        self.inner.milestones.get()
    }

    pub fn created(&self) -> bool {
        self.milestones().contains(Milestones::CREATED)
    }

    pub fn ready(&self) -> bool {
        self.milestones().contains(Milestones::READY)
    }

    pub fn view_ready(&self) -> bool {
        self.milestones().contains(Milestones::VIEW_READY)
    }

    pub fn view_completed(&self) -> bool {
        self.milestones().contains(Milestones::VIEW_COMPLETED)
    }

    /// View ready and no image in the scene still loading. An app also
    /// waits for its child scenes.
    pub fn image_ready(&self) -> bool {
        if !self.view_ready() || !self.inner.tree.borrow().images_resolved() {
            return false;
        }
        self.children()
            .iter()
            .all(|child| child.inner.tree.borrow().images_resolved())
    }
}

/// Run and clear a callback list. Callbacks added while draining run too.
fn drain(waits: &RefCell<Vec<Callback>>) {
    loop {
        let batch = waits.take();
        if batch.is_empty() {
            return;
        }
        for callback in batch {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::Color;

    fn leafer() -> Leafer {
        Leafer::new(LeaferConfig::new().size(100.0, 100.0)).unwrap()
    }

    #[test]
    fn test_init_is_idempotent() {
        let leafer = leafer();
        let canvas = leafer.canvas().unwrap();
        leafer.init(LeaferConfig::new().size(10.0, 10.0)).unwrap();
        assert!(Rc::ptr_eq(&canvas, &leafer.canvas().unwrap()));
        assert_eq!(leafer.size(), Some(ScreenSize::new(100.0, 100.0, 1.0)));
    }

    #[test]
    fn test_start_is_deferred() {
        let leafer = leafer();
        assert!(!leafer.is_running());
        scheduler::run_pending();
        assert!(leafer.is_running());
        assert!(leafer.created() && leafer.ready() && leafer.view_ready());
    }

    #[test]
    fn test_uninitialized_controller_ignores_start() {
        let leafer = Leafer::empty();
        leafer.start();
        assert!(!leafer.is_running());
        assert!(matches!(leafer.set_width(10.0), Err(Error::Uninitialized)));
    }

    #[test]
    fn test_start_then_restart_events() {
        let leafer = Leafer::new(LeaferConfig::new().size(10.0, 10.0).start(false)).unwrap();
        let kinds = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventType::Start, EventType::Restart, EventType::Stop] {
            let kinds = kinds.clone();
            leafer.on(kind, move |e| kinds.borrow_mut().push(e.kind));
        }
        leafer.start();
        leafer.start();
        leafer.stop();
        leafer.stop();
        leafer.start();
        assert_eq!(
            *kinds.borrow(),
            vec![EventType::Start, EventType::Stop, EventType::Restart]
        );
    }

    #[test]
    fn test_resize_emits_and_skips_same_size() {
        let leafer = leafer();
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = events.clone();
        leafer.on(EventType::Resize, move |e| log.borrow_mut().push(e.resize));

        leafer.resize(ScreenSize::new(100.0, 100.0, 1.0)).unwrap();
        assert!(events.borrow().is_empty());

        leafer.set_width(200.0).unwrap();
        let event = events.borrow()[0].unwrap();
        assert_eq!(event.old, ScreenSize::new(100.0, 100.0, 1.0));
        assert_eq!(event.size, ScreenSize::new(200.0, 100.0, 1.0));
        assert_eq!(leafer.root().data().unwrap().width, 200.0);
    }

    #[test]
    fn test_explicit_size_leaves_auto_layout() {
        let leafer = Leafer::new(LeaferConfig::new().view_size(300.0, 200.0)).unwrap();
        assert_eq!(leafer.size(), Some(ScreenSize::new(300.0, 200.0, 1.0)));

        leafer.view_resized(400.0, 250.0).unwrap();
        assert_eq!(leafer.size(), Some(ScreenSize::new(400.0, 250.0, 1.0)));

        leafer.set_height(50.0).unwrap();
        leafer.view_resized(500.0, 500.0).unwrap();
        assert_eq!(leafer.size(), Some(ScreenSize::new(400.0, 50.0, 1.0)));
    }

    #[test]
    fn test_pixel_ratio_leaves_auto_layout() {
        let leafer = Leafer::new(LeaferConfig::new().view_size(300.0, 200.0)).unwrap();
        leafer.set_pixel_ratio(2.0).unwrap();
        assert_eq!(leafer.size(), Some(ScreenSize::new(300.0, 200.0, 2.0)));
        assert!(!leafer.canvas().unwrap().borrow().is_auto_layout());

        leafer.view_resized(400.0, 250.0).unwrap();
        assert_eq!(leafer.size(), Some(ScreenSize::new(300.0, 200.0, 2.0)));
    }

    #[test]
    fn test_fill_uses_native_background_when_allowed() {
        let leafer = Leafer::new(
            LeaferConfig::new()
                .size(10.0, 10.0)
                .allow_background_color(true),
        )
        .unwrap();
        leafer.set_fill(Some(Color::BLACK));
        scheduler::run_until_idle();
        let canvas = leafer.canvas().unwrap();
        assert_eq!(canvas.borrow().background_color(), Some(Color::BLACK));
        assert_eq!(canvas.borrow().pixel(5, 5), Some(Color::TRANSPARENT));
    }

    #[test]
    fn test_fill_repaints_surface() {
        let leafer = leafer();
        scheduler::run_until_idle();
        leafer.set_fill(Some(Color::WHITE));
        scheduler::run_until_idle();
        assert_eq!(leafer.canvas().unwrap().borrow().pixel(50, 50), Some(Color::WHITE));
    }

    #[test]
    fn test_next_render_can_be_detached() {
        let leafer = leafer();
        let fired = Rc::new(Cell::new(0));
        let a = fired.clone();
        let b = fired.clone();
        leafer.next_render(move || a.set(a.get() + 1));
        let id = leafer.next_render(move || b.set(b.get() + 10));
        assert!(leafer.off_next_render(id));
        assert!(!leafer.off_next_render(id));

        scheduler::run_until_idle();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_lock_layout_defers_layout() {
        let leafer = leafer();
        scheduler::run_until_idle();
        leafer.lock_layout();
        let rect = leafer.add(NodeData::rect().size(10.0, 10.0)).unwrap();
        scheduler::run_until_idle();
        assert!(rect.layout().is_none());

        leafer.unlock_layout();
        assert!(rect.layout().is_some());
    }
}
