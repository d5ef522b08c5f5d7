use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use leafer::image_manager::{ImageManager, ImageSource};
use leafer::prelude::*;

const SQUARE_SVG: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="8">
    <rect width="8" height="8" fill="blue"/></svg>"#;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn record(leafer: &Leafer, kinds: &[EventType]) -> Rc<RefCell<Vec<EventType>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    for kind in kinds {
        let seen = seen.clone();
        leafer.on(*kind, move |e| seen.borrow_mut().push(e.kind));
    }
    seen
}

#[test]
fn test_milestones_fire_once_in_order() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(64.0, 64.0)).unwrap();
    leafer
        .add(NodeData::rect().size(10.0, 10.0).with_fill(Color::BLACK))
        .unwrap();
    let seen = record(
        &leafer,
        &[
            EventType::Start,
            EventType::BeforeReady,
            EventType::Ready,
            EventType::AfterReady,
            EventType::ViewReady,
            EventType::ViewCompleted,
        ],
    );
    assert!(leafer.milestones().is_empty());

    run_until_idle();
    assert_eq!(
        *seen.borrow(),
        vec![
            EventType::Start,
            EventType::BeforeReady,
            EventType::Ready,
            EventType::AfterReady,
            EventType::ViewReady,
            EventType::ViewCompleted,
        ]
    );
    assert!(leafer.created() && leafer.ready() && leafer.view_ready() && leafer.view_completed());

    // Later passes do not repeat the one-shot milestones.
    leafer.force_full_render();
    run_until_idle();
    assert_eq!(seen.borrow().len(), 6);
    assert!(leafer.renderer().unwrap().renders() >= 2);
}

#[test]
fn test_waits_after_milestone_run_synchronously() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0)).unwrap();
    run_until_idle();

    let order = Rc::new(RefCell::new(Vec::new()));
    let log = order.clone();
    leafer::scheduler::defer(move || log.borrow_mut().push("deferred"));
    let log = order.clone();
    leafer.wait_ready(move || log.borrow_mut().push("ready"));
    let log = order.clone();
    leafer.wait_view_ready(move || log.borrow_mut().push("view ready"));

    assert_eq!(*order.borrow(), vec!["ready", "view ready"]);
    run_until_idle();
    assert_eq!(*order.borrow(), vec!["ready", "view ready", "deferred"]);
}

#[test]
fn test_waits_before_milestone_run_in_registration_order() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0)).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    for name in ["first", "second"] {
        let log = order.clone();
        leafer.wait_ready(move || log.borrow_mut().push(name));
    }
    let log = order.clone();
    leafer.wait_view_ready(move || log.borrow_mut().push("view"));
    assert!(order.borrow().is_empty());

    run_until_idle();
    assert_eq!(*order.borrow(), vec!["first", "second", "view"]);
}

#[test]
fn test_wait_view_completed_starts_stopped_controller() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0).start(false)).unwrap();
    run_until_idle();
    assert!(!leafer.is_running());

    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    leafer.wait_view_completed(move || flag.set(true));
    assert!(leafer.is_running());
    assert!(fired.get());
}

#[test]
fn test_wait_view_completed_rearms_after_completion() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0)).unwrap();
    run_until_idle();
    let seen = record(&leafer, &[EventType::ViewCompleted]);

    let count = Rc::new(Cell::new(0));
    for _ in 0..2 {
        let count = count.clone();
        leafer.wait_view_completed(move || count.set(count.get() + 1));
    }
    assert_eq!(count.get(), 2);
    // Re-running the check does not announce completion again.
    assert!(seen.borrow().is_empty());
}

#[test]
fn test_pending_image_toggles_view_completed() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0)).unwrap();
    let rect = leafer
        .add(NodeData::rect().size(16.0, 16.0).with_fill(Color::WHITE))
        .unwrap();
    run_until_idle();
    assert!(leafer.view_completed());
    let seen = record(&leafer, &[EventType::ViewCompleted]);

    let image = ImageManager::get(ImageSource::SvgBytes(Arc::from(SQUARE_SVG)));
    rect.update(|d| d.add_fill(Paint::image(image.clone())));
    // A pass that runs before the image decodes sees it pending.
    leafer.renderer().unwrap().render();
    assert!(!image.is_complete());
    assert!(!leafer.image_ready());
    assert!(!leafer.view_completed());
    assert!(leafer.view_ready());

    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    leafer.wait_view_completed(move || flag.set(true));
    assert!(!fired.get());

    run_until_idle();
    assert!(image.is_ready());
    assert!(leafer.view_completed());
    assert!(fired.get());
    assert_eq!(*seen.borrow(), vec![EventType::ViewCompleted]);
}

#[test]
fn test_destroy_is_deferred_and_runs_once() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0)).unwrap();
    run_until_idle();
    let canvas = leafer.canvas().unwrap();
    let ends = record(&leafer, &[EventType::End, EventType::Stop]);

    leafer.destroy();
    leafer.destroy();
    // Still usable for the rest of this round
    assert!(!leafer.is_destroyed());
    assert!(leafer.is_running());
    assert_eq!(leafer.size(), Some(ScreenSize::new(32.0, 32.0, 1.0)));

    run_until_idle();
    assert!(leafer.is_destroyed());
    assert!(!leafer.is_running());
    assert!(canvas.borrow().is_destroyed());
    assert!(leafer.canvas().is_none());
    assert_eq!(*ends.borrow(), vec![EventType::Stop, EventType::End]);

    leafer.destroy();
    run_until_idle();
    assert_eq!(ends.borrow().len(), 2);
    assert!(matches!(leafer.set_width(10.0), Err(Error::Destroyed)));
}

#[test]
fn test_destroyed_controller_ignores_start() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0)).unwrap();
    leafer.destroy();
    run_until_idle();
    assert!(leafer.is_destroyed());

    let seen = record(&leafer, &[EventType::Start, EventType::Restart]);
    leafer.start();
    assert!(!leafer.is_running());
    assert!(seen.borrow().is_empty());
    assert!(matches!(leafer.init(LeaferConfig::new()), Err(Error::Destroyed)));
}

#[test]
fn test_destroyed_controller_drops_view_completed_waits() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0).start(false)).unwrap();
    leafer.destroy();
    run_until_idle();

    let token = Rc::new(());
    let held = token.clone();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    leafer.wait_view_completed(move || {
        let _held = held;
        flag.set(true);
    });
    run_until_idle();

    assert!(!ran.get());
    assert!(!leafer.is_running());
    assert_eq!(Rc::strong_count(&token), 1);
}

#[test]
fn test_node_loses_controller_when_removed() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(32.0, 32.0)).unwrap();
    let group = leafer.add(NodeData::group()).unwrap();
    let rect = group.add(NodeData::rect().size(4.0, 4.0)).unwrap();
    assert_eq!(rect.leafer(), Some(leafer.clone()));

    group.remove();
    assert!(rect.leafer().is_none());
    assert!(matches!(rect.add(NodeData::rect()), Err(Error::StaleNode)));
}

#[test]
fn test_changes_repaint_only_after_watch() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(40.0, 40.0)).unwrap();
    let rect = leafer
        .add(NodeData::rect().size(10.0, 10.0).with_fill(Color::BLACK))
        .unwrap();
    run_until_idle();
    let canvas = leafer.canvas().unwrap();
    assert_eq!(canvas.borrow().pixel(5, 5), Some(Color::BLACK));

    rect.update(|d| {
        d.x = 20.0;
        d.y = 20.0;
    });
    assert_eq!(canvas.borrow().pixel(5, 5), Some(Color::BLACK));

    run_until_idle();
    assert_eq!(canvas.borrow().pixel(5, 5), Some(Color::TRANSPARENT));
    assert_eq!(canvas.borrow().pixel(25, 25), Some(Color::BLACK));
}

#[test]
fn test_hover_cursor_follows_insertions() {
    init();
    let leafer = Leafer::new(LeaferConfig::new().size(40.0, 40.0)).unwrap();
    run_until_idle();
    assert!(leafer.pointer_move(Point::new(5.0, 5.0)).is_none());

    leafer
        .add(NodeData::rect().size(10.0, 10.0).with_cursor(Cursor::Pointer))
        .unwrap();
    run_until_idle();
    assert_eq!(leafer.cursor(), Cursor::Pointer);

    leafer.pointer_leave();
    assert_eq!(leafer.cursor(), Cursor::Default);
}
