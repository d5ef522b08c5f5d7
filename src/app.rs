//! Multi-scene container.
//!
//! An [`App`] is a controller whose own scene stays empty. It composites
//! the surfaces of its child controllers, which bind to its interaction and
//! canvas managers instead of creating their own, and it starts, stops and
//! destroys them together with itself.

use std::ops::Deref;

use crate::config::LeaferConfig;
use crate::error::{Error, Result};
use crate::events::EventType;
use crate::leafer::Leafer;

#[derive(Clone, Debug, PartialEq)]
pub struct App {
    leafer: Leafer,
}

impl App {
    pub fn new(config: LeaferConfig) -> Result<Self> {
        let leafer = Leafer::create(true);
        leafer.init(config)?;
        Ok(Self { leafer })
    }

    /// Create a child scene stacked above the existing ones.
    ///
    /// Unset dimensions default to the app's size. The child starts with
    /// the app: right away if the app is running, otherwise when it starts.
    pub fn add_leafer(&self, config: LeaferConfig) -> Result<Leafer> {
        if self.leafer.is_destroyed() {
            return Err(Error::Destroyed);
        }
        let size = self.leafer.size().ok_or(Error::Uninitialized)?;
        let mut config = config;
        if config.width.is_none() {
            config.width = Some(size.width);
        }
        if config.height.is_none() {
            config.height = Some(size.height);
        }
        config.pixel_ratio = size.pixel_ratio;

        let child = Leafer::empty();
        child.init_with_parent(config, Some(&self.leafer))?;

        let (Some(renderer), Some(layer)) = (self.leafer.renderer(), child.canvas()) else {
            return Err(Error::Uninitialized);
        };
        renderer.add_layer(layer);

        // Recomposite whenever the child repaints its layer.
        let weak = std::rc::Rc::downgrade(&renderer);
        child.on(EventType::RenderEnd, move |_| {
            if let Some(renderer) = weak.upgrade() {
                renderer.force_full();
                renderer.update();
            }
        });

        self.leafer.push_child(child.clone());
        log::debug!(target: "leafer", "{} added {}", self.leafer.id(), child.id());
        Ok(child)
    }

    pub fn leafer(&self) -> &Leafer {
        &self.leafer
    }
}

impl Deref for App {
    type Target = Leafer;

    fn deref(&self) -> &Leafer {
        &self.leafer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::node::NodeData;
    use crate::paint::Color;
    use crate::scheduler;
    use std::rc::Rc;

    fn app() -> App {
        App::new(LeaferConfig::new().size(100.0, 100.0)).unwrap()
    }

    #[test]
    fn test_children_share_managers() {
        let app = app();
        let child = app.add_leafer(LeaferConfig::new()).unwrap();

        assert!(app.owns_interaction());
        assert!(!child.owns_interaction());
        assert!(Rc::ptr_eq(&app.interaction().unwrap(), &child.interaction().unwrap()));
        assert!(Rc::ptr_eq(
            &app.canvas_manager().unwrap(),
            &child.canvas_manager().unwrap()
        ));
        assert_eq!(child.parent(), Some(app.leafer().clone()));
        assert_eq!(child.size(), app.size());
    }

    #[test]
    fn test_children_start_with_app() {
        let app = app();
        let child = app.add_leafer(LeaferConfig::new()).unwrap();
        assert!(!child.is_running());

        scheduler::run_until_idle();
        assert!(app.is_running());
        assert!(child.is_running());
        assert!(child.view_ready());

        app.stop();
        assert!(!child.is_running());
    }

    #[test]
    fn test_app_composites_children() {
        let app = app();
        let back = app.add_leafer(LeaferConfig::new()).unwrap();
        let front = app.add_leafer(LeaferConfig::new()).unwrap();
        back.add(NodeData::rect().size(50.0, 50.0).with_fill(Color::BLACK))
            .unwrap();
        front
            .add(NodeData::rect().at(25.0, 25.0).size(50.0, 50.0).with_fill(Color::WHITE))
            .unwrap();
        scheduler::run_until_idle();

        let canvas = app.canvas().unwrap();
        let canvas = canvas.borrow();
        assert_eq!(canvas.pixel(10, 10), Some(Color::BLACK));
        assert_eq!(canvas.pixel(40, 40), Some(Color::WHITE));
        assert_eq!(canvas.pixel(90, 10), Some(Color::TRANSPARENT));
    }

    #[test]
    fn test_pointer_reaches_topmost_child() {
        let app = app();
        let back = app.add_leafer(LeaferConfig::new()).unwrap();
        let front = app.add_leafer(LeaferConfig::new()).unwrap();
        let under = back.add(NodeData::rect().size(50.0, 50.0)).unwrap();
        let over = front.add(NodeData::rect().at(25.0, 25.0).size(50.0, 50.0)).unwrap();
        scheduler::run_until_idle();

        assert_eq!(app.pointer_move(Point::new(40.0, 40.0)), Some(over));
        assert_eq!(app.pointer_move(Point::new(10.0, 10.0)), Some(under));
    }

    #[test]
    fn test_destroy_cascades_to_children() {
        let app = app();
        let child = app.add_leafer(LeaferConfig::new()).unwrap();
        scheduler::run_until_idle();

        app.destroy();
        scheduler::run_until_idle();
        assert!(app.is_destroyed());
        assert!(child.is_destroyed());
        assert!(app.children().is_empty());
        assert!(matches!(app.add_leafer(LeaferConfig::new()), Err(Error::Destroyed)));
    }

    #[test]
    fn test_child_destroy_keeps_shared_managers() {
        let app = app();
        let child = app.add_leafer(LeaferConfig::new()).unwrap();
        let manager = app.canvas_manager().unwrap();
        scheduler::run_until_idle();

        child.destroy();
        scheduler::run_until_idle();
        assert!(child.is_destroyed());
        assert!(!manager.is_destroyed());
        assert!(app.children().is_empty());
        assert!(app.interaction().is_some());
    }
}
