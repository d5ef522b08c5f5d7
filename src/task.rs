//! FIFO serializer for asynchronous units of work.
//!
//! A unit receives a [`TaskDone`] token and is considered in flight until
//! that token is dropped, which may happen many scheduler rounds later.
//! The next unit only starts after the previous token is gone.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::scheduler;

type Unit = Box<dyn FnOnce(TaskDone)>;

#[derive(Default)]
struct TaskQueue {
    pending: RefCell<VecDeque<Unit>>,
    running: Cell<bool>,
    pump_scheduled: Cell<bool>,
    finished: Cell<usize>,
}

/// Runs admitted units one at a time, in admission order.
#[derive(Clone, Default)]
pub struct TaskProcessor {
    queue: Rc<TaskQueue>,
}

/// Completion token for the unit currently in flight.
///
/// Dropping the token completes the unit, including on early return.
pub struct TaskDone {
    queue: Weak<TaskQueue>,
}

impl TaskDone {
    /// Mark the unit as finished.
    pub fn finish(self) {}
}

impl Drop for TaskDone {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.running.set(false);
            queue.finished.set(queue.finished.get() + 1);
            schedule_pump(&queue);
        }
    }
}

impl TaskProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a unit. It starts on a later scheduler round, once every unit
    /// admitted before it has finished.
    pub fn add(&self, unit: impl FnOnce(TaskDone) + 'static) {
        self.queue.pending.borrow_mut().push_back(Box::new(unit));
        schedule_pump(&self.queue);
    }

    /// Whether a unit is in flight.
    pub fn is_running(&self) -> bool {
        self.queue.running.get()
    }

    /// Units admitted but not started.
    pub fn pending(&self) -> usize {
        self.queue.pending.borrow().len()
    }

    /// Units completed since creation.
    pub fn finished(&self) -> usize {
        self.queue.finished.get()
    }
}

fn schedule_pump(queue: &Rc<TaskQueue>) {
    if queue.running.get() || queue.pump_scheduled.get() || queue.pending.borrow().is_empty() {
        return;
    }
    queue.pump_scheduled.set(true);
    let weak = Rc::downgrade(queue);
    scheduler::defer(move || {
        if let Some(queue) = weak.upgrade() {
            queue.pump_scheduled.set(false);
            pump(&queue);
        }
    });
}

fn pump(queue: &Rc<TaskQueue>) {
    if queue.running.get() {
        return;
    }
    let Some(unit) = queue.pending.borrow_mut().pop_front() else {
        return;
    };
    queue.running.set(true);
    unit(TaskDone {
        queue: Rc::downgrade(queue),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_never_overlap() {
        let tasks = TaskProcessor::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b"] {
            let log = log.clone();
            tasks.add(move |done| {
                log.borrow_mut().push(format!("{name} start"));
                let log = log.clone();
                // Finish two rounds later to simulate an inner suspension.
                scheduler::defer(move || {
                    scheduler::defer(move || {
                        log.borrow_mut().push(format!("{name} end"));
                        done.finish();
                    });
                });
            });
        }

        assert_eq!(tasks.pending(), 2);
        scheduler::run_until_idle();

        assert_eq!(
            *log.borrow(),
            vec!["a start", "a end", "b start", "b end"]
        );
        assert_eq!(tasks.finished(), 2);
        assert!(!tasks.is_running());
    }

    #[test]
    fn test_dropped_token_releases_queue() {
        let tasks = TaskProcessor::new();
        let ran = Rc::new(Cell::new(0));

        let first = ran.clone();
        tasks.add(move |_done| first.set(first.get() + 1));
        let second = ran.clone();
        tasks.add(move |_done| second.set(second.get() + 1));

        scheduler::run_until_idle();
        assert_eq!(ran.get(), 2);
    }
}
