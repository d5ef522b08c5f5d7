// ============================================================================
// Cooperative Deferred-Task Scheduler
// ============================================================================
//
// Every controller on a thread shares one FIFO of deferred tasks. A task
// submitted while a round is running lands in the next round, so work that
// is deferred "to the next turn" never runs before the caller's remaining
// synchronous statements.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Upper bound on rounds drained by [`run_until_idle`] before it gives up.
const MAX_IDLE_ROUNDS: usize = 10_000;

/// Handle for a deferred task, used to cancel it before it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

struct Deferred {
    id: TaskId,
    run: Box<dyn FnOnce()>,
}

// Both sender and receiver live on the same thread; this is a plain deferred queue.
thread_local! {
    static DEFERRED: RefCell<VecDeque<Deferred>> = const { RefCell::new(VecDeque::new()) };
    static NEXT_TASK_ID: Cell<u64> = const { Cell::new(0) };
}

/// Submit `task` to the end of the current scheduling round.
pub fn defer(task: impl FnOnce() + 'static) -> TaskId {
    let id = NEXT_TASK_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        TaskId(id)
    });
    DEFERRED.with(|queue| {
        queue.borrow_mut().push_back(Deferred {
            id,
            run: Box::new(task),
        });
    });
    id
}

/// Remove a task that has not run yet. Returns whether it was still queued.
pub fn cancel(id: TaskId) -> bool {
    DEFERRED.with(|queue| {
        let mut queue = queue.borrow_mut();
        let before = queue.len();
        queue.retain(|task| task.id != id);
        queue.len() != before
    })
}

/// Check if there are deferred tasks waiting.
pub fn has_pending() -> bool {
    DEFERRED.with(|queue| !queue.borrow().is_empty())
}

/// Run one round: every task queued before this call, in submission order.
///
/// Tasks submitted while the round runs wait for the next round.
/// Returns the number of tasks executed.
pub fn run_pending() -> usize {
    // Ids are handed out in submission order, so the next id marks the round boundary.
    let boundary = NEXT_TASK_ID.with(Cell::get);
    let mut count = 0;
    loop {
        let next = DEFERRED.with(|queue| {
            let mut queue = queue.borrow_mut();
            match queue.front() {
                Some(task) if task.id.0 < boundary => queue.pop_front(),
                _ => None,
            }
        });
        let Some(task) = next else {
            return count;
        };
        (task.run)();
        count += 1;
    }
}

/// Run rounds until no deferred task is left. Returns the total executed.
pub fn run_until_idle() -> usize {
    let mut total = 0;
    for _ in 0..MAX_IDLE_ROUNDS {
        let ran = run_pending();
        if ran == 0 {
            return total;
        }
        total += ran;
    }
    log::warn!(
        target: "leafer",
        "Scheduler still busy after {} rounds, giving up",
        MAX_IDLE_ROUNDS
    );
    total
}
