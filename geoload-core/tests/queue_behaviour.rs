//! Behavioural tests for `BoundedQueue` termination using rstest-bdd.

use std::{cell::RefCell, num::NonZeroUsize, thread, time::Duration};

use geoload_core::{BoundedQueue, QueueClosed, QueueState};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Debug, Default)]
struct QueueWorld {
    queue: RefCell<Option<BoundedQueue<u32>>>,
    blocked_push: RefCell<Option<Result<(), QueueClosed<u32>>>>,
}

impl QueueWorld {
    fn with_queue<R>(&self, f: impl FnOnce(&BoundedQueue<u32>) -> R) -> R {
        let borrowed = self.queue.borrow();
        let queue = borrowed
            .as_ref()
            .expect("queue should be created before use");
        f(queue)
    }
}

#[fixture]
fn world() -> QueueWorld {
    QueueWorld::default()
}

#[given("a bounded queue with capacity {capacity}")]
fn given_queue(world: &QueueWorld, capacity: usize) {
    let capacity = NonZeroUsize::new(capacity).expect("non-zero capacity");
    world.queue.replace(Some(BoundedQueue::new(capacity)));
}

#[given("three items have been pushed")]
fn given_three_items(world: &QueueWorld) {
    world.with_queue(|queue| {
        for item in 1..=3 {
            queue.push(item).expect("queue accepts items");
        }
    });
}

#[given("one item has been pushed")]
fn given_one_item(world: &QueueWorld) {
    world.with_queue(|queue| queue.push(1).expect("queue accepts items"));
}

#[when("the queue is terminated")]
fn when_terminated(world: &QueueWorld) {
    world.with_queue(BoundedQueue::terminate);
}

#[when("a producer blocks on a full queue and the queue is terminated")]
fn when_blocked_then_terminated(world: &QueueWorld) {
    let outcome = world.with_queue(|queue| {
        thread::scope(|scope| {
            let pusher = scope.spawn(|| queue.push(2));
            // Give the producer time to block on the full queue.
            thread::sleep(Duration::from_millis(50));
            queue.terminate();
            pusher.join().expect("producer thread")
        })
    });
    world.blocked_push.replace(Some(outcome));
}

#[then("popping yields the three items in order")]
fn then_items_in_order(world: &QueueWorld) {
    let popped: Vec<_> = world.with_queue(|queue| {
        (0..3)
            .map(|_| queue.pop().expect("queued item survives termination"))
            .collect()
    });
    assert_eq!(popped, vec![1, 2, 3]);
}

#[then("a further pop reports the queue as closed")]
fn then_pop_closed(world: &QueueWorld) {
    assert_eq!(world.with_queue(BoundedQueue::pop), Err(QueueClosed(())));
}

#[then("pushing 7 is rejected and hands back the item")]
fn then_push_rejected(world: &QueueWorld) {
    assert_eq!(world.with_queue(|queue| queue.push(7)), Err(QueueClosed(7)));
}

#[then("the queue is closed")]
fn then_closed(world: &QueueWorld) {
    assert_eq!(world.with_queue(BoundedQueue::state), QueueState::Closed);
}

#[then("the blocked push is rejected")]
fn then_blocked_rejected(world: &QueueWorld) {
    let outcome = world.blocked_push.borrow();
    assert_eq!(outcome.as_ref(), Some(&Err(QueueClosed(2))));
}

#[then("the queue is draining")]
fn then_draining(world: &QueueWorld) {
    world.with_queue(|queue| {
        assert_eq!(queue.state(), QueueState::Draining);
        assert_eq!(queue.len(), 1);
    });
}

#[scenario(path = "tests/features/bounded_queue.feature", index = 0)]
fn drains_after_termination(world: QueueWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/bounded_queue.feature", index = 1)]
fn rejects_after_termination(world: QueueWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/bounded_queue.feature", index = 2)]
fn releases_blocked_producer(world: QueueWorld) {
    let _ = world;
}
