use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{
    ConfigError, DequeueResult, Dispatch, EnqueueResult, Key, Outcome, Priority, PriorityWeight,
    Scheduler, SchedulerConfig, SubKey,
};

fn scheduler(limit: usize) -> Scheduler<&'static str> {
    Scheduler::new(SchedulerConfig::bounded(limit)).expect("valid config")
}

fn enqueue_ops(scheduler: &Scheduler<&'static str>, key: &'static str, priority: Priority) {
    for op in ["op1", "op2", "op3"] {
        assert!(matches!(
            scheduler.enqueue(key, priority, op, key),
            EnqueueResult::Enqueued { .. }
        ));
    }
}

fn next(scheduler: &Scheduler<&'static str>) -> Dispatch<&'static str> {
    match scheduler.try_dequeue() {
        DequeueResult::Dispatched(dispatch) => dispatch,
        other => panic!("expected dispatch, got {other:?}"),
    }
}

fn label(dispatch: &Dispatch<&'static str>) -> String {
    format!("{}.{}", dispatch.entry.key, dispatch.entry.operation)
}

/// Runs entries one at a time, completing each before the next dequeue.
fn run_to_end(scheduler: &Scheduler<&'static str>, order: &mut Vec<String>) {
    loop {
        match scheduler.try_dequeue() {
            DequeueResult::Dispatched(dispatch) => {
                order.push(label(&dispatch));
                scheduler.complete(dispatch.ticket, Outcome::Succeeded);
            }
            DequeueResult::Empty => return,
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[test]
fn new_rejects_invalid_config() {
    let result = Scheduler::<()>::new(SchedulerConfig::bounded(0));
    assert!(matches!(result, Err(ConfigError::ZeroConcurrency)));
}

#[test]
fn fifo_within_key_regardless_of_other_keys() {
    let scheduler = scheduler(1);
    scheduler.enqueue("a", Priority::Medium, "op1", "a");
    scheduler.enqueue("b", Priority::Medium, "op1", "b");
    scheduler.enqueue("a", Priority::Medium, "op2", "a");
    scheduler.enqueue("b", Priority::Medium, "op2", "b");
    scheduler.enqueue("a", Priority::Medium, "op3", "a");

    let mut order = Vec::new();
    run_to_end(&scheduler, &mut order);
    let a_order: Vec<_> = order.iter().filter(|l| l.starts_with("a.")).collect();
    assert_eq!(a_order, ["a.op1", "a.op2", "a.op3"]);
    assert_eq!(order, ["a.op1", "b.op1", "a.op2", "b.op2", "a.op3"]);
}

#[test]
fn higher_priority_key_drains_before_resumption() {
    let scheduler = scheduler(1);
    enqueue_ops(&scheduler, "A", Priority::Low);
    let first = next(&scheduler);
    assert_eq!(label(&first), "A.op1");

    enqueue_ops(&scheduler, "B", Priority::High);
    assert!(matches!(scheduler.try_dequeue(), DequeueResult::Saturated));
    scheduler.complete(first.ticket, Outcome::Succeeded);

    let mut order = vec!["A.op1".to_string()];
    run_to_end(&scheduler, &mut order);
    assert_eq!(
        order,
        ["A.op1", "B.op1", "B.op2", "B.op3", "A.op2", "A.op3"]
    );
}

#[test]
fn update_priority_only_reorders_pending_work() {
    let scheduler = scheduler(1);
    enqueue_ops(&scheduler, "A", Priority::Low);
    let first = next(&scheduler);
    enqueue_ops(&scheduler, "B", Priority::Lowest);

    assert!(scheduler.update_priority(&Key::from("B"), Priority::High));
    assert!(scheduler.update_priority(&Key::from("A"), Priority::Lowest));
    assert_eq!(first.entry.operation, "op1");
    assert_eq!(
        scheduler.key_snapshot(&Key::from("A")).expect("registered").in_flight,
        1
    );
    scheduler.complete(first.ticket, Outcome::Succeeded);

    let mut order = vec!["A.op1".to_string()];
    run_to_end(&scheduler, &mut order);
    assert_eq!(
        order,
        ["A.op1", "B.op1", "B.op2", "B.op3", "A.op2", "A.op3"]
    );
}

#[test]
fn unknown_key_operations_are_noops() {
    let scheduler = scheduler(1);
    let ghost = Key::from("ghost");
    assert!(!scheduler.update_priority(&ghost, Priority::Highest));
    assert!(scheduler.cancel_key(&ghost).is_empty());
    assert!(!scheduler.mark_inactive(&ghost));
    assert!(scheduler.remove_key(&ghost).is_empty());
    assert!(!scheduler.boost_sub_key(&ghost, &SubKey::from("col"), true));
    assert_eq!(scheduler.stats().active_keys, 0);
}

#[test]
fn cancel_is_scoped_to_one_key() {
    let config = SchedulerConfig {
        per_key_limit: 1,
        ..SchedulerConfig::bounded(2)
    };
    let scheduler = Scheduler::new(config).expect("valid config");
    enqueue_ops(&scheduler, "A", Priority::Low);
    enqueue_ops(&scheduler, "B", Priority::Lowest);
    let a1 = next(&scheduler);
    let b1 = next(&scheduler);
    assert_eq!(label(&a1), "A.op1");
    assert_eq!(label(&b1), "B.op1");

    let cancelled: Vec<_> = scheduler
        .cancel_key(&Key::from("A"))
        .into_iter()
        .map(|entry| entry.operation)
        .collect();
    assert_eq!(cancelled, ["op2", "op3"]);

    let b_state = scheduler.key_snapshot(&Key::from("B")).expect("B untouched");
    assert_eq!(b_state.queued, 2);
    assert_eq!(b_state.in_flight, 1);
    let a_state = scheduler.key_snapshot(&Key::from("A")).expect("A still in flight");
    assert_eq!(a_state.queued, 0);
    assert_eq!(a_state.in_flight, 1);

    scheduler.complete(a1.ticket, Outcome::Succeeded);
    assert!(scheduler.key_snapshot(&Key::from("A")).is_none());
    scheduler.complete(b1.ticket, Outcome::Succeeded);

    let mut order = Vec::new();
    run_to_end(&scheduler, &mut order);
    assert_eq!(order, ["B.op2", "B.op3"]);

    let stats = scheduler.stats();
    assert_eq!(stats.cancelled, 2);
    assert_eq!(stats.succeeded, 4);
    assert_eq!(stats.active_keys, 0);
}

#[test]
fn cancelled_key_then_new_medium_key_runs_before_lowest() {
    let scheduler = scheduler(1);
    enqueue_ops(&scheduler, "A", Priority::Low);
    enqueue_ops(&scheduler, "B", Priority::Lowest);
    let a1 = next(&scheduler);

    assert_eq!(scheduler.cancel_key(&Key::from("A")).len(), 2);
    enqueue_ops(&scheduler, "C", Priority::Medium);
    scheduler.complete(a1.ticket, Outcome::Succeeded);

    let mut order = Vec::new();
    run_to_end(&scheduler, &mut order);
    assert_eq!(order, ["C.op1", "C.op2", "C.op3", "B.op1", "B.op2", "B.op3"]);
}

#[test]
fn concurrency_limit_is_respected() {
    let scheduler = scheduler(2);
    enqueue_ops(&scheduler, "A", Priority::Medium);
    enqueue_ops(&scheduler, "B", Priority::Medium);

    let first = next(&scheduler);
    let second = next(&scheduler);
    assert!(matches!(scheduler.try_dequeue(), DequeueResult::Saturated));
    assert_eq!(scheduler.stats().in_flight, 2);

    scheduler.complete(second.ticket, Outcome::Failed);
    let third = next(&scheduler);
    assert!(matches!(scheduler.try_dequeue(), DequeueResult::Saturated));

    scheduler.complete(first.ticket, Outcome::Succeeded);
    scheduler.complete(third.ticket, Outcome::Aborted);
    let stats = scheduler.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.aborted, 1);
}

#[test]
fn per_key_limit_serializes_a_key() {
    let config = SchedulerConfig {
        concurrency_limit: 4,
        per_key_limit: 1,
        ..SchedulerConfig::default()
    };
    let scheduler: Scheduler<&'static str> = Scheduler::new(config).expect("valid config");
    enqueue_ops(&scheduler, "A", Priority::High);
    enqueue_ops(&scheduler, "B", Priority::Low);

    let a1 = next(&scheduler);
    let b1 = next(&scheduler);
    assert_eq!(label(&a1), "A.op1");
    assert_eq!(label(&b1), "B.op1");
    assert!(matches!(scheduler.try_dequeue(), DequeueResult::Empty));

    scheduler.complete(a1.ticket, Outcome::Succeeded);
    assert_eq!(label(&next(&scheduler)), "A.op2");
}

#[test]
fn boost_sub_key_expedites_only_that_lane() {
    let scheduler = scheduler(1);
    let table = Key::from("orders");
    for (column, op) in [("id", "op1"), ("amount", "op2"), ("id", "op3"), ("amount", "op4")] {
        scheduler.enqueue_sub_key(&table, column, Priority::Medium, op, "orders");
    }
    scheduler.enqueue("other", Priority::Medium, "op5", "other");

    assert!(scheduler.boost_sub_key(&table, &SubKey::from("amount"), true));
    let mut order = Vec::new();
    let first = next(&scheduler);
    order.push(first.entry.operation.clone());
    scheduler.complete(first.ticket, Outcome::Succeeded);
    let second = next(&scheduler);
    order.push(second.entry.operation.clone());
    scheduler.complete(second.ticket, Outcome::Succeeded);

    assert!(scheduler.boost_sub_key(&table, &SubKey::from("amount"), false));
    while let DequeueResult::Dispatched(dispatch) = scheduler.try_dequeue() {
        order.push(dispatch.entry.operation.clone());
        scheduler.complete(dispatch.ticket, Outcome::Succeeded);
    }
    assert_eq!(order, ["op2", "op4", "op1", "op3", "op5"]);
}

#[test]
fn mark_inactive_demotes_and_retains() {
    let scheduler = scheduler(1);
    scheduler.enqueue("active", Priority::Low, "op1", "active");
    scheduler.enqueue("background", Priority::High, "op1", "background");
    let background = Key::from("background");

    assert!(scheduler.mark_inactive(&background));
    let snapshot = scheduler.key_snapshot(&background).expect("registered");
    assert!(snapshot.weight.is_inactive());
    assert_eq!(snapshot.last_active_weight, Priority::High.weight());

    let mut order = Vec::new();
    run_to_end(&scheduler, &mut order);
    assert_eq!(order, ["active.op1", "background.op1"]);

    let retained = scheduler.key_snapshot(&background).expect("retained while inactive");
    assert_eq!(retained.queued, 0);
    assert!(retained.retained);
    assert!(scheduler.key_snapshot(&Key::from("active")).is_none());

    assert!(scheduler.update_priority(&background, Priority::Medium));
    assert!(scheduler.key_snapshot(&background).is_none());
}

#[test]
fn remove_key_drops_queue_and_tolerates_in_flight_completion() {
    let scheduler = scheduler(1);
    enqueue_ops(&scheduler, "A", Priority::Medium);
    let a1 = next(&scheduler);

    let removed = scheduler.remove_key(&Key::from("A"));
    assert_eq!(removed.len(), 2);
    assert!(scheduler.key_snapshot(&Key::from("A")).is_none());

    scheduler.enqueue("A", Priority::Highest, "op4", "A");
    scheduler.complete(a1.ticket, Outcome::Succeeded);

    let snapshot = scheduler.key_snapshot(&Key::from("A")).expect("recreated key");
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.queued, 1);
    assert_eq!(snapshot.weight, Priority::Highest.weight());
}

#[test]
fn recreated_key_respects_per_key_limit_of_removed_in_flight() {
    let config = SchedulerConfig {
        per_key_limit: 1,
        ..SchedulerConfig::bounded(4)
    };
    let scheduler = Scheduler::new(config).expect("valid config");
    let a = Key::from("a");
    scheduler.enqueue(&a, Priority::Medium, "op1", "a");
    let a1 = next(&scheduler);

    assert!(scheduler.remove_key(&a).is_empty());
    scheduler.enqueue(&a, Priority::Medium, "op2", "a");
    assert_eq!(scheduler.key_snapshot(&a).expect("recreated").in_flight, 1);
    assert!(matches!(scheduler.try_dequeue(), DequeueResult::Empty));

    scheduler.complete(a1.ticket, Outcome::Succeeded);
    let a2 = next(&scheduler);
    assert_eq!(label(&a2), "a.op2");
    assert_eq!(scheduler.in_flight(), 1);
    scheduler.complete(a2.ticket, Outcome::Succeeded);
    assert!(scheduler.key_snapshot(&a).is_none());
    assert_eq!(scheduler.in_flight(), 0);
}

#[test]
fn boosted_background_lane_never_beats_more_urgent_key() {
    let scheduler = scheduler(1);
    let background = Key::from("bg");
    scheduler.enqueue("fg", Priority::Medium, "op1", "fg");
    scheduler.enqueue(&background, Priority::Low, "op1", "bg");
    scheduler.enqueue_sub_key(&background, "col", Priority::Low, "op2", "bg");
    for _ in 0..3 {
        assert!(scheduler.boost_sub_key(&background, &SubKey::from("col"), true));
    }
    assert_eq!(
        scheduler.key_snapshot(&background).expect("registered").weight,
        Priority::Low.weight()
    );

    let mut order = Vec::new();
    run_to_end(&scheduler, &mut order);
    assert_eq!(order, ["fg.op1", "bg.op2", "bg.op1"]);
}

#[test]
fn close_drains_queue_and_rejects_new_work() {
    let scheduler = scheduler(1);
    enqueue_ops(&scheduler, "A", Priority::Medium);
    let a1 = next(&scheduler);

    let drained: Vec<u64> = scheduler.close().into_iter().map(|e| e.seq).collect();
    assert_eq!(drained, [2, 3]);
    assert!(matches!(scheduler.try_dequeue(), DequeueResult::Closed));
    assert!(matches!(
        scheduler.enqueue("A", Priority::Medium, "op4", "late"),
        EnqueueResult::Closed("late")
    ));

    assert!(!scheduler.is_drained());
    scheduler.complete(a1.ticket, Outcome::Succeeded);
    assert!(scheduler.is_drained());
}

#[test]
fn dispatch_state_transitions() {
    let scheduler = scheduler(1);
    assert!(!scheduler.start_dispatch(), "no work, stays idle");

    scheduler.enqueue("A", Priority::Medium, "op1", "A");
    assert!(scheduler.start_dispatch());
    assert!(!scheduler.start_dispatch(), "already running");

    let DequeueResult::Dispatched(dispatch) = scheduler.next_or_idle() else {
        panic!("expected dispatch");
    };
    assert!(scheduler.is_dispatching());
    assert!(matches!(scheduler.next_or_idle(), DequeueResult::Saturated));
    assert!(!scheduler.is_dispatching());

    scheduler.enqueue("A", Priority::Medium, "op2", "A");
    assert!(!scheduler.start_dispatch(), "no free slot");
    scheduler.complete(dispatch.ticket, Outcome::Succeeded);
    assert!(scheduler.start_dispatch());
}

#[test]
fn stats_track_queue_time_samples() {
    let scheduler = scheduler(1);
    enqueue_ops(&scheduler, "A", Priority::Medium);
    let mut order = Vec::new();
    run_to_end(&scheduler, &mut order);

    let stats = scheduler.stats();
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.queue_time_samples, 3);
    let bucketed: u64 = stats.queue_time_histogram.iter().map(|b| b.count).sum();
    assert_eq!(bucketed, 3);
    assert!(stats.queue_time_p99_ns >= stats.queue_time_p95_ns);
}

#[test]
fn inactive_weight_sorts_after_every_level() {
    let mut weights: Vec<PriorityWeight> =
        Priority::ordered().iter().map(|p| p.weight()).collect();
    weights.reverse();
    weights.sort();
    assert_eq!(weights.last(), Some(&PriorityWeight::INACTIVE));
    assert_eq!(weights.first(), Some(&Priority::Highest.weight()));
}

#[test]
fn blocking_dequeue_wakes_on_enqueue() {
    let scheduler = Arc::new(scheduler(1));
    let worker = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || match scheduler.dequeue_blocking() {
            DequeueResult::Dispatched(dispatch) => {
                let op = dispatch.entry.operation.clone();
                scheduler.complete(dispatch.ticket, Outcome::Succeeded);
                Some(op)
            }
            _ => None,
        })
    };

    thread::sleep(Duration::from_millis(20));
    scheduler.enqueue("A", Priority::Medium, "op1", "A");
    assert_eq!(worker.join().expect("worker thread"), Some("op1".to_string()));
}

#[test]
fn blocking_dequeue_timeout_returns_empty() {
    let scheduler = scheduler(1);
    let result = scheduler.dequeue_blocking_timeout(Duration::from_millis(10));
    assert!(matches!(result, DequeueResult::Empty));
}

#[test]
fn blocking_dequeue_returns_closed() {
    let scheduler = Arc::new(scheduler(1));
    let worker = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || matches!(scheduler.dequeue_blocking(), DequeueResult::Closed))
    };
    thread::sleep(Duration::from_millis(20));
    scheduler.close();
    assert!(worker.join().expect("worker thread"));
}
