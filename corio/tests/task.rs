mod common;

use corio::task::{WaitingFor, awaiter_for};
use corio::{ActiveWork, Error, Lazy, Received, completion_callback, detach, make_future, sync_wait};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::task::{Context, Waker};
use std::thread;
use std::time::Duration;

/// Suspends until another thread resolves the waiter after `delay`.
async fn resolved_later(value: u32, delay: Duration) -> u32 {
    awaiter_for(move |mut waiting: WaitingFor<u32>| {
        thread::spawn(move || {
            thread::sleep(delay);
            waiting.set_value(value);
        });
    })
    .await
    .value()
    .expect("waiter resolved without a value")
}

fn boom() -> Lazy<'static, u32> {
    Lazy::new(async {
        let nothing: Option<u32> = None;
        nothing.expect("boom")
    })
}

#[test]
fn test_lazy_runs_only_when_awaited() {
    let ran = AtomicBool::new(false);

    let task = Lazy::new(async {
        ran.store(true, Ordering::SeqCst);
        40 + 2
    });
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!task.is_done());

    assert_eq!(sync_wait(task), 42);
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_lazy_nested_awaits() {
    let inner = |n: u32| Lazy::new(async move { n * 2 });

    let outer = Lazy::new(async move {
        let a = inner(1).await;
        let b = inner(a).await;
        Lazy::ready(b + 1).await
    });

    assert_eq!(sync_wait(outer), 5);
}

#[test]
fn test_lazy_dropped_before_start_never_runs() {
    let ran = AtomicBool::new(false);
    drop(Lazy::new(async {
        ran.store(true, Ordering::SeqCst);
    }));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_received_accessors() {
    let value = Received::Value(3);
    assert!(value.has_value() && !value.has_error() && !value.was_cancelled());
    assert_eq!(value.into_result().expect("value expected"), 3);

    let cancelled: Received<u32> = Received::Cancelled;
    assert!(cancelled.was_cancelled());
    assert!(matches!(cancelled.into_result(), Err(Error::Cancelled)));

    let failed: Received<u32> = Received::Error(Error::Config("bad".to_owned()));
    assert!(failed.has_error());
    assert_eq!(failed.value(), None);
}

#[test]
fn test_waiting_for_dropped_unset_is_cancelled() {
    let received = sync_wait(awaiter_for(|waiting: WaitingFor<u32>| drop(waiting)));
    assert!(received.was_cancelled());
}

#[test]
fn test_waiting_for_resolved_from_another_thread() {
    let value = sync_wait(resolved_later(7, Duration::from_millis(10)));
    assert_eq!(value, 7);
}

#[test]
fn test_waiting_for_error() {
    let received = sync_wait(awaiter_for(|mut waiting: WaitingFor<u32>| {
        waiting.set_error(Error::Config("nope".to_owned()));
    }));
    assert!(matches!(received, Received::Error(Error::Config(_))));
}

#[test]
#[should_panic(expected = "twice")]
fn test_waiting_for_set_twice_panics() {
    sync_wait(awaiter_for(|mut waiting: WaitingFor<u32>| {
        waiting.set_value(1);
        waiting.set_value(2);
    }));
}

#[test]
fn test_dropped_awaiter_marks_receiver_abandoned() {
    let (tx, rx) = mpsc::channel();
    let mut awaiter = awaiter_for(move |waiting: WaitingFor<u32>| {
        tx.send(waiting).expect("Failed to send receiver");
    });

    let mut cx = Context::from_waker(Waker::noop());
    assert!(Pin::new(&mut awaiter).poll(&mut cx).is_pending());

    let mut waiting = rx.recv().expect("Failed to receive receiver");
    assert!(!waiting.is_abandoned());

    drop(awaiter);
    assert!(waiting.is_abandoned());

    // Resolving an abandoned receiver is still allowed and goes nowhere.
    waiting.set_value(3);
    drop(waiting);
}

#[test]
fn test_completed_awaiter_is_not_abandoned() {
    let (tx, rx) = mpsc::channel();
    let received = sync_wait(awaiter_for(move |mut waiting: WaitingFor<u32>| {
        waiting.set_value(5);
        tx.send(waiting.is_abandoned()).expect("Failed to send");
    }));

    assert_eq!(received.value(), Some(5));
    assert_eq!(rx.recv(), Ok(false));
}

#[test]
fn test_detach_runs_inline() {
    let (tx, rx) = mpsc::channel();
    detach(async move {
        tx.send(1).expect("Failed to send");
    });
    assert_eq!(rx.try_recv(), Ok(1));
}

#[test]
fn test_detach_resumes_on_waking_thread() {
    let (tx, rx) = mpsc::channel();
    let caller = thread::current().id();

    detach(async move {
        let value = resolved_later(9, Duration::from_millis(5)).await;
        tx.send((value, thread::current().id())).expect("Failed to send");
    });

    let (value, resumed_on) = rx.recv_timeout(Duration::from_secs(5)).expect("task never finished");
    assert_eq!(value, 9);
    assert_ne!(resumed_on, caller);
}

#[test]
fn test_make_future_wait() {
    let future = make_future(Lazy::new(resolved_later(11, Duration::from_millis(5))));
    assert_eq!(future.wait().value(), Some(11));
}

#[test]
fn test_make_future_ready_immediately() {
    let future = make_future(Lazy::ready("done"));
    assert!(future.is_ready());
    assert_eq!(sync_wait(future).value(), Some("done"));
}

#[test]
fn test_make_future_captures_panic() {
    let received = make_future(boom()).wait();

    match received {
        Received::Error(Error::Panicked(payload)) => assert!(payload.message().contains("boom")),
        other => panic!("expected a captured panic, got {other:?}"),
    }
}

#[test]
fn test_completion_callback_value() {
    let (tx, rx) = mpsc::channel();
    completion_callback(Lazy::new(resolved_later(5, Duration::from_millis(5))), move |received| {
        tx.send(received.value()).expect("Failed to send");
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(Some(5)));
}

#[test]
fn test_completion_callback_panic() {
    let (tx, rx) = mpsc::channel();
    completion_callback(boom(), move |received| {
        tx.send(received.has_error()).expect("Failed to send");
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
}

#[test]
fn test_active_work_join_without_tasks() {
    sync_wait(async {
        let mut work = ActiveWork::new();
        assert_eq!(work.pending(), 1);
        work.join().await;
    });
}

#[test]
fn test_active_work_tasks_finish_in_any_order() {
    let finished = Arc::new(AtomicUsize::new(0));

    sync_wait(async {
        let mut work = ActiveWork::new();

        for i in 0..16u32 {
            let finished = finished.clone();
            let delay = Duration::from_millis(u64::from((i * 7) % 5));
            work.start(async move {
                resolved_later(i, delay).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        work.join().await;
    });

    assert_eq!(finished.load(Ordering::SeqCst), 16);
}

#[test]
fn test_active_work_synchronous_tasks() {
    let finished = Arc::new(AtomicUsize::new(0));

    sync_wait(async {
        let mut work = ActiveWork::default();
        for _ in 0..4 {
            let finished = finished.clone();
            work.start(async move {
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(work.pending(), 1);
        work.join().await;
    });

    assert_eq!(finished.load(Ordering::SeqCst), 4);
}

#[test]
#[should_panic(expected = "ActiveWork joined twice")]
fn test_active_work_join_twice_panics() {
    sync_wait(async {
        let mut work = ActiveWork::new();
        work.join().await;
        work.join().await;
    });
}
