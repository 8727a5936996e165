//! ExecutionPool 单元测试

use super::CustomError;
use crate::runtime::scheduler::{ExecutionPool, PoolFuture, TaskError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_pool_starts_lazily() {
    let pool = ExecutionPool::new("lazy", 2);
    assert!(!pool.is_started());
    assert_eq!(pool.max_workers(), 2);

    let future = pool.submit(|| Ok(3 * 7));
    assert!(pool.is_started());
    assert_eq!(future.get().unwrap(), 21);
    pool.shutdown(true);
}

#[test]
fn test_pool_runs_on_named_workers() {
    let pool = ExecutionPool::new("named", 1);
    let future = pool.submit(|| Ok(thread::current().name().map(str::to_owned)));
    assert_eq!(future.get().unwrap().as_deref(), Some("named-pool-0"));
    pool.shutdown(true);
}

#[test]
fn test_pool_captures_errors_and_panics() {
    let pool = ExecutionPool::new("errors", 2);

    let failed = pool.submit_named("upload", || -> anyhow::Result<()> {
        Err(CustomError("segment 3".to_string()).into())
    });
    let err = failed.get().unwrap_err();
    assert_eq!(err.downcast_ref::<CustomError>().unwrap().0, "segment 3");
    assert_eq!(err.captured().unwrap().task(), "upload");
    assert_eq!(err.captured().unwrap().origin_thread().map(|n| n.starts_with("errors-pool-")), Some(true));

    let panicked = pool.submit(|| -> anyhow::Result<()> { panic!("worker boom") });
    assert!(matches!(panicked.get(), Err(TaskError::Panicked { .. })));

    // Workers survive both.
    assert_eq!(pool.submit(|| Ok("alive")).get().unwrap(), "alive");
    pool.shutdown(true);
}

#[test]
fn test_pool_bounds_concurrency() {
    let pool = ExecutionPool::new("bounded", 2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let futures: Vec<_> = (0..6)
        .map(|i| {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            })
        })
        .collect();

    let values: Vec<_> = futures.iter().map(|f| f.get().unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    pool.shutdown(true);
}

#[test]
fn test_pool_shutdown_drains_then_rejects() {
    let pool = ExecutionPool::new("drain", 1);
    let done = Arc::new(AtomicUsize::new(0));

    let futures: Vec<_> = (0..4)
        .map(|_| {
            let done = done.clone();
            pool.submit(move || {
                thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    pool.shutdown(true);
    assert_eq!(done.load(Ordering::SeqCst), 4);
    assert!(futures.iter().all(PoolFuture::is_done));
    assert!(!pool.is_accepting());

    let rejected = pool.submit(|| Ok(()));
    assert!(matches!(rejected.get(), Err(TaskError::PoolShutdown(name)) if name == "drain"));
}

#[test]
fn test_shutdown_before_start_is_noop() {
    let pool = ExecutionPool::default();
    pool.shutdown(true);
    assert!(!pool.is_started());
    assert!(matches!(pool.submit(|| Ok(1)).get(), Err(TaskError::PoolShutdown(_))));
}

#[test]
fn test_future_clones_share_outcome() {
    let future = PoolFuture::resolved(Ok(5));
    let clone = future.clone();
    assert!(clone.is_done());
    assert_eq!(future.get().unwrap(), 5);
    assert_eq!(clone.get().unwrap(), 5);
}

#[test]
fn test_future_get_timeout() {
    let pool = ExecutionPool::new("slow", 1);
    let future = pool.submit(|| {
        thread::sleep(Duration::from_millis(100));
        Ok(1)
    });
    assert!(future.get_timeout(Duration::from_millis(5)).is_none());
    assert_eq!(future.get_timeout(Duration::from_secs(5)).unwrap().unwrap(), 1);
    pool.shutdown(true);
}
