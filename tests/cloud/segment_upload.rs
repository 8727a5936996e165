//! Parallel segment upload: fan out through the manager, collect with
//! `wait_for_futures`, resubmit what the collector flags.

use cloudtask::{
    wait_for_futures, ApplicationFailure, DispatcherConfig, PoolFuture, RateLimits, RetryCandidate,
    TaskManager,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadResponse {
    segment: usize,
    status: u16,
}

fn check_upload(response: &UploadResponse) -> anyhow::Result<()> {
    ApplicationFailure::check_status(response.status, format!("segment {}", response.segment))?;
    Ok(())
}

/// Object store that answers 503 to the first attempt of selected segments.
#[derive(Default)]
struct FlakyStore {
    attempts: Mutex<HashMap<usize, usize>>,
    stored: Mutex<Vec<usize>>,
}

impl FlakyStore {
    fn put(
        &self,
        segment: usize,
        flaky: &[usize],
    ) -> UploadResponse {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(segment).or_insert(0);
            *entry += 1;
            *entry
        };
        thread::sleep(Duration::from_millis(5));
        if attempt == 1 && flaky.contains(&segment) {
            return UploadResponse { segment, status: 503 };
        }
        self.stored.lock().push(segment);
        UploadResponse { segment, status: 201 }
    }
}

fn upload(
    manager: &TaskManager,
    store: &Arc<FlakyStore>,
    segments: &[usize],
    flaky: &'static [usize],
) -> Vec<PoolFuture<UploadResponse>> {
    segments
        .iter()
        .map(|&segment| {
            let store = store.clone();
            manager
                .submit_async(format!("put-segment-{}", segment), Some("object-store"), move || {
                    Ok(store.put(segment, flaky))
                })
                .unwrap()
        })
        .collect()
}

#[test]
fn test_flagged_segments_are_resubmitted() {
    let config = DispatcherConfig {
        max_workers: 4,
        rate_limits: RateLimits::unlimited().with_tag("object-store", None),
    };
    let manager = TaskManager::with_config("swift", config);
    manager.start().unwrap();
    let store = Arc::new(FlakyStore::default());

    let futures = upload(&manager, &store, &[1, 2, 3, 4, 5, 6], &[2, 5]);
    let (results, retries) = wait_for_futures(&futures, false, &check_upload).unwrap();
    assert_eq!(results.len(), 4);

    let mut resubmit: Vec<usize> = retries
        .iter()
        .filter_map(RetryCandidate::value)
        .map(|response| response.segment)
        .collect();
    resubmit.sort_unstable();
    assert_eq!(resubmit, vec![2, 5]);

    let futures = upload(&manager, &store, &resubmit, &[2, 5]);
    let (results, retries) = wait_for_futures(&futures, true, &check_upload).unwrap();
    assert_eq!(results.len(), 2);
    assert!(retries.is_empty());

    manager.stop();
    let mut stored = store.stored.lock().clone();
    stored.sort_unstable();
    assert_eq!(stored, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_raise_on_error_reports_the_failed_segment() {
    let manager = TaskManager::new("swift-strict");
    manager.start().unwrap();
    let store = Arc::new(FlakyStore::default());

    let futures = upload(&manager, &store, &[1, 2, 3], &[3]);
    let err = wait_for_futures(&futures, true, &check_upload).unwrap_err();
    let failure = err.downcast_ref::<ApplicationFailure>().unwrap();
    assert_eq!(failure.status, 503);
    assert_eq!(failure.message, "segment 3");
    manager.stop();
}
