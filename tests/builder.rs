//! Coalescer scenarios: batching, demultiplexing, failure fan-out,
//! delay windows, and disposal.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use batchvisor::{BatchBuilder, BatchConfig, Error};

fn identity_builder(
    config: BatchConfig,
    calls: Arc<AtomicU32>,
    sizes: Arc<Mutex<Vec<usize>>>,
) -> BatchBuilder<u64, u64, u64> {
    BatchBuilder::new(
        "test",
        config,
        |req: &u64| *req,
        |resp: &u64| *resp,
        move |reqs: Vec<u64>, _token| {
            let calls = calls.clone();
            let sizes = sizes.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sizes.lock().unwrap().push(reqs.len());
                Ok(reqs)
            }
        },
    )
}

#[tokio::test]
async fn coalesces_a_thousand_requests_into_full_batches() {
    let calls = Arc::new(AtomicU32::new(0));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let builder = identity_builder(
        BatchConfig {
            batch_size: 100,
            batch_delay: Duration::ZERO,
            concurrency: 1,
        },
        calls.clone(),
        sizes.clone(),
    );

    let futures: Vec<_> = (0..1000u64).map(|i| builder.request(i)).collect();
    let results = join_all(futures).await;

    for (i, res) in results.into_iter().enumerate() {
        assert_eq!(res.unwrap(), i as u64);
    }
    let invocations = calls.load(Ordering::SeqCst);
    assert!(
        invocations <= 11,
        "expected at most 11 batch calls, saw {invocations}"
    );
    builder.dispose().await;
}

#[tokio::test]
async fn batch_calls_never_overlap_under_concurrency_one() {
    let active = Arc::new(AtomicI32::new(0));
    let max_seen = Arc::new(AtomicI32::new(0));

    let builder = Arc::new(BatchBuilder::new(
        "serial",
        BatchConfig {
            batch_size: 10,
            batch_delay: Duration::ZERO,
            concurrency: 1,
        },
        |req: &u64| *req,
        |resp: &u64| *resp,
        {
            let active = active.clone();
            let max_seen = max_seen.clone();
            move |reqs: Vec<u64>, _token| {
                let active = active.clone();
                let max_seen = max_seen.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(reqs)
                }
            }
        },
    ));

    let handles: Vec<_> = (0..300u64)
        .map(|i| {
            let builder = builder.clone();
            tokio::spawn(async move { builder.request(i).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_response_fails_only_the_unanswered_key() {
    let builder = BatchBuilder::new(
        "holey",
        BatchConfig {
            batch_size: 1000,
            batch_delay: Duration::from_millis(50),
            concurrency: 1,
        },
        |req: &u64| *req,
        |resp: &u64| *resp,
        |reqs: Vec<u64>, _token| async move {
            Ok(reqs.into_iter().filter(|r| *r != 337).collect())
        },
    );

    let futures: Vec<_> = (0..500u64).map(|i| builder.request(i)).collect();
    let results = join_all(futures).await;

    for (i, res) in results.into_iter().enumerate() {
        if i == 337 {
            assert!(matches!(res, Err(Error::MissingResponse { .. })));
        } else {
            assert_eq!(res.unwrap(), i as u64);
        }
    }
}

#[tokio::test]
async fn whole_batch_failure_fans_out_to_every_waiter() {
    let builder = BatchBuilder::new(
        "failing",
        BatchConfig {
            batch_size: 100,
            batch_delay: Duration::from_millis(50),
            concurrency: 1,
        },
        |req: &u64| *req,
        |resp: &u64| *resp,
        |_reqs: Vec<u64>, _token| async move { Err(Error::fail("boom")) },
    );

    let futures: Vec<_> = (0..50u64).map(|i| builder.request(i)).collect();
    for res in join_all(futures).await {
        assert_eq!(
            res,
            Err(Error::Fail {
                reason: "boom".into()
            })
        );
    }
}

#[tokio::test]
async fn duplicate_keys_share_one_slot_in_the_batch() {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let builder = Arc::new(BatchBuilder::new(
        "dedup",
        BatchConfig {
            batch_size: 100,
            batch_delay: Duration::from_millis(50),
            concurrency: 1,
        },
        |req: &u64| *req % 4,
        |resp: &u64| *resp % 4,
        {
            let sizes = sizes.clone();
            move |reqs: Vec<u64>, _token| {
                let sizes = sizes.clone();
                async move {
                    sizes.lock().unwrap().push(reqs.len());
                    let mut seen = std::collections::HashSet::new();
                    for r in &reqs {
                        assert!(seen.insert(*r % 4), "duplicate key in one batch");
                    }
                    Ok(reqs)
                }
            }
        },
    ));

    // 40 requests over 4 distinct keys, coalesced into one batch.
    let futures: Vec<_> = (0..40u64).map(|i| builder.request(i)).collect();
    let results = join_all(futures).await;
    for (i, res) in results.into_iter().enumerate() {
        // Every waiter of a key receives the representative's value.
        assert_eq!(res.unwrap() % 4, (i as u64) % 4);
    }
    assert_eq!(*sizes.lock().unwrap(), vec![4]);
}

#[tokio::test(start_paused = true)]
async fn delay_window_holds_the_batch_open() {
    let calls = Arc::new(AtomicU32::new(0));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let builder = Arc::new(identity_builder(
        BatchConfig {
            batch_size: 1000,
            batch_delay: Duration::from_secs(1),
            concurrency: 1,
        },
        calls.clone(),
        sizes.clone(),
    ));

    let mut handles = Vec::new();
    for i in 0..50u64 {
        let builder = builder.clone();
        handles.push(tokio::spawn(async move { builder.request(i).await }));
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0, "window must still be open");

    for i in 50..75u64 {
        let builder = builder.clone();
        handles.push(tokio::spawn(async move { builder.request(i).await }));
    }

    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*sizes.lock().unwrap(), vec![75]);
}

#[tokio::test(start_paused = true)]
async fn full_batches_dispatch_before_the_window_closes() {
    let calls = Arc::new(AtomicU32::new(0));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let builder = Arc::new(identity_builder(
        BatchConfig {
            batch_size: 20,
            batch_delay: Duration::from_secs(1),
            concurrency: 2,
        },
        calls.clone(),
        sizes.clone(),
    ));

    let started = tokio::time::Instant::now();
    let mut handles = Vec::new();
    for i in 0..50u64 {
        let builder = builder.clone();
        handles.push(tokio::spawn(async move { builder.request(i).await }));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        *sizes.lock().unwrap(),
        vec![20, 20],
        "two full batches must dispatch without waiting for the window"
    );

    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(*sizes.lock().unwrap(), vec![20, 20, 10]);
}

#[tokio::test]
async fn dispose_drains_buffered_requests_through_the_normal_path() {
    let calls = Arc::new(AtomicU32::new(0));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let builder = Arc::new(identity_builder(
        BatchConfig {
            batch_size: 1000,
            batch_delay: Duration::from_secs(3600),
            concurrency: 1,
        },
        calls.clone(),
        sizes.clone(),
    ));

    let mut handles = Vec::new();
    for i in 0..5u64 {
        let builder = builder.clone();
        handles.push(tokio::spawn(async move { builder.request(i).await }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    builder.dispose().await;
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*sizes.lock().unwrap(), vec![5]);
}

#[tokio::test]
async fn dispose_is_idempotent_and_stops_intake() {
    let calls = Arc::new(AtomicU32::new(0));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let builder = identity_builder(BatchConfig::default(), calls.clone(), sizes.clone());

    builder.dispose().await;
    builder.dispose().await;
    builder.dispose().await;

    assert_eq!(builder.request(1).await, Err(Error::Disposed));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_tears_down_pending_requests() {
    let token = CancellationToken::new();
    let builder = Arc::new(BatchBuilder::with_clock(
        "bounded",
        BatchConfig {
            batch_size: 100,
            batch_delay: Duration::from_secs(3600),
            concurrency: 1,
        },
        |req: &u64| *req,
        |resp: &u64| *resp,
        |reqs: Vec<u64>, _token| async move { Ok(reqs) },
        Arc::new(batchvisor::TokioClock),
        token.clone(),
    ));

    let pending = {
        let builder = builder.clone();
        tokio::spawn(async move { builder.request(7).await })
    };
    tokio::task::yield_now().await;

    token.cancel();
    assert_eq!(pending.await.unwrap(), Err(Error::Canceled));
}
