//! Pipeline scenarios: poll → register → handle → delete, failure
//! isolation, cancellation, and ordered shutdown.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use batchvisor::{BatchSubscriber, Error, HandlerFn, Poller, SubscriberConfig};

#[derive(Clone, Debug)]
struct Msg {
    id: u32,
    body: &'static str,
}

/// Scripted source: hands out the preloaded batches, then blocks until
/// cancelled. Records touched and deleted receipts.
struct FakePoller {
    batches: Mutex<Vec<Vec<Msg>>>,
    receives: AtomicU32,
    touched: Mutex<HashSet<u32>>,
    deleted: Mutex<HashSet<u32>>,
}

impl FakePoller {
    fn new(batches: Vec<Vec<Msg>>) -> Self {
        Self {
            batches: Mutex::new(batches),
            receives: AtomicU32::new(0),
            touched: Mutex::new(HashSet::new()),
            deleted: Mutex::new(HashSet::new()),
        }
    }

    fn deleted(&self) -> HashSet<u32> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Poller for FakePoller {
    type Message = Msg;
    type Receipt = u32;

    fn receipt_of(&self, message: &Msg) -> u32 {
        message.id
    }

    fn identity_of(&self, receipt: &u32) -> String {
        format!("receipt-{receipt}")
    }

    async fn receive(&self, token: &CancellationToken) -> Result<Vec<Msg>, Error> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().unwrap().pop();
        match next {
            Some(batch) => Ok(batch),
            None => {
                token.cancelled().await;
                Err(Error::Canceled)
            }
        }
    }

    async fn delete(
        &self,
        receipts: Vec<u32>,
        _token: &CancellationToken,
    ) -> Result<Vec<u32>, Error> {
        self.deleted.lock().unwrap().extend(receipts.iter().copied());
        Ok(receipts)
    }

    async fn touch(
        &self,
        receipts: Vec<u32>,
        _token: &CancellationToken,
    ) -> Result<Vec<u32>, Error> {
        self.touched.lock().unwrap().extend(receipts.iter().copied());
        Ok(receipts)
    }
}

fn config() -> SubscriberConfig {
    SubscriberConfig {
        handler_count: 4,
        batch_concurrency: 2,
        internal_queue_size: 8,
        poller_count: 1,
        asynchronous_deletes: false,
        ..SubscriberConfig::default()
    }
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("probe never became true");
}

#[tokio::test(start_paused = true)]
async fn messages_flow_from_poll_to_handled_to_deleted() {
    let poller = Arc::new(FakePoller::new(vec![
        vec![
            Msg { id: 3, body: "c" },
            Msg { id: 4, body: "d" },
        ],
        vec![
            Msg { id: 1, body: "a" },
            Msg { id: 2, body: "b" },
        ],
    ]));

    let handled = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let handled = handled.clone();
        HandlerFn::new(move |message: Msg, _token| {
            let handled = handled.clone();
            async move {
                handled.lock().unwrap().push((message.id, message.body));
                Ok(())
            }
        })
    };

    let shared = SharedPoller(poller.clone());
    let subscriber = BatchSubscriber::new(shared, handler, config(), CancellationToken::new());
    subscriber.start();

    wait_until(|| poller.deleted() == HashSet::from([1, 2, 3, 4])).await;
    let seen: HashSet<u32> = handled.lock().unwrap().iter().map(|(id, _)| *id).collect();
    assert_eq!(seen, HashSet::from([1, 2, 3, 4]));

    subscriber.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn handler_failure_forgets_the_receipt_instead_of_deleting() {
    let poller = Arc::new(FakePoller::new(vec![vec![
        Msg { id: 1, body: "ok" },
        Msg { id: 2, body: "bad" },
        Msg { id: 3, body: "ok" },
    ]]));

    let handler = HandlerFn::new(|message: Msg, _token| async move {
        if message.body == "bad" {
            return Err(Error::fail("handler exploded"));
        }
        Ok(())
    });

    let subscriber = BatchSubscriber::new(
        SharedPoller(poller.clone()),
        handler,
        config(),
        CancellationToken::new(),
    );
    subscriber.start();

    wait_until(|| poller.deleted() == HashSet::from([1, 3])).await;
    subscriber.dispose().await;

    // The failed message's receipt was forgotten, never deleted.
    assert_eq!(poller.deleted(), HashSet::from([1, 3]));
}

#[tokio::test(start_paused = true)]
async fn long_lived_messages_get_touched() {
    let poller = Arc::new(FakePoller::new(vec![vec![Msg { id: 9, body: "slow" }]]));

    // The handler outlives two touch intervals.
    let handler = HandlerFn::new(|_message: Msg, _token| async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        Ok(())
    });

    let subscriber = BatchSubscriber::new(
        SharedPoller(poller.clone()),
        handler,
        config(),
        CancellationToken::new(),
    );
    subscriber.start();

    wait_until(|| poller.deleted().contains(&9)).await;
    assert!(
        poller.touched.lock().unwrap().contains(&9),
        "receipt must be renewed while the handler runs"
    );
    subscriber.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn asynchronous_deletes_complete_eventually() {
    let poller = Arc::new(FakePoller::new(vec![vec![
        Msg { id: 1, body: "a" },
        Msg { id: 2, body: "b" },
    ]]));

    let handler = HandlerFn::new(|_message: Msg, _token| async move { Ok(()) });
    let subscriber = BatchSubscriber::new(
        SharedPoller(poller.clone()),
        handler,
        SubscriberConfig {
            asynchronous_deletes: true,
            ..config()
        },
        CancellationToken::new(),
    );
    subscriber.start();

    wait_until(|| poller.deleted() == HashSet::from([1, 2])).await;
    subscriber.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_bounding_token_tears_the_pipeline_down() {
    let poller = Arc::new(FakePoller::new(vec![vec![Msg { id: 1, body: "a" }]]));
    let handler = HandlerFn::new(|_message: Msg, _token| async move { Ok(()) });

    let token = CancellationToken::new();
    let subscriber = BatchSubscriber::new(
        SharedPoller(poller.clone()),
        handler,
        config(),
        token.clone(),
    );
    subscriber.start();

    wait_until(|| poller.deleted().contains(&1)).await;
    token.cancel();
    subscriber.done().await;

    // Teardown is idempotent afterwards.
    subscriber.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn dispose_before_start_does_not_hang() {
    let poller = Arc::new(FakePoller::new(vec![vec![Msg { id: 1, body: "a" }]]));
    let handler = HandlerFn::new(|_message: Msg, _token| async move { Ok(()) });

    let subscriber = BatchSubscriber::new(
        SharedPoller(poller.clone()),
        handler,
        config(),
        CancellationToken::new(),
    );

    subscriber.dispose().await;
    subscriber.dispose().await;
    assert!(poller.deleted().is_empty());
}

/// Arc adapter so the test keeps its own handle on the fake.
struct SharedPoller(Arc<FakePoller>);

#[async_trait]
impl Poller for SharedPoller {
    type Message = Msg;
    type Receipt = u32;

    fn receipt_of(&self, message: &Msg) -> u32 {
        self.0.receipt_of(message)
    }

    fn identity_of(&self, receipt: &u32) -> String {
        self.0.identity_of(receipt)
    }

    async fn receive(&self, token: &CancellationToken) -> Result<Vec<Msg>, Error> {
        self.0.receive(token).await
    }

    async fn delete(
        &self,
        receipts: Vec<u32>,
        token: &CancellationToken,
    ) -> Result<Vec<u32>, Error> {
        self.0.delete(receipts, token).await
    }

    async fn touch(
        &self,
        receipts: Vec<u32>,
        token: &CancellationToken,
    ) -> Result<Vec<u32>, Error> {
        self.0.touch(receipts, token).await
    }
}
