use crate::*;

use vantage_services::{DispatchError, JobInvoker, Registration};

/// No invokers at all: dispatch gives up after the configured window.
#[tokio::test]
async fn test_no_invokers_times_out() {
    let dispatcher = JobDispatcher::new(Duration::from_millis(150));
    let job = Job::new(spec(1), 0, vec![]);

    let start = std::time::Instant::now();
    let err = dispatcher.dispatch(job).await.unwrap_err();
    let waited = start.elapsed();

    assert_eq!(
        err,
        DispatchError::Timeout {
            job: spec(1),
            timeout: Duration::from_millis(150)
        }
    );
    assert!(waited >= Duration::from_millis(150), "gave up early: {waited:?}");
    assert!(waited < Duration::from_secs(5), "gave up late: {waited:?}");
}

/// An empty pool keeps the dispatch waiting until a node is added.
#[tokio::test]
async fn test_added_node_unblocks_dispatch() {
    let cluster = Cluster::new(0);
    let target = security("IBM");
    let job = cluster.job(1, vec![JobItem::new("slow", target.clone(), vec![], vec![request("S", target)])]);

    let waiting = {
        let dispatcher = cluster.dispatcher.clone();
        tokio::spawn(async move { dispatcher.dispatch(job).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiting.is_finished());

    cluster.add_node();
    let result = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(result.all_succeeded());
}

/// Idle capacity answers true and never signals.
#[tokio::test]
async fn test_notify_when_idle() {
    let cluster = Cluster::new(1);
    let (registration, mut signal) = Registration::new();
    assert!(cluster.invoker.notify_when_available(registration));
    assert!(signal.try_recv().is_err());
    assert_eq!(cluster.invoker.waiting_count(), 0);
}

/// Busy pool: the registration is queued and signalled exactly once when
/// the running job finishes.
#[tokio::test]
async fn test_notify_when_busy() {
    let cluster = Cluster::new(1);
    let target = security("IBM");
    let job = cluster.job(1, vec![JobItem::new("slow", target.clone(), vec![], vec![request("S", target)])]);
    let running = {
        let dispatcher = cluster.dispatcher.clone();
        tokio::spawn(async move { dispatcher.dispatch(job).await })
    };
    while cluster.invoker.idle_count() != 0 {
        tokio::task::yield_now().await;
    }

    let (registration, signal) = Registration::new();
    assert!(!cluster.invoker.notify_when_available(registration));

    tokio::time::timeout(Duration::from_secs(5), signal)
        .await
        .expect("registration was not signalled")
        .expect("registration dropped without signal");
    assert!(running.await.unwrap().is_ok());
    assert_eq!(cluster.invoker.waiting_count(), 0);
}
