use crate::*;

use std::collections::BTreeSet;
use vantage_core::{CacheSelectHint, InvocationOutcome};

/// Two items: one with its input seeded, one missing a second input.
#[tokio::test]
async fn test_two_item_job_end_to_end() {
    let cluster = Cluster::new(2);
    let ibm = security("IBM");
    let spot = market_data("Spot", ibm.clone());
    let vol = market_data("Vol", ibm.clone());
    cluster.seed(&spot, Value::Double(50.0));

    let twice = request("TwiceSpot", ibm.clone());
    let job = cluster.job(
        1,
        vec![
            JobItem::new("double", ibm.clone(), vec![spot.clone()], vec![twice.clone()]),
            JobItem::new("double", ibm.clone(), vec![spot.clone(), vol.clone()], vec![request("TwiceVol", ibm)]),
        ],
    );

    let result = cluster.dispatcher.dispatch(job).await.unwrap();

    assert_eq!(result.specification, spec(1));
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.items[0].item_index, 0);
    assert_eq!(result.items[0].outcome, InvocationOutcome::Success);
    assert_eq!(result.items[1].item_index, 1);
    assert_eq!(result.items[1].outcome, InvocationOutcome::MissingInputs);
    assert_eq!(result.items[1].missing_inputs, vec![vol]);
    assert!(result.node_id.starts_with("it/0/"));

    assert_eq!(cluster.shared(&produced(&twice, "double")), Some(Value::Double(100.0)));
}

/// Shared output of job 1 feeds job 2 of the same cycle.
#[tokio::test]
async fn test_shared_values_flow_between_jobs() {
    let cluster = Cluster::new(1);
    let ibm = security("IBM");
    let spot = market_data("Spot", ibm.clone());
    cluster.seed(&spot, Value::Double(3.0));

    let twice = request("Twice", ibm.clone());
    let first = cluster.job(1, vec![JobItem::new("double", ibm.clone(), vec![spot], vec![twice.clone()])]);
    assert!(cluster.dispatcher.dispatch(first).await.unwrap().all_succeeded());

    let quad = request("Quad", ibm.clone());
    let second = cluster.job(
        2,
        vec![JobItem::new("double", ibm, vec![produced(&twice, "double")], vec![quad.clone()])],
    );
    assert!(cluster.dispatcher.dispatch(second).await.unwrap().all_succeeded());
    assert_eq!(cluster.shared(&produced(&quad, "double")), Some(Value::Double(12.0)));
}

/// Private output of job 1 is invisible to job 2.
#[tokio::test]
async fn test_private_values_do_not_leak() {
    let cluster = Cluster::new(1);
    let ibm = security("IBM");
    let spot = market_data("Spot", ibm.clone());
    cluster.seed(&spot, Value::Double(3.0));

    let scratch = request("Scratch", ibm.clone());
    let scratch_d = produced(&scratch, "double");
    let first = cluster
        .job(1, vec![JobItem::new("double", ibm.clone(), vec![spot], vec![scratch])])
        .with_cache_hint(CacheSelectHint::PrivateValues(BTreeSet::from([scratch_d.clone()])));
    assert!(cluster.dispatcher.dispatch(first).await.unwrap().all_succeeded());
    assert_eq!(cluster.shared(&scratch_d), None);

    let second = cluster
        .job(2, vec![JobItem::new("double", ibm.clone(), vec![scratch_d.clone()], vec![request("X", ibm)])])
        .with_cache_hint(CacheSelectHint::PrivateValues(BTreeSet::from([scratch_d.clone()])));
    let result = cluster.dispatcher.dispatch(second).await.unwrap();
    assert_eq!(result.items[0].outcome, InvocationOutcome::MissingInputs);
    assert_eq!(result.items[0].missing_inputs, vec![scratch_d]);
}

/// A raising function is reported verbatim and the next item still runs.
#[tokio::test]
async fn test_exception_then_success() {
    let cluster = Cluster::new(1);
    let ibm = security("IBM");
    let spot = market_data("Spot", ibm.clone());
    cluster.seed(&spot, Value::Integer(4));

    let failed = request("Calibrated", ibm.clone());
    let twice = request("Twice", ibm.clone());
    let job = cluster.job(
        1,
        vec![
            JobItem::new("fail", ibm.clone(), vec![spot.clone()], vec![failed.clone()]),
            JobItem::new("double", ibm, vec![spot], vec![twice.clone()]),
        ],
    );
    let result = cluster.dispatcher.dispatch(job).await.unwrap();

    assert_eq!(result.items[0].outcome, InvocationOutcome::FunctionThrewException);
    let e = result.items[0].exception.as_ref().unwrap();
    assert_eq!(e.kind, "CalibrationFailed");
    assert_eq!(e.message, "curve did not converge");
    assert_eq!(cluster.shared(&produced(&failed, "fail")), None);

    assert_eq!(result.items[1].outcome, InvocationOutcome::Success);
    assert_eq!(cluster.shared(&produced(&twice, "double")), Some(Value::Double(8.0)));
}

/// Many concurrent dispatches over a small pool all complete.
#[tokio::test]
async fn test_concurrent_dispatch_over_small_pool() {
    let cluster = Cluster::new(2);
    let target = security("IBM");
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let job = cluster.job(i, vec![JobItem::new("slow", target.clone(), vec![], vec![request(&format!("S{i}"), target.clone())])]);
            let dispatcher = cluster.dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(job).await })
        })
        .collect();
    for h in handles {
        assert!(h.await.unwrap().unwrap().all_succeeded());
    }
    assert_eq!(cluster.invoker.idle_count(), 2);
    let stats = cluster.invoker.statistics().snapshot();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].invocations, 6);
}

/// Jobs built before the last repository reload still run and are counted
/// on the pool.
#[tokio::test]
async fn test_stale_jobs_are_counted_on_the_pool() {
    let cluster = Cluster::new(2);
    let target = security("IBM");
    for i in 0..3 {
        let job = Job::new(
            spec(i),
            0,
            vec![JobItem::new("slow", target.clone(), vec![], vec![request(&format!("S{i}"), target.clone())])],
        );
        assert!(cluster.dispatcher.dispatch(job).await.unwrap().all_succeeded());
    }
    let current = cluster.job(9, vec![]);
    assert!(cluster.dispatcher.dispatch(current).await.is_ok());
    assert_eq!(cluster.invoker.stale_jobs(), 3);
}
