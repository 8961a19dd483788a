use crate::*;

use vantage_core::InvocationOutcome;
use vantage_services::{DispatchError, InvocationFailure};

fn passing(cluster: &Cluster, job_id: u64) -> Job {
    let target = security("IBM");
    cluster.job(
        job_id,
        vec![JobItem::new("slow", target.clone(), vec![], vec![request(&format!("P{job_id}"), target)])],
    )
}

fn missing_input(cluster: &Cluster, job_id: u64) -> Job {
    let target = security("IBM");
    cluster.job(
        job_id,
        vec![JobItem::new(
            "double",
            target.clone(),
            vec![market_data("Absent", target.clone())],
            vec![request(&format!("M{job_id}"), target)],
        )],
    )
}

/// Tail jobs run on the same node right after their parent.
#[tokio::test]
async fn test_tails_run_on_parent_node() {
    let cluster = Cluster::new(3);
    let root = passing(&cluster, 1)
        .with_tail(passing(&cluster, 2).with_tail(passing(&cluster, 3)))
        .with_tail(passing(&cluster, 4));

    let outcomes = cluster.dispatcher.dispatch_all(root).await.unwrap();
    let results: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();

    let ids: Vec<u64> = results.iter().map(|r| r.specification.job_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert!(results.iter().all(|r| r.node_id == results[0].node_id));
}

/// Under the default policy a parent with missing inputs skips its tails.
#[tokio::test]
async fn test_all_succeeded_policy_skips_tails() {
    let cluster = Cluster::new(1);
    let root = missing_input(&cluster, 1).with_tail(passing(&cluster, 2).with_tail(passing(&cluster, 3)));

    let outcomes = cluster.dispatcher.dispatch_all(root).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes[0].as_ref().unwrap().items[0].outcome,
        InvocationOutcome::MissingInputs
    );
    assert_eq!(
        outcomes[1],
        Err(DispatchError::InvocationFailed {
            job: spec(2),
            failure: InvocationFailure::TailSkipped { parent: spec(1) },
        })
    );
    assert_eq!(
        outcomes[2],
        Err(DispatchError::InvocationFailed {
            job: spec(3),
            failure: InvocationFailure::TailSkipped { parent: spec(2) },
        })
    );
}

/// The lenient policy only stops tails on a raised error.
#[tokio::test]
async fn test_no_exceptions_policy() {
    let cluster = Cluster::with_policy(1, TailPolicy::NoExceptions, Duration::from_secs(5));
    let root = missing_input(&cluster, 1).with_tail(passing(&cluster, 2));
    let outcomes = cluster.dispatcher.dispatch_all(root).await.unwrap();
    assert!(outcomes.iter().all(|o| o.is_ok()));

    let target = security("IBM");
    let failing = cluster.job(10, vec![JobItem::new("fail", target.clone(), vec![], vec![request("F", target)])]);
    let outcomes = cluster
        .dispatcher
        .dispatch_all(failing.with_tail(passing(&cluster, 11)))
        .await
        .unwrap();
    assert!(outcomes[0].as_ref().unwrap().has_exceptions());
    assert!(matches!(
        &outcomes[1],
        Err(DispatchError::InvocationFailed {
            failure: InvocationFailure::TailSkipped { .. },
            ..
        })
    ));
}

/// `dispatch` returns the root result and lets the tail finish unobserved.
#[tokio::test]
async fn test_dispatch_returns_root_only() {
    let cluster = Cluster::new(1);
    let result = cluster
        .dispatcher
        .dispatch(passing(&cluster, 1).with_tail(passing(&cluster, 2)))
        .await
        .unwrap();
    assert_eq!(result.specification, spec(1));
}
