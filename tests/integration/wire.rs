use crate::*;

use vantage_core::wire::{IdentifierError, WireMessage};
use vantage_services::codec::{apply_registration, decode_job, decode_result, encode_job, encode_result};
use vantage_services::{IdentifierMap, IdentifierSync, InMemoryIdentifierMap};

/// A job crosses to a peer, runs there, and its result comes back; each
/// descriptor travels in full once.
#[tokio::test]
async fn test_job_and_result_cross_the_wire() {
    let client_ids = InMemoryIdentifierMap::new();
    let cluster = Cluster::new(1);
    let server_ids = cluster.caches.identifiers().clone();

    let ibm = security("IBM");
    let spot = market_data("Spot", ibm.clone());
    let vol = market_data("Vol", ibm.clone());
    cluster.seed(&spot, Value::Double(21.0));

    let job = cluster.job(
        1,
        vec![
            JobItem::new("double", ibm.clone(), vec![spot.clone()], vec![request("Twice", ibm.clone())]),
            JobItem::new("double", ibm.clone(), vec![vol.clone()], vec![request("VolTwice", ibm)]),
        ],
    );

    // ── client → server ──
    let mut to_server = IdentifierSync::new();
    let message = WireMessage::Job(encode_job(&job, &client_ids));
    let frames = to_server.frames(&message, &client_ids).unwrap();
    assert_eq!(frames.len(), 2);

    let mut received = None;
    for frame in &frames {
        match WireMessage::decode(frame).unwrap() {
            WireMessage::Identifiers(reg) => {
                // The server already minted a handle for `Spot` while seeding,
                // so mirror into a fresh map and translate through it.
                assert_eq!(reg.entries.len(), 2);
                let mirror = InMemoryIdentifierMap::new();
                apply_registration(&reg, &mirror).unwrap();
                received = Some(mirror);
            }
            WireMessage::Job(msg) => {
                let mirror = received.as_ref().expect("identifiers precede the job");
                let decoded = decode_job(&msg, mirror).unwrap();
                assert_eq!(decoded, job);
            }
            other => panic!("unexpected frame {}", other.msg_type()),
        }
    }

    let result = cluster.dispatcher.dispatch(job).await.unwrap();

    // ── server → client ──
    let mut to_client = IdentifierSync::new();
    let message = WireMessage::JobResult(encode_result(&result, server_ids.as_ref()));
    let frames = to_client.frames(&message, server_ids.as_ref()).unwrap();
    assert_eq!(frames.len(), 2, "missing input descriptor must be registered");

    let peer = InMemoryIdentifierMap::new();
    let WireMessage::Identifiers(reg) = WireMessage::decode(&frames[0]).unwrap() else {
        panic!("expected identifiers frame");
    };
    apply_registration(&reg, &peer).unwrap();
    let WireMessage::JobResult(msg) = WireMessage::decode(&frames[1]).unwrap() else {
        panic!("expected result frame");
    };
    let back = decode_result(&msg, &peer).unwrap();

    assert_eq!(back.specification, result.specification);
    assert_eq!(back.items[1].missing_inputs, vec![vol]);
    assert_eq!(back.node_id, result.node_id);
}

/// Handles the peer never registered fail the whole message.
#[test]
fn test_unregistered_handle_is_rejected() {
    let sender = InMemoryIdentifierMap::new();
    let job = Job::new(
        spec(1),
        0,
        vec![JobItem::new("double", security("IBM"), vec![market_data("Spot", security("IBM"))], vec![])],
    );
    let msg = encode_job(&job, &sender);
    let handle = msg.items[0].inputs[0];

    let receiver = InMemoryIdentifierMap::new();
    assert_eq!(decode_job(&msg, &receiver), Err(IdentifierError::UnknownHandle(handle)));
    assert!(receiver.lookup(&market_data("Spot", security("IBM"))).is_none());
}
