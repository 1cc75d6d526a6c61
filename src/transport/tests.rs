use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use crate::broadcast::{Broadcaster, Envelope, SharedBroadcaster, Topic};
use crate::transport::auth::testing::StaticValidator;
use crate::transport::command::testing::RecordingExecutor;
use crate::transport::websocket::{Collaborators, handle_frame};

fn setup() -> (
    SharedBroadcaster,
    Collaborators,
    Arc<RecordingExecutor>,
    String,
    mpsc::Receiver<WsMessage>,
) {
    let broadcaster: SharedBroadcaster = Arc::new(Mutex::new(Broadcaster::default()));
    let executor = Arc::new(RecordingExecutor::default());
    let collaborators = Collaborators {
        validator: Arc::new(StaticValidator {
            token: "valid-token".to_string(),
            principal: "ops".to_string(),
        }),
        executor: executor.clone(),
    };
    let (tx, mut rx) = mpsc::channel(32);
    let id = broadcaster.lock().unwrap().register(tx);
    // Discard the handshake envelope.
    rx.try_recv().unwrap();
    (broadcaster, collaborators, executor, id, rx)
}

fn drain(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(serde_json::from_str(msg.to_text().unwrap()).unwrap());
    }
    out
}

#[test]
fn subscribe_frame_updates_subscription() {
    let (broadcaster, collaborators, _executor, id, _rx) = setup();

    let frame = json!({
        "type": "subscribe",
        "topics": ["gpu_metrics"],
        "node_ids": ["dgx-spark-02"]
    })
    .to_string();
    handle_frame(&broadcaster, &collaborators, &id, &frame);

    let broadcaster = broadcaster.lock().unwrap();
    let sub = broadcaster.subscription_of(&id).unwrap();
    assert!(sub.topics.contains(&Topic::GpuMetrics));
    assert!(sub.node_filter.contains("dgx-spark-02"));
}

#[test]
fn unsubscribe_frame_removes_topics() {
    let (broadcaster, collaborators, _executor, id, _rx) = setup();

    let frame = json!({ "type": "unsubscribe", "topics": ["alert", "job_status"] }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &frame);

    let broadcaster = broadcaster.lock().unwrap();
    let sub = broadcaster.subscription_of(&id).unwrap();
    assert!(!sub.topics.contains(&Topic::Alert));
    assert!(!sub.topics.contains(&Topic::JobStatus));
    assert!(sub.topics.contains(&Topic::GpuMetrics));
}

#[test]
fn authenticate_success_marks_connection() {
    let (broadcaster, collaborators, _executor, id, mut rx) = setup();

    let frame = json!({ "type": "authenticate", "token": "valid-token" }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &frame);

    assert!(broadcaster.lock().unwrap().is_authenticated(&id));
    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].data["status"], "authenticated");
    assert_eq!(replies[0].data["user"], "ops");
}

#[test]
fn authenticate_failure_keeps_connection_open_and_unauthenticated() {
    let (broadcaster, collaborators, _executor, id, mut rx) = setup();

    let frame = json!({ "type": "authenticate", "token": "wrong" }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &frame);

    let guard = broadcaster.lock().unwrap();
    assert!(guard.contains(&id));
    assert!(!guard.is_authenticated(&id));
    drop(guard);

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].data["status"], "error");
}

#[test]
fn failed_authenticate_does_not_revert_earlier_success() {
    let (broadcaster, collaborators, _executor, id, _rx) = setup();

    let good = json!({ "type": "authenticate", "token": "valid-token" }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &good);
    let bad = json!({ "type": "authenticate", "token": "wrong" }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &bad);

    assert!(broadcaster.lock().unwrap().is_authenticated(&id));
}

#[test]
fn ping_frame_elicits_pong() {
    let (broadcaster, collaborators, _executor, id, mut rx) = setup();

    handle_frame(&broadcaster, &collaborators, &id, r#"{ "type": "ping" }"#);

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].topic, Topic::Pong);
}

#[test]
fn ping_disarms_liveness_probe() {
    let (broadcaster, collaborators, _executor, id, _rx) = setup();

    broadcaster.lock().unwrap().liveness_sweep();
    handle_frame(&broadcaster, &collaborators, &id, r#"{ "type": "ping" }"#);
    broadcaster.lock().unwrap().liveness_sweep();

    assert!(broadcaster.lock().unwrap().contains(&id));
}

#[test]
fn command_requires_authentication() {
    let (broadcaster, collaborators, executor, id, mut rx) = setup();

    let frame = json!({ "type": "command", "action": "cancel_job", "params": {"job": 7} })
        .to_string();
    handle_frame(&broadcaster, &collaborators, &id, &frame);

    assert!(executor.calls.lock().unwrap().is_empty());
    let replies = drain(&mut rx);
    assert_eq!(replies[0].data["error"], "authentication required");
    // Rejection, not disconnection.
    assert!(broadcaster.lock().unwrap().contains(&id));
}

#[test]
fn authenticated_command_reaches_executor() {
    let (broadcaster, collaborators, executor, id, mut rx) = setup();

    let auth = json!({ "type": "authenticate", "token": "valid-token" }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &auth);
    drain(&mut rx);

    let frame = json!({ "type": "command", "action": "submit_job", "params": {} }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &frame);

    assert_eq!(executor.calls.lock().unwrap().as_slice(), ["submit_job"]);
    let replies = drain(&mut rx);
    assert_eq!(replies[0].data["status"], "command_result");
    assert_eq!(replies[0].data["action"], "submit_job");
}

#[test]
fn command_outside_allow_list_is_rejected() {
    let (broadcaster, collaborators, executor, id, mut rx) = setup();

    let auth = json!({ "type": "authenticate", "token": "valid-token" }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &auth);
    drain(&mut rx);

    let frame = json!({ "type": "command", "action": "rm_rf", "params": {} }).to_string();
    handle_frame(&broadcaster, &collaborators, &id, &frame);

    assert!(executor.calls.lock().unwrap().is_empty());
    let replies = drain(&mut rx);
    assert_eq!(replies[0].data["error"], "unknown action");
}

#[test]
fn malformed_frame_answers_rejection_without_closing() {
    let (broadcaster, collaborators, _executor, id, mut rx) = setup();

    handle_frame(&broadcaster, &collaborators, &id, "{not json");
    handle_frame(
        &broadcaster,
        &collaborators,
        &id,
        r#"{ "type": "shutdown_everything" }"#,
    );

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].data["error"], "malformed message");
    assert_eq!(replies[1].data["error"], "unsupported message type");
    assert!(broadcaster.lock().unwrap().contains(&id));
}
