//! The sandboxed replica and the primary replica must agree.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tandem_collab::{ConnectionState, ProviderConfig, ServerConfig, SyncServer, WebsocketProvider};
use tandem_core::{
    exchange, Attributes, ChangeSource, Delta, DocumentHandle, EditorBinding, EditorSurface,
    OperationLog, ReplicaText, RichTextBuffer, DEFAULT_TEXT_NAME,
};
use tandem_sandbox::{SandboxWorker, Status, WorkerConfig, WorkerInput, WorkerOutput};
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);

async fn ready(config: WorkerConfig) -> SandboxWorker {
    let mut worker = SandboxWorker::spawn(config).unwrap();
    let status = timeout(WAIT, worker.wait_for_status()).await.unwrap();
    assert_eq!(status, Some(Status::Ready));
    worker
}

fn sample_log() -> OperationLog {
    let mut bold = Attributes::new();
    bold.insert("bold".into(), json!(true));
    let mut log = OperationLog::new();
    log.push(Delta::new().insert("hello"));
    log.push(Delta::new().retain(5).insert(" world"));
    log.push(Delta::new().retain_with(5, bold));
    log.push(Delta::new().delete(1).insert("H"));
    log.push(Delta::new().retain(11).insert(" 😀!"));
    log
}

#[tokio::test]
async fn test_same_log_same_content_in_both_runtimes() {
    let log = OperationLog::from_json(&sample_log().to_json().unwrap()).unwrap();

    let primary = DocumentHandle::new().text(DEFAULT_TEXT_NAME);
    let sandboxed = ready(WorkerConfig::default()).await;

    log.replay(&primary).unwrap();
    log.replay(&sandboxed).unwrap();

    assert_eq!(primary.content(), "Hello world 😀!");
    assert_eq!(sandboxed.content(), primary.content());
}

#[tokio::test]
async fn test_concurrent_edits_merge_identically() {
    let primary = DocumentHandle::new().text(DEFAULT_TEXT_NAME);
    let sandboxed = ready(WorkerConfig::default()).await;

    primary.apply_delta(None, &Delta::new().insert("left")).unwrap();
    ReplicaText::apply_delta(&sandboxed, &Delta::new().insert("right")).unwrap();

    exchange(&primary, &sandboxed).unwrap();
    assert_eq!(sandboxed.content(), primary.content());
    assert_eq!(primary.content().len(), "leftright".len());

    // Already in sync: a second exchange changes nothing.
    let before = primary.content();
    exchange(&primary, &sandboxed).unwrap();
    assert_eq!(primary.content(), before);
}

#[tokio::test]
async fn test_sandbox_joins_room_as_independent_peer() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = SyncServer::new(ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    });
    let running = server.clone();
    tokio::spawn(async move {
        let _ = running.serve(listener).await;
    });
    let url = format!("ws://127.0.0.1:{port}");

    let doc = DocumentHandle::new();
    let editor = Arc::new(Mutex::new(RichTextBuffer::new()));
    let binding = EditorBinding::bind(doc.text(DEFAULT_TEXT_NAME), editor.clone()).unwrap();
    let provider = WebsocketProvider::new(url.as_str(), "ws", doc, ProviderConfig::default());
    provider
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();

    let mut worker = ready(WorkerConfig {
        url: Some(url),
        ..WorkerConfig::default()
    })
    .await;

    editor
        .lock()
        .unwrap()
        .insert_text(0, "hello", ChangeSource::User)
        .unwrap();

    // Arrives over the network, so the worker reports it to its host.
    let output = timeout(WAIT, async {
        loop {
            match worker.recv().await {
                Some(WorkerOutput::Delta(delta)) if delta.inserted_text() == "hello" => break delta,
                Some(_) => continue,
                None => panic!("worker stopped"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(output, Delta::new().insert("hello"));

    assert!(worker.post(WorkerInput::Delta(Delta::new().retain(5).insert(" world"))));
    let shown = timeout(WAIT, async {
        while editor.lock().unwrap().contents() != "hello world" {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(shown.is_ok(), "editor shows {:?}", editor.lock().unwrap().contents());
    assert_eq!(worker.content(), "hello world");
    binding.check().unwrap();
    assert_eq!(server.room_text("ws").await.as_deref(), Some("hello world"));
}
