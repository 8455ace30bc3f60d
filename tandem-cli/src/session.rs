//! Headless participant driven from stdin.

use std::error::Error;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use tandem_collab::{ConnectionToggle, ProviderConfig, ProviderEvent, WebsocketProvider};
use tandem_core::{
    ChangeSource, DiagnosticSnapshot, DocumentHandle, EditorBinding, EditorSurface,
    RichTextBuffer, DEFAULT_TEXT_NAME,
};
use tandem_sandbox::{BootstrapManifest, Provisioner, SandboxWorker, WorkerConfig, WorkerOutput};

pub struct JoinOptions {
    pub url: String,
    pub room: String,
    pub name: Option<String>,
    pub presence: bool,
    pub sandbox: Option<SandboxLaunch>,
}

/// A sandbox to provision before its participant joins.
pub struct SandboxLaunch {
    pub provisioner: Provisioner,
    pub manifest: BootstrapManifest,
}

const HELP: &str = "type a line to append it; /toggle, /show, /diag, /quit";

pub async fn run(options: JoinOptions) -> Result<(), Box<dyn Error>> {
    let defaults = ProviderConfig::default();
    let config = ProviderConfig {
        presence: options.presence,
        user_name: options.name.unwrap_or(defaults.user_name.clone()),
        ..defaults
    };

    let doc = DocumentHandle::new();
    let editor = Arc::new(Mutex::new(RichTextBuffer::new()));
    let binding = EditorBinding::bind(doc.text(DEFAULT_TEXT_NAME), editor.clone())?;
    let provider = Arc::new(WebsocketProvider::new(
        options.url.as_str(),
        options.room.as_str(),
        doc.clone(),
        config.clone(),
    ));
    let toggle = ConnectionToggle::new(provider.clone());
    info!(
        "Joined room '{}' at {} as {}",
        options.room, options.url, config.user_name
    );

    // Remote edits: the binding's own hook runs first, so the editor
    // already shows them when this one fires.
    let (changed_tx, mut changed) = mpsc::unbounded_channel();
    let own = binding.id();
    let _remote = binding.text().on_commit(move |producer| {
        if producer != Some(own) {
            let _ = changed_tx.send(());
        }
    });
    let shown = editor.clone();
    tokio::spawn(async move {
        while changed.recv().await.is_some() {
            let contents = lock(&shown).contents();
            println!("» {}", contents.trim_end());
        }
    });

    let mut labels = toggle.labels();
    println!("[{}]  {HELP}", labels.current());
    tokio::spawn(async move {
        while let Some(label) = labels.changed().await {
            println!("[{label}]");
        }
    });

    let mut events = provider.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ProviderEvent::Status(state) => info!("Connection {state}"),
                ProviderEvent::Synced => info!("Synced with room"),
                ProviderEvent::PeerJoined(peer) => info!("{} joined", peer.name),
                ProviderEvent::PeerLeft(id) => info!("Peer {id} left"),
                ProviderEvent::PresenceExpired(id) => info!("Peer {id} went idle"),
                ProviderEvent::Presence(_) => {}
            }
        }
    });

    if let Some(launch) = options.sandbox {
        let (mut worker, report) = SandboxWorker::bootstrap(
            launch.provisioner,
            launch.manifest,
            WorkerConfig {
                url: Some(options.url.clone()),
                room: options.room.clone(),
                ..WorkerConfig::default()
            },
        )
        .await?;
        info!(
            "Sandbox provisioned in {:?} ({} steps)",
            report.elapsed(),
            report.completed()
        );
        tokio::spawn(async move {
            while let Some(output) = worker.recv().await {
                match output {
                    WorkerOutput::Status(status) => info!("Sandbox participant {status:?}"),
                    WorkerOutput::Delta(delta) => {
                        info!("Sandbox participant saw {:?}", delta.inserted_text())
                    }
                    WorkerOutput::Error(e) => warn!("Sandbox participant: {e}"),
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/toggle" => {
                toggle.activate();
            }
            "/show" => println!("{}", lock(&editor).contents()),
            "/diag" => {
                let snapshot = DiagnosticSnapshot::capture(&doc, binding.text(), Some(binding.id()))
                    .with_connection(provider.snapshot().await);
                println!("{}", snapshot.to_json_pretty()?);
            }
            "/quit" => break,
            "/help" => println!("{HELP}"),
            _ => {
                let mut surface = lock(&editor);
                let end = surface.len();
                surface.insert_text(end, &format!("{line}\n"), ChangeSource::User)?;
            }
        }
        // Divergence is fatal.
        binding.check()?;
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
