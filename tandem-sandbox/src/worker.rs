//! The sandboxed participant.
//!
//! The worker owns a second replica of the shared text on its own thread
//! with its own single-threaded runtime, and talks to the host only through
//! messages:
//!
//! ```text
//!   host ──WorkerInput::Delta──► worker: apply_delta(tag = worker)
//!   host ◄─WorkerOutput::Delta── worker: remote change (tag != worker)
//! ```
//!
//! Optionally it runs its own [`WebsocketProvider`] to the same room as the
//! host, making it an independent peer rather than a mirror.
//!
//! [`SandboxWorker::bootstrap`] is the normal way in: the worker only starts
//! once its sandbox has been provisioned.

use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use tandem_collab::{ProviderConfig, WebsocketProvider};
use tandem_core::{
    Delta, DocumentError, DocumentHandle, ProducerId, ReplicaText, TextContainer,
    DEFAULT_TEXT_NAME,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::engine::{BootReport, BootstrapError, Provisioner};
use crate::manifest::BootstrapManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The replica exists and accepts deltas.
    Ready,
    Stopped,
}

/// Messages the host posts to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerInput {
    /// An edit made in the host's editor.
    Delta(Delta),
    Shutdown,
}

/// Messages the worker posts back.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    Status(Status),
    /// A change that did not come from the host, to be shown in its editor.
    Delta(Delta),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sync endpoint. `None` keeps the replica local.
    pub url: Option<String>,
    pub room: String,
    pub text_name: String,
    pub provider: ProviderConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            url: None,
            room: "ws".to_string(),
            text_name: DEFAULT_TEXT_NAME.to_string(),
            provider: ProviderConfig {
                user_name: "sandbox".to_string(),
                ..ProviderConfig::default()
            },
        }
    }
}

/// Replica operations the host runs synchronously against the worker.
enum ReplicaCall {
    ApplyDelta(Delta, std_mpsc::SyncSender<Result<(), DocumentError>>),
    Content(std_mpsc::SyncSender<String>),
    StateVector(std_mpsc::SyncSender<Vec<u8>>),
    EncodeDiff(Vec<u8>, std_mpsc::SyncSender<Result<Vec<u8>, DocumentError>>),
    MergeUpdate(Vec<u8>, std_mpsc::SyncSender<Result<(), DocumentError>>),
}

/// Why a provisioned worker could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("failed to start sandbox worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl LaunchError {
    /// Per-step outcome of the provisioning run, if it got that far.
    pub fn report(&self) -> Option<&BootReport> {
        match self {
            LaunchError::Bootstrap(e) => e.report(),
            LaunchError::Spawn(_) => None,
        }
    }
}

enum Command {
    Input(WorkerInput),
    Replica(ReplicaCall),
}

/// Host-side handle to a running worker. Dropping it shuts the worker down.
pub struct SandboxWorker {
    commands: mpsc::UnboundedSender<Command>,
    outputs: mpsc::UnboundedReceiver<WorkerOutput>,
    thread: Option<JoinHandle<()>>,
}

impl SandboxWorker {
    pub fn spawn(config: WorkerConfig) -> std::io::Result<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (output_tx, outputs) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name("tandem-sandbox".to_string())
            .spawn(move || run_worker(config, command_rx, output_tx))?;
        Ok(Self {
            commands,
            outputs,
            thread: Some(thread),
        })
    }

    /// Run `manifest`, then start the worker. Nothing is spawned unless
    /// every step completed.
    pub async fn bootstrap(
        provisioner: Provisioner,
        manifest: BootstrapManifest,
        config: WorkerConfig,
    ) -> Result<(Self, BootReport), LaunchError> {
        let report = provisioner.spawn(manifest).wait().await?;
        log::info!(
            "Sandbox provisioned in {:?}; starting worker",
            report.elapsed()
        );
        let worker = Self::spawn(config)?;
        Ok((worker, report))
    }

    /// Post a message. `false` once the worker has stopped.
    pub fn post(&self, input: WorkerInput) -> bool {
        self.commands.send(Command::Input(input)).is_ok()
    }

    pub async fn recv(&mut self) -> Option<WorkerOutput> {
        self.outputs.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WorkerOutput> {
        self.outputs.try_recv().ok()
    }

    /// Wait for the next `Status` message, passing over anything else.
    pub async fn wait_for_status(&mut self) -> Option<Status> {
        while let Some(output) = self.outputs.recv().await {
            if let WorkerOutput::Status(status) = output {
                return Some(status);
            }
        }
        None
    }

    fn call<T>(
        &self,
        make: impl FnOnce(std_mpsc::SyncSender<T>) -> ReplicaCall,
    ) -> Result<T, DocumentError> {
        let (reply, response) = std_mpsc::sync_channel(1);
        self.commands
            .send(Command::Replica(make(reply)))
            .map_err(|_| DocumentError::Unavailable("sandbox worker stopped".to_string()))?;
        response
            .recv()
            .map_err(|_| DocumentError::Unavailable("sandbox worker dropped the call".to_string()))
    }
}

impl ReplicaText for SandboxWorker {
    fn apply_delta(&self, delta: &Delta) -> Result<(), DocumentError> {
        self.call(|reply| ReplicaCall::ApplyDelta(delta.clone(), reply))?
    }

    fn content(&self) -> String {
        self.call(ReplicaCall::Content).unwrap_or_else(|e| {
            log::warn!("Reading sandbox content failed: {e}");
            String::new()
        })
    }

    fn state_vector(&self) -> Result<Vec<u8>, DocumentError> {
        self.call(ReplicaCall::StateVector)
    }

    fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        self.call(|reply| ReplicaCall::EncodeDiff(remote_state_vector.to_vec(), reply))?
    }

    fn merge_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        self.call(|reply| ReplicaCall::MergeUpdate(update.to_vec(), reply))?
    }
}

impl Drop for SandboxWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Input(WorkerInput::Shutdown));
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Sandbox worker thread panicked");
            }
        }
    }
}

fn run_worker(
    config: WorkerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    outputs: mpsc::UnboundedSender<WorkerOutput>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Sandbox runtime failed to start: {e}");
            let _ = outputs.send(WorkerOutput::Error(e.to_string()));
            return;
        }
    };
    runtime.block_on(serve(config, commands, outputs));
}

async fn serve(
    config: WorkerConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    outputs: mpsc::UnboundedSender<WorkerOutput>,
) {
    let doc = DocumentHandle::new();
    let text = doc.text(&config.text_name);
    let own = ProducerId::next();

    let forward = outputs.clone();
    let _subscription = text.observe(move |change| {
        if change.producer != Some(own) && !change.delta.is_empty() {
            let _ = forward.send(WorkerOutput::Delta(change.delta));
        }
    });

    let _provider = config.url.as_ref().map(|url| {
        log::info!("Sandbox worker joining room '{}' at {url}", config.room);
        WebsocketProvider::new(url.clone(), config.room.clone(), doc.clone(), config.provider.clone())
    });

    let _ = outputs.send(WorkerOutput::Status(Status::Ready));
    log::debug!("Sandbox worker ready as {own}");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Input(WorkerInput::Delta(delta)) => {
                if let Err(e) = text.apply_delta(Some(own), &delta) {
                    log::warn!("Sandbox rejected delta: {e}");
                    let _ = outputs.send(WorkerOutput::Error(e.to_string()));
                }
            }
            Command::Input(WorkerInput::Shutdown) => break,
            Command::Replica(call) => answer(&text, own, call),
        }
    }

    let _ = outputs.send(WorkerOutput::Status(Status::Stopped));
    log::debug!("Sandbox worker stopped");
}

fn answer(text: &TextContainer, own: ProducerId, call: ReplicaCall) {
    // A dropped reply channel means the caller gave up; nothing to do.
    match call {
        ReplicaCall::ApplyDelta(delta, reply) => {
            let _ = reply.send(text.apply_delta(Some(own), &delta));
        }
        ReplicaCall::Content(reply) => {
            let _ = reply.send(text.content());
        }
        ReplicaCall::StateVector(reply) => {
            let _ = reply.send(text.state_vector());
        }
        ReplicaCall::EncodeDiff(sv, reply) => {
            let _ = reply.send(text.encode_diff(&sv));
        }
        ReplicaCall::MergeUpdate(update, reply) => {
            let _ = reply.send(text.merge_update(None, &update).map(|_| ()));
        }
    }
}
