//! Provisioning runs against a real filesystem sandbox.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tandem_sandbox::manifest::NATIVE_TYPES_WHEEL;
use tandem_sandbox::{
    BootstrapError, BootstrapManifest, FileFetcher, FsSandbox, LaunchError, Provisioner,
    Requirement, Sandbox, SandboxError, SandboxWorker, Status, StepStatus, WorkerConfig,
};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// A directory laid out like the worker's static origin.
fn origin(with_wheel: bool) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    if with_wheel {
        std::fs::write(dir.path().join(NATIVE_TYPES_WHEEL), b"wheel bytes").unwrap();
    }
    std::fs::write(dir.path().join("worker.py"), b"binding = QuillBinding()").unwrap();
    dir
}

#[tokio::test]
async fn test_default_manifest_provisions_filesystem_sandbox() {
    let origin = origin(true);
    let root = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(FsSandbox::pyodide(root.path()));

    let report = Provisioner::new(Arc::new(FileFetcher::new(origin.path())), sandbox.clone())
        .spawn(BootstrapManifest::pyodide_default())
        .wait()
        .await
        .unwrap();

    assert_eq!(report.completed(), 4);
    assert!(sandbox.is_installed("y-py").await);
    assert!(sandbox.is_installed("ypy_websocket").await);
    assert_eq!(sandbox.imported(), ["worker"]);
    assert_eq!(
        sandbox.read_file(Path::new("worker.py")).await.unwrap(),
        b"binding = QuillBinding()"
    );

    let wheel = sandbox
        .installed()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.name == "y_py")
        .unwrap();
    assert_eq!(wheel.version.as_deref(), Some("0.5.5"));
    assert_eq!(wheel.source, format!("emfs:./{NATIVE_TYPES_WHEEL}"));
}

#[tokio::test]
async fn test_missing_wheel_is_fatal() {
    let origin = origin(false);
    let root = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(FsSandbox::pyodide(root.path()));

    let err = Provisioner::new(Arc::new(FileFetcher::new(origin.path())), sandbox.clone())
        .spawn(BootstrapManifest::pyodide_default())
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::StepFailed { ref step, .. } if step.as_str() == "native-types"));
    let report = err.report().unwrap();
    assert_eq!(report.status("sync-layer"), Some(&StepStatus::Skipped));
    assert_eq!(report.status("worker"), Some(&StepStatus::Skipped));

    assert!(!sandbox.is_installed("ypy-websocket").await);
    assert!(sandbox.imported().is_empty());
    assert!(sandbox.read_file(Path::new("worker.py")).await.is_err());
}

#[tokio::test]
async fn test_worker_starts_after_provisioning() {
    let origin = origin(true);
    let root = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(FsSandbox::pyodide(root.path()));
    let provisioner = Provisioner::new(Arc::new(FileFetcher::new(origin.path())), sandbox.clone());

    let (mut worker, report) = SandboxWorker::bootstrap(
        provisioner,
        BootstrapManifest::pyodide_default(),
        WorkerConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.completed(), 4);
    assert_eq!(sandbox.imported(), ["worker"]);
    let status = timeout(Duration::from_secs(5), worker.wait_for_status())
        .await
        .unwrap();
    assert_eq!(status, Some(Status::Ready));
}

#[tokio::test]
async fn test_failed_provisioning_starts_no_worker() {
    let origin = origin(false);
    let root = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(FsSandbox::pyodide(root.path()));
    let provisioner = Provisioner::new(Arc::new(FileFetcher::new(origin.path())), sandbox.clone());

    let result = SandboxWorker::bootstrap(
        provisioner,
        BootstrapManifest::pyodide_default(),
        WorkerConfig::default(),
    )
    .await;

    let err = match result {
        Ok(_) => panic!("worker started without a provisioned sandbox"),
        Err(err) => err,
    };
    assert!(matches!(
        err,
        LaunchError::Bootstrap(BootstrapError::StepFailed { ref step, .. })
            if step.as_str() == "native-types"
    ));
    assert_eq!(err.report().unwrap().status("worker"), Some(&StepStatus::Skipped));
    assert!(sandbox.imported().is_empty());
}

/// Wraps a sandbox and holds the first install until released.
struct GatedSandbox {
    inner: FsSandbox,
    events: mpsc::UnboundedSender<String>,
    gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
}

#[async_trait]
impl Sandbox for GatedSandbox {
    async fn load_environment(&self, packages: &[String]) -> Result<(), SandboxError> {
        self.inner.load_environment(packages).await
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SandboxError> {
        self.inner.write_file(path, contents).await
    }

    async fn install(&self, requirement: &Requirement) -> Result<(), SandboxError> {
        self.events.send(format!("start {requirement}")).unwrap();
        if let Some(gate) = self.gate.lock().await.take() {
            gate.await.unwrap();
        }
        self.inner.install(requirement).await?;
        self.events.send(format!("done {requirement}")).unwrap();
        Ok(())
    }

    async fn import_module(&self, module: &str) -> Result<(), SandboxError> {
        self.events.send(format!("import {module}")).unwrap();
        self.inner.import_module(module).await
    }
}

#[tokio::test]
async fn test_sync_layer_waits_for_delayed_wheel_install() {
    let origin = origin(true);
    let root = tempfile::tempdir().unwrap();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (release, gate) = tokio::sync::oneshot::channel();
    let sandbox = Arc::new(GatedSandbox {
        inner: FsSandbox::pyodide(root.path()),
        events: events_tx,
        gate: Mutex::new(Some(gate)),
    });

    let handle = Provisioner::new(Arc::new(FileFetcher::new(origin.path())), sandbox)
        .spawn(BootstrapManifest::pyodide_default());

    let wheel = format!("emfs:./{NATIVE_TYPES_WHEEL}");
    let first = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(first, Some(format!("start {wheel}")));

    // Held: nothing else may start.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.try_recv().is_err());

    release.send(()).unwrap();
    let report = timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.completed(), 4);

    let mut rest = Vec::new();
    while let Ok(event) = events.try_recv() {
        rest.push(event);
    }
    assert_eq!(
        rest,
        [
            format!("done {wheel}"),
            "start ypy-websocket".to_string(),
            "done ypy-websocket".to_string(),
            "import worker".to_string(),
        ]
    );
}
