//! Sequential provisioning engine.
//!
//! Steps run one at a time in manifest order. A step starts only when all of
//! its predecessors are `Completed`; the first failure stops the run and
//! every step after it is reported `Skipped`. Callers see one outcome,
//! through [`BootstrapHandle::wait`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::fetch::{FetchError, Fetcher};
use crate::manifest::{BootstrapManifest, CachePolicy, ManifestError, ProvisionAction, StepId};
use crate::sandbox::{Requirement, Sandbox, SandboxError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub id: StepId,
    pub status: StepStatus,
    pub elapsed: Duration,
}

/// Outcome of every step, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    pub steps: Vec<StepReport>,
}

impl BootReport {
    pub fn status(&self, id: &str) -> Option<&StepStatus> {
        self.steps
            .iter()
            .find(|s| s.id.as_str() == id)
            .map(|s| &s.status)
    }

    pub fn completed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn elapsed(&self) -> Duration {
        self.steps.iter().map(|s| s.elapsed).sum()
    }

    fn is_completed(&self, id: &StepId) -> bool {
        self.steps
            .iter()
            .any(|s| &s.id == id && s.status == StepStatus::Completed)
    }
}

/// Why a single step failed.
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("predecessor '{0}' has not completed")]
    Blocked(StepId),
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("bootstrap step '{step}' failed: {cause}")]
    StepFailed {
        step: StepId,
        #[source]
        cause: StepFailure,
        report: BootReport,
    },
    #[error("bootstrap was abandoned before completing")]
    Aborted,
}

impl BootstrapError {
    /// Per-step outcome, when the run got as far as executing steps.
    pub fn report(&self) -> Option<&BootReport> {
        match self {
            BootstrapError::StepFailed { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Completion signal of a spawned bootstrap run.
pub struct BootstrapHandle {
    done: oneshot::Receiver<Result<BootReport, BootstrapError>>,
}

impl BootstrapHandle {
    /// Wait for the run to finish. Resolves exactly once, success or failure.
    pub async fn wait(self) -> Result<BootReport, BootstrapError> {
        self.done.await.unwrap_or(Err(BootstrapError::Aborted))
    }
}

pub struct Provisioner {
    fetcher: Arc<dyn Fetcher>,
    sandbox: Arc<dyn Sandbox>,
}

impl Provisioner {
    pub fn new(fetcher: Arc<dyn Fetcher>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { fetcher, sandbox }
    }

    /// Run `manifest` on a background task.
    pub fn spawn(self, manifest: BootstrapManifest) -> BootstrapHandle {
        let (tx, done) = oneshot::channel();
        tokio::spawn(async move {
            let result = self.run(&manifest).await;
            // The waiter may be gone; the outcome is already logged.
            let _ = tx.send(result);
        });
        BootstrapHandle { done }
    }

    pub async fn run(&self, manifest: &BootstrapManifest) -> Result<BootReport, BootstrapError> {
        manifest.validate()?;
        log::info!("Bootstrapping sandbox: {} steps", manifest.len());

        let mut report = BootReport::default();
        let mut steps = manifest.steps().iter();
        while let Some(step) = steps.next() {
            let started = Instant::now();
            let outcome = match step.after.iter().find(|p| !report.is_completed(p)) {
                Some(blocked) => Err(StepFailure::Blocked(blocked.clone())),
                None => self.execute(&step.action).await,
            };
            let elapsed = started.elapsed();

            match outcome {
                Ok(()) => {
                    log::info!(
                        "Bootstrap step '{}' ({}) completed in {elapsed:?}",
                        step.id,
                        step.action.kind()
                    );
                    report.steps.push(StepReport {
                        id: step.id.clone(),
                        status: StepStatus::Completed,
                        elapsed,
                    });
                }
                Err(cause) => {
                    log::error!("Bootstrap step '{}' failed: {cause}", step.id);
                    report.steps.push(StepReport {
                        id: step.id.clone(),
                        status: StepStatus::Failed(cause.to_string()),
                        elapsed,
                    });
                    for rest in steps.by_ref() {
                        report.steps.push(StepReport {
                            id: rest.id.clone(),
                            status: StepStatus::Skipped,
                            elapsed: Duration::ZERO,
                        });
                    }
                    return Err(BootstrapError::StepFailed {
                        step: step.id.clone(),
                        cause,
                        report,
                    });
                }
            }
        }
        log::info!("Sandbox ready after {:?}", report.elapsed());
        Ok(report)
    }

    async fn execute(&self, action: &ProvisionAction) -> Result<(), StepFailure> {
        match action {
            ProvisionAction::LoadEnvironment { packages } => {
                self.sandbox.load_environment(packages).await?;
            }
            ProvisionAction::FetchInstall {
                source,
                destination,
            } => {
                let archive = self.fetcher.fetch(source, CachePolicy::Default).await?;
                self.sandbox.write_file(destination, &archive).await?;
                self.sandbox
                    .install(&Requirement::LocalPath(destination.clone()))
                    .await?;
            }
            ProvisionAction::RegistryInstall { package } => {
                self.sandbox
                    .install(&Requirement::Registry(package.clone()))
                    .await?;
            }
            ProvisionAction::FetchImport {
                source,
                destination,
                module,
                cache,
            } => {
                let script = self.fetcher.fetch(source, *cache).await?;
                self.sandbox.write_file(destination, &script).await?;
                self.sandbox.import_module(module).await?;
            }
        }
        Ok(())
    }
}
