//! Provisioning and hosting of the sandboxed second participant.
//!
//! ```text
//!   BootstrapManifest ──► Provisioner ──fetch──► Fetcher (HTTP / directory)
//!                             │
//!                             └──write/install/import──► Sandbox (FsSandbox)
//!
//!   SandboxWorker::bootstrap: Provisioner ──Ok──► worker thread (own replica)
//!                                         └─Err─► LaunchError, nothing spawned
//! ```
//!
//! The manifest states the install order as data; the provisioner enforces
//! it and stops at the first failure.

pub mod engine;
pub mod fetch;
pub mod manifest;
pub mod sandbox;
pub mod worker;

pub use engine::{
    BootReport, BootstrapError, BootstrapHandle, Provisioner, StepFailure, StepReport, StepStatus,
};
pub use fetch::{FetchError, Fetcher, FileFetcher, HttpFetcher};
pub use manifest::{
    BootstrapManifest, CachePolicy, ManifestError, ProvisionAction, ProvisionStep, StepId,
};
pub use sandbox::{FsSandbox, InstalledPackage, Requirement, Sandbox, SandboxError};
pub use worker::{LaunchError, SandboxWorker, Status, WorkerConfig, WorkerInput, WorkerOutput};
