//! Declarative provisioning manifest.
//!
//! A manifest is an ordered list of steps. Each step names the steps that
//! must have completed before it may start. Predecessors have to be
//! declared earlier in the list, which rules out cycles and makes the
//! declaration order a valid execution order.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wheel holding the native replicated-text types for the sandbox. It is not
/// on the sandbox's package registry, so it is served next to the worker.
pub const NATIVE_TYPES_WHEEL: &str = "y_py-0.5.5-cp310-cp310-emscripten_3_1_14_wasm32.whl";

/// Registry package providing the sandbox's sync layer. Needs the wheel above.
pub const SYNC_LAYER_PACKAGE: &str = "ypy-websocket";

/// Second-stage script handed control once provisioning is done.
pub const WORKER_SCRIPT: &str = "worker.py";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a fetch may be answered from a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    Default,
    /// Always go to the origin.
    Bypass,
}

impl CachePolicy {
    /// Request headers this policy adds.
    pub fn headers(self) -> &'static [(&'static str, &'static str)] {
        match self {
            CachePolicy::Default => &[],
            CachePolicy::Bypass => &[("pragma", "no-cache"), ("cache-control", "no-cache")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProvisionAction {
    /// Bring up the sandbox's base environment with the given bundled packages.
    LoadEnvironment { packages: Vec<String> },
    /// Fetch an archive into the sandbox filesystem, then install it from there.
    FetchInstall { source: String, destination: PathBuf },
    /// Install a package from the sandbox's own registry.
    RegistryInstall { package: String },
    /// Fetch a module into the sandbox filesystem and import it.
    FetchImport {
        source: String,
        destination: PathBuf,
        module: String,
        #[serde(default)]
        cache: CachePolicy,
    },
}

impl ProvisionAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionAction::LoadEnvironment { .. } => "load-environment",
            ProvisionAction::FetchInstall { .. } => "fetch-install",
            ProvisionAction::RegistryInstall { .. } => "registry-install",
            ProvisionAction::FetchImport { .. } => "fetch-import",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStep {
    pub id: StepId,
    #[serde(flatten)]
    pub action: ProvisionAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<StepId>,
}

impl ProvisionStep {
    pub fn new(id: impl Into<StepId>, action: ProvisionAction) -> Self {
        Self {
            id: id.into(),
            action,
            after: Vec::new(),
        }
    }

    /// Require `predecessor` to complete before this step starts.
    pub fn after(mut self, predecessor: impl Into<StepId>) -> Self {
        self.after.push(predecessor.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("step '{0}' is declared more than once")]
    DuplicateStep(StepId),
    #[error("step '{step}' waits for unknown step '{predecessor}'")]
    UnknownPredecessor { step: StepId, predecessor: StepId },
    #[error("step '{step}' waits for '{predecessor}', which is not declared before it")]
    ForwardReference { step: StepId, predecessor: StepId },
    #[error("invalid manifest: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapManifest {
    steps: Vec<ProvisionStep>,
}

impl BootstrapManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: ProvisionStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[ProvisionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check ids are unique and every predecessor is declared earlier.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let all: HashSet<&StepId> = self.steps.iter().map(|s| &s.id).collect();
        let mut seen = HashSet::new();
        for step in &self.steps {
            for predecessor in &step.after {
                if !seen.contains(predecessor) {
                    return Err(if all.contains(predecessor) {
                        ManifestError::ForwardReference {
                            step: step.id.clone(),
                            predecessor: predecessor.clone(),
                        }
                    } else {
                        ManifestError::UnknownPredecessor {
                            step: step.id.clone(),
                            predecessor: predecessor.clone(),
                        }
                    });
                }
            }
            if !seen.insert(&step.id) {
                return Err(ManifestError::DuplicateStep(step.id.clone()));
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| ManifestError::Parse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// The browser sandbox sequence: base environment with the package
    /// installer, the native types wheel from the worker's own origin, the
    /// sync layer from the registry, then the worker script fetched past
    /// every cache and imported.
    pub fn pyodide_default() -> Self {
        Self::new()
            .step(ProvisionStep::new(
                "environment",
                ProvisionAction::LoadEnvironment {
                    packages: vec!["micropip".to_string()],
                },
            ))
            .step(
                ProvisionStep::new(
                    "native-types",
                    ProvisionAction::FetchInstall {
                        source: NATIVE_TYPES_WHEEL.to_string(),
                        destination: PathBuf::from(NATIVE_TYPES_WHEEL),
                    },
                )
                .after("environment"),
            )
            .step(
                ProvisionStep::new(
                    "sync-layer",
                    ProvisionAction::RegistryInstall {
                        package: SYNC_LAYER_PACKAGE.to_string(),
                    },
                )
                .after("native-types"),
            )
            .step(
                ProvisionStep::new(
                    "worker",
                    ProvisionAction::FetchImport {
                        source: WORKER_SCRIPT.to_string(),
                        destination: PathBuf::from(WORKER_SCRIPT),
                        module: "worker".to_string(),
                        cache: CachePolicy::Bypass,
                    },
                )
                .after("sync-layer"),
            )
    }
}
