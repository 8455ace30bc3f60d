//! The isolated runtime being provisioned.
//!
//! [`Sandbox`] is the seam the provisioning engine drives. [`FsSandbox`]
//! implements it on a directory:
//!
//! ```text
//!   root/
//!     fs/              virtual filesystem the runtime sees
//!     site-packages/   one JSON record per installed package
//! ```
//!
//! Imported modules are kept in an in-memory registry that the caller
//! reads to decide when to hand control over.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("path {0} escapes the sandbox filesystem")]
    InvalidPath(PathBuf),
    #[error("{0} is not in the sandbox filesystem")]
    MissingFile(PathBuf),
    #[error("{package} requires {requires}, which is not installed")]
    MissingDependency { package: String, requires: String },
    #[error("no module named '{0}'")]
    ModuleNotFound(String),
    #[error("bad install record: {0}")]
    Record(#[from] serde_json::Error),
}

/// What to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// An archive already written into the sandbox filesystem.
    LocalPath(PathBuf),
    /// A package name resolved by the sandbox's registry.
    Registry(String),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::LocalPath(path) => write!(f, "emfs:./{}", path.display()),
            Requirement::Registry(name) => f.write_str(name),
        }
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn load_environment(&self, packages: &[String]) -> Result<(), SandboxError>;

    /// Write `contents` at `path` inside the sandbox filesystem.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SandboxError>;

    async fn install(&self, requirement: &Requirement) -> Result<(), SandboxError>;

    async fn import_module(&self, module: &str) -> Result<(), SandboxError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: Option<String>,
    pub source: String,
}

/// Package names compare case-insensitively with `-` and `_` equal.
pub fn normalize_package(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

/// Name and version out of an archive file name such as
/// `y_py-0.5.5-cp310-cp310-emscripten_3_1_14_wasm32.whl`.
fn archive_identity(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut parts = stem.splitn(3, '-');
    let name = parts.next().unwrap_or_default().to_string();
    let version = parts.next().map(str::to_string);
    (name, version)
}

/// A sandbox backed by a directory tree.
pub struct FsSandbox {
    root: PathBuf,
    dependencies: HashMap<String, Vec<String>>,
    modules: Mutex<Vec<String>>,
}

impl FsSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dependencies: HashMap::new(),
            modules: Mutex::new(Vec::new()),
        }
    }

    /// A sandbox that knows the sync layer needs the native types wheel.
    pub fn pyodide(root: impl Into<PathBuf>) -> Self {
        Self::new(root).with_dependency(crate::manifest::SYNC_LAYER_PACKAGE, "y_py")
    }

    /// Refuse to install `package` until `requires` is installed.
    pub fn with_dependency(mut self, package: &str, requires: &str) -> Self {
        self.dependencies
            .entry(normalize_package(package))
            .or_default()
            .push(normalize_package(requires));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs_root(&self) -> PathBuf {
        self.root.join("fs")
    }

    fn site_packages(&self) -> PathBuf {
        self.root.join("site-packages")
    }

    /// Map a sandbox path onto the host, rejecting anything outside `fs/`.
    fn host_path(&self, path: &Path) -> Result<PathBuf, SandboxError> {
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || relative.as_os_str().is_empty() {
            return Err(SandboxError::InvalidPath(path.to_path_buf()));
        }
        Ok(self.fs_root().join(relative))
    }

    pub async fn read_file(&self, path: &Path) -> Result<Vec<u8>, SandboxError> {
        let host = self.host_path(path)?;
        tokio::fs::read(&host)
            .await
            .map_err(|source| SandboxError::Io { path: host, source })
    }

    pub async fn is_installed(&self, package: &str) -> bool {
        tokio::fs::try_exists(self.record_path(package))
            .await
            .unwrap_or(false)
    }

    pub async fn installed(&self) -> Result<Vec<InstalledPackage>, SandboxError> {
        let dir = self.site_packages();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SandboxError::Io { path: dir, source }),
        };
        let mut packages: Vec<InstalledPackage> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| SandboxError::Io {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|source| SandboxError::Io { path, source })?;
            packages.push(serde_json::from_slice(&raw)?);
        }
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packages)
    }

    /// Modules imported so far, in import order.
    pub fn imported(&self) -> Vec<String> {
        match self.modules.lock() {
            Ok(modules) => modules.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_path(&self, package: &str) -> PathBuf {
        self.site_packages()
            .join(format!("{}.json", normalize_package(package)))
    }

    async fn record(&self, package: InstalledPackage) -> Result<(), SandboxError> {
        for requires in self
            .dependencies
            .get(&normalize_package(&package.name))
            .into_iter()
            .flatten()
        {
            if !self.is_installed(requires).await {
                return Err(SandboxError::MissingDependency {
                    package: package.name.clone(),
                    requires: requires.clone(),
                });
            }
        }
        let dir = self.site_packages();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| SandboxError::Io { path: dir, source })?;
        let path = self.record_path(&package.name);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&package)?)
            .await
            .map_err(|source| SandboxError::Io { path, source })?;
        log::info!(
            "Installed {} {} from {}",
            package.name,
            package.version.as_deref().unwrap_or("(unversioned)"),
            package.source
        );
        Ok(())
    }
}

#[async_trait]
impl Sandbox for FsSandbox {
    async fn load_environment(&self, packages: &[String]) -> Result<(), SandboxError> {
        let fs = self.fs_root();
        tokio::fs::create_dir_all(&fs)
            .await
            .map_err(|source| SandboxError::Io { path: fs, source })?;
        for name in packages {
            self.record(InstalledPackage {
                name: name.clone(),
                version: None,
                source: "environment".to_string(),
            })
            .await?;
        }
        log::debug!("Sandbox environment ready at {}", self.root.display());
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SandboxError> {
        let host = self.host_path(path)?;
        if let Some(parent) = host.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SandboxError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&host, contents)
            .await
            .map_err(|source| SandboxError::Io { path: host, source })?;
        log::trace!("wrote {} bytes to {}", contents.len(), path.display());
        Ok(())
    }

    async fn install(&self, requirement: &Requirement) -> Result<(), SandboxError> {
        let package = match requirement {
            Requirement::LocalPath(path) => {
                let host = self.host_path(path)?;
                if !tokio::fs::try_exists(&host).await.unwrap_or(false) {
                    return Err(SandboxError::MissingFile(path.clone()));
                }
                let (name, version) = archive_identity(path);
                InstalledPackage {
                    name,
                    version,
                    source: requirement.to_string(),
                }
            }
            Requirement::Registry(name) => InstalledPackage {
                name: name.clone(),
                version: None,
                source: "registry".to_string(),
            },
        };
        self.record(package).await
    }

    async fn import_module(&self, module: &str) -> Result<(), SandboxError> {
        let file = PathBuf::from(format!("{}.py", module.replace('.', "/")));
        let host = self.host_path(&file)?;
        if !tokio::fs::try_exists(&host).await.unwrap_or(false) {
            return Err(SandboxError::ModuleNotFound(module.to_string()));
        }
        match self.modules.lock() {
            Ok(mut modules) => modules.push(module.to_string()),
            Err(poisoned) => poisoned.into_inner().push(module.to_string()),
        }
        log::info!("Imported module '{module}'");
        Ok(())
    }
}
