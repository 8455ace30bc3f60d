//! Connect/Disconnect toggle over a provider's lifecycle.
//!
//! The toggle keeps no state of its own. Its label is always derived from
//! the provider's `should_connect` flag, so it stays right when something
//! else (a CLI command, reconnect logic) changes that flag.

use std::sync::Arc;
use tokio::sync::watch;

use crate::provider::WebsocketProvider;

/// The lifecycle surface a toggle drives.
pub trait ConnectionLifecycle: Send + Sync {
    fn should_connect(&self) -> bool;
    fn connect(&self);
    fn disconnect(&self);
    fn watch_should_connect(&self) -> watch::Receiver<bool>;
}

impl ConnectionLifecycle for WebsocketProvider {
    fn should_connect(&self) -> bool {
        WebsocketProvider::should_connect(self)
    }

    fn connect(&self) {
        WebsocketProvider::connect(self)
    }

    fn disconnect(&self) {
        WebsocketProvider::disconnect(self)
    }

    fn watch_should_connect(&self) -> watch::Receiver<bool> {
        WebsocketProvider::watch_should_connect(self)
    }
}

/// What the control offers to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleLabel {
    Connect,
    Disconnect,
}

impl ToggleLabel {
    pub fn for_desired(should_connect: bool) -> Self {
        if should_connect {
            ToggleLabel::Disconnect
        } else {
            ToggleLabel::Connect
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleLabel::Connect => "Connect",
            ToggleLabel::Disconnect => "Disconnect",
        }
    }
}

impl std::fmt::Display for ToggleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single control bound to one lifecycle.
pub struct ConnectionToggle<L: ConnectionLifecycle + ?Sized> {
    lifecycle: Arc<L>,
}

impl<L: ConnectionLifecycle + ?Sized> ConnectionToggle<L> {
    pub fn new(lifecycle: Arc<L>) -> Self {
        Self { lifecycle }
    }

    /// Flip the desired state and return the new label.
    pub fn activate(&self) -> ToggleLabel {
        if self.lifecycle.should_connect() {
            self.lifecycle.disconnect();
        } else {
            self.lifecycle.connect();
        }
        let label = self.label();
        log::debug!("Connection toggle now offers '{label}'");
        label
    }

    pub fn label(&self) -> ToggleLabel {
        ToggleLabel::for_desired(self.lifecycle.should_connect())
    }

    /// Follow label changes, whoever causes them.
    pub fn labels(&self) -> LabelWatch {
        LabelWatch {
            rx: self.lifecycle.watch_should_connect(),
        }
    }
}

pub struct LabelWatch {
    rx: watch::Receiver<bool>,
}

impl LabelWatch {
    pub fn current(&mut self) -> ToggleLabel {
        ToggleLabel::for_desired(*self.rx.borrow_and_update())
    }

    /// Next label after a change; `None` once the lifecycle is gone.
    pub async fn changed(&mut self) -> Option<ToggleLabel> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }
}
