mod accept;
mod mixed;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use pool_outbound::Outbound;
use tokio::task::JoinHandle;
use tracing::info;

/// One running mixed inbound. Aborts its accept loop when dropped, so
/// removing an entry from a [`ListenerSet`] is enough to tear it down.
pub struct ListenerHandle {
    pub local_port: u16,
    handle: JoinHandle<()>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn spawn_listener(local_port: u16, outbound: Arc<Outbound>) -> ListenerHandle {
    let handle = tokio::spawn(async move {
        if let Err(e) = accept::accept_loop(local_port, outbound).await {
            tracing::error!(
                target: "pool::listener",
                local_port,
                error = ?e,
                "mixed inbound accept loop exited"
            );
        }
    });
    ListenerHandle { local_port, handle }
}

/// The installed set of mixed inbounds, keyed by proxy name. `install` is the
/// only mutating entry point: it is always given the complete desired set and
/// reconciles it, matching the facade's "replace, don't incrementally patch"
/// contract.
#[derive(Default)]
pub struct ListenerSet {
    handles: DashMap<String, ListenerHandle>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_port(&self, name: &str) -> Option<u16> {
        self.handles.get(name).map(|h| h.local_port)
    }

    /// Any currently installed local port; used by the risk-score probe,
    /// which only needs some proxy-routed HTTP endpoint to scrape through.
    pub fn any_local_port(&self) -> Option<u16> {
        self.handles.iter().next().map(|h| h.local_port)
    }

    /// Atomically makes `desired` the full set of active inbounds. Entries
    /// already running on the same port are left untouched; everything else
    /// is (re)spawned. When `drop_old` is true, entries not present in
    /// `desired` are removed (and their accept loop aborted via `Drop`).
    pub fn install(&self, desired: Vec<(String, u16, Arc<Outbound>)>, drop_old: bool) {
        let desired_names: HashSet<&str> = desired.iter().map(|(name, _, _)| name.as_str()).collect();

        for (name, local_port, outbound) in desired {
            let needs_respawn = match self.handles.get(&name) {
                Some(existing) => existing.local_port != local_port,
                None => true,
            };
            if needs_respawn {
                let handle = spawn_listener(local_port, outbound);
                info!(target: "pool::listener", proxy = %name, local_port, "installed mixed inbound");
                self.handles.insert(name, handle);
            }
        }

        if drop_old {
            let stale: Vec<String> = self
                .handles
                .iter()
                .filter(|entry| !desired_names.contains(entry.key().as_str()))
                .map(|entry| entry.key().clone())
                .collect();
            for name in stale {
                self.handles.remove(&name);
            }
        }
    }

    pub fn remove(&self, name: &str) {
        self.handles.remove(name);
    }
}
