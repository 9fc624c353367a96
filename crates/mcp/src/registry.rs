//! Reconciles running server connections with the configured server set.
//!
//! Each server maps to a shared, possibly still running, connection future.
//! A reconciliation replaces every entry synchronously with a new future that
//! first waits for the previous one, then reuses, replaces or keeps it. Only
//! the most recent reconciliation may replace a connection; an older one that
//! finishes late hands back whatever it found.

use desk_core::McpServerConfig;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connector::{ConnectionFactory, McpConnector};
use crate::error::McpError;
use crate::launch::interpolate;
use crate::types::ToolInfo;

type ConnectorResult = Result<Arc<McpConnector>, Arc<McpError>>;
type ConnectorFuture = Shared<BoxFuture<'static, ConnectorResult>>;

struct RegistryState {
    connectors: IndexMap<String, ConnectorFuture>,
    project_dir: Option<PathBuf>,
    init_id: Uuid,
}

fn lock(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of all server connections of the process.
pub struct McpRegistry {
    factory: Arc<dyn ConnectionFactory>,
    state: Arc<Mutex<RegistryState>>,
}

impl McpRegistry {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            state: Arc::new(Mutex::new(RegistryState {
                connectors: IndexMap::new(),
                project_dir: None,
                init_id: Uuid::nil(),
            })),
        }
    }

    /// Bring connections in line with `configs`.
    ///
    /// Servers missing from `configs` are closed. The others reconnect when
    /// `force_reload` is set, when the project directory changes, or when
    /// their interpolated config differs; otherwise the live connection is
    /// kept. `project_dir` of `None` keeps the current directory.
    ///
    /// Returns the connectors of `enabled` (all servers when `None`) that came
    /// up; failures are logged and left out.
    pub async fn reinitialize(
        &self,
        configs: &BTreeMap<String, McpServerConfig>,
        project_dir: Option<&Path>,
        force_reload: bool,
        enabled: Option<&[String]>,
    ) -> Vec<Arc<McpConnector>> {
        let init_id = Uuid::new_v4();

        let removed: Vec<(String, ConnectorFuture)> = {
            let mut state = lock(&self.state);
            state.init_id = init_id;
            let stale: Vec<String> = state
                .connectors
                .keys()
                .filter(|name| !configs.contains_key(*name))
                .cloned()
                .collect();
            stale
                .into_iter()
                .filter_map(|name| state.connectors.shift_remove(&name).map(|f| (name, f)))
                .collect()
        };
        join_all(removed.into_iter().map(|(name, connector)| async move {
            close_connector(&name, connector).await;
            info!(server = %name, "Closed extraneous MCP connector");
        }))
        .await;

        let selected = {
            let mut state = lock(&self.state);
            let current = state.project_dir.clone();
            let project_dir = project_dir.map(Path::to_path_buf).or(current.clone());
            let force = force_reload || (project_dir.is_some() && project_dir != current);

            for (name, config) in configs {
                let previous = state.connectors.get(name).cloned();
                let connector = self.spawn_connector(
                    name.clone(),
                    config.clone(),
                    project_dir.clone(),
                    force,
                    init_id,
                    previous,
                );
                state.connectors.insert(name.clone(), connector);
            }
            state.project_dir = project_dir;

            match enabled {
                Some(names) => names
                    .iter()
                    .filter_map(|name| state.connectors.get(name).map(|f| (name.clone(), f.clone())))
                    .collect(),
                None => snapshot(&state),
            }
        };

        settle(selected).await
    }

    fn spawn_connector(
        &self,
        server_name: String,
        config: McpServerConfig,
        project_dir: Option<PathBuf>,
        force: bool,
        init_id: Uuid,
        previous: Option<ConnectorFuture>,
    ) -> ConnectorFuture {
        let task = tokio::spawn(init_connector(
            self.factory.clone(),
            self.state.clone(),
            server_name.clone(),
            config,
            project_dir,
            force,
            init_id,
            previous,
        ));
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(McpError::ServerUnavailable(format!(
                    "connector task for {server_name} failed: {e}"
                )))),
            }
        }
        .boxed()
        .shared()
    }

    /// Every connector that came up, in configuration order.
    pub async fn connectors(&self) -> Vec<Arc<McpConnector>> {
        let all = snapshot(&lock(&self.state));
        settle(all).await
    }

    /// Tools a server advertised, or `None` when it is unknown or failed.
    /// With `config`, the server is (re)initialized from it first.
    pub async fn server_tools(&self, server_name: &str, config: Option<&McpServerConfig>) -> Option<Vec<ToolInfo>> {
        let connector = {
            let mut state = lock(&self.state);
            if let Some(config) = config {
                let previous = state.connectors.get(server_name).cloned();
                let connector = self.spawn_connector(
                    server_name.to_string(),
                    config.clone(),
                    state.project_dir.clone(),
                    false,
                    state.init_id,
                    previous,
                );
                state.connectors.insert(server_name.to_string(), connector);
            }
            state.connectors.get(server_name).cloned()
        };

        let Some(connector) = connector else {
            warn!(server = server_name, "No MCP connector found for server");
            return None;
        };
        match connector.await {
            Ok(connector) => Some(connector.tools.clone()),
            Err(e) => {
                error!(server = server_name, error = %e, "Error retrieving tools for MCP server");
                None
            }
        }
    }

    /// Close every connection. The registry is empty afterwards.
    pub async fn close(&self) {
        let all: Vec<(String, ConnectorFuture)> = lock(&self.state).connectors.drain(..).collect();
        join_all(all.into_iter().map(|(name, connector)| async move {
            close_connector(&name, connector).await;
            debug!(server = %name, "Closed MCP client");
        }))
        .await;
    }
}

fn snapshot(state: &RegistryState) -> Vec<(String, ConnectorFuture)> {
    state
        .connectors
        .iter()
        .map(|(name, f)| (name.clone(), f.clone()))
        .collect()
}

/// Wait for all futures; keep the connectors that came up.
async fn settle(pending: Vec<(String, ConnectorFuture)>) -> Vec<Arc<McpConnector>> {
    let (names, futures): (Vec<String>, Vec<ConnectorFuture>) = pending.into_iter().unzip();
    let results = join_all(futures).await;
    names
        .into_iter()
        .zip(results)
        .filter_map(|(name, result)| match result {
            Ok(connector) => Some(connector),
            Err(e) => {
                warn!(server = %name, error = %e, "MCP connector failed to start");
                None
            }
        })
        .collect()
}

async fn close_connector(server_name: &str, connector: ConnectorFuture) {
    match connector.await {
        Ok(connector) => {
            if let Err(e) = connector.connection.close().await {
                error!(server = server_name, error = %e, "Error closing MCP connector");
            }
        }
        Err(e) => debug!(server = server_name, error = %e, "Connector to close never came up"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn init_connector(
    factory: Arc<dyn ConnectionFactory>,
    state: Arc<Mutex<RegistryState>>,
    server_name: String,
    config: McpServerConfig,
    project_dir: Option<PathBuf>,
    force: bool,
    init_id: Uuid,
    previous: Option<ConnectorFuture>,
) -> ConnectorResult {
    let config = interpolate(&config, project_dir.as_deref());

    if let Some(previous) = previous {
        match previous.await {
            Ok(old) => {
                if lock(&state).init_id != init_id {
                    info!(server = %server_name, "MCP initialization aborted as a new request has been received");
                    return Ok(old);
                }
                if !force && old.config.canonical() == config.canonical() {
                    debug!(server = %server_name, "Using existing MCP connector");
                    return Ok(old);
                }
                match old.connection.close().await {
                    Ok(()) => info!(server = %server_name, "Closed old MCP connector"),
                    Err(e) => error!(server = %server_name, error = %e, "Error closing old MCP connector"),
                }
            }
            Err(e) => warn!(server = %server_name, error = %e, "Error retrieving old MCP connector"),
        }
    }

    factory
        .connect(&server_name, &config, project_dir.as_deref())
        .await
        .map(Arc::new)
        .map_err(|e| {
            error!(server = %server_name, error = %e, "MCP client creation failed");
            Arc::new(e)
        })
}
