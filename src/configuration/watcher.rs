use crate::command::{self, server};
use crate::configuration::Configuration;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Reloads the configuration file when it changes and hands it to the server.
///
/// A file that fails to load or to build leaves the running configuration in place.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    _handle: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn new(config_path: &str, server: Arc<server::Command>) -> Result<Self, command::Error> {
        let config_path = std::fs::canonicalize(PathBuf::from(config_path))?;
        info!("Watching configuration file {}", config_path.display());

        let (tx, rx) = mpsc::channel::<Event>(16);
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(err) => warn!("Configuration watcher error: {err}"),
            }
        })?;
        watcher.watch(&config_path, RecursiveMode::NonRecursive)?;

        let handle = tokio::spawn(reload_on_change(config_path, rx, server));

        Ok(Self {
            _watcher: watcher,
            _handle: handle,
        })
    }
}

fn is_content_change(event: &Event, config_path: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
    ) && event.paths.iter().any(|path| path == config_path)
}

async fn reload_on_change(
    config_path: PathBuf,
    mut events: mpsc::Receiver<Event>,
    server: Arc<server::Command>,
) {
    while let Some(event) = events.recv().await {
        if !is_content_change(&event, &config_path) {
            continue;
        }

        let reloaded = Configuration::load(&config_path)
            .map_err(command::Error::from)
            .and_then(|config| server.notify_config_change(&config));

        match reloaded {
            Ok(()) => info!("Configuration reloaded"),
            Err(err) => error!("Keeping previous configuration: {err}"),
        }
    }

    error!("Configuration watcher stopped");
}
