use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Editors tend to write a file several times in a row.
const SETTLE: Duration = Duration::from_millis(500);

/// Watches the directory holding `config_path` and yields once per burst of
/// changes to that file. The watcher stops when the returned value drops.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    changes: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(config_path: &Path) -> anyhow::Result<Self> {
        let target: PathBuf = config_path.to_path_buf();
        let dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = config_path.file_name().map(|n| n.to_os_string());

        let (tx, changes) = mpsc::channel(16);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours {
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "Config watcher error"),
            },
            notify::Config::default(),
        )?;

        // The directory, not the file: editors replace files on save.
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %target.display(), "Watching config file");

        Ok(Self {
            _watcher: watcher,
            changes,
        })
    }

    /// Waits for the next change, then swallows the rest of the burst.
    pub async fn changed(&mut self) -> Option<()> {
        self.changes.recv().await?;
        loop {
            match tokio::time::timeout(SETTLE, self.changes.recv()).await {
                Ok(Some(())) => debug!("Coalescing config change"),
                Ok(None) => return None,
                Err(_) => return Some(()),
            }
        }
    }
}
