//! Configuration Hot Reload
//!
//! Polls a configuration file and applies it to a [`GrandOutput`] whenever its
//! content changes. Subscribers are notified of every applied or rejected
//! document.

use crate::configuration::GrandOutputConfiguration;
use crate::grand_output::GrandOutput;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default delay between two checks of the file
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConfigReloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration rejected: {}", .0.join("; "))]
    Rejected(Vec<String>),

    #[error("Reload task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, ConfigReloadError>;

/// Outcome of a reload
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    /// The document was applied; `version` is the GrandOutput configuration version
    Applied { version: u64 },
    Rejected { errors: Vec<String> },
}

/// Last applied document
#[derive(Debug, Clone)]
pub struct ConfigVersion {
    /// Number of documents applied by this watcher
    pub version: u64,
    pub timestamp: std::time::SystemTime,
    /// SHA-256 of the document
    pub hash: String,
}

impl ConfigVersion {
    pub fn new(version: u64, hash: String) -> Self {
        Self {
            version,
            timestamp: std::time::SystemTime::now(),
            hash,
        }
    }
}

struct WatchState {
    path: PathBuf,
    output: Arc<GrandOutput>,
    version: RwLock<ConfigVersion>,
    /// Hash of the last document read, applied or not
    last_hash: RwLock<String>,
    change_tx: broadcast::Sender<ConfigChange>,
}

impl WatchState {
    /// Load and apply the file; `None` when unchanged and not forced
    async fn check(&self, force: bool) -> Result<Option<ConfigChange>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let hash = compute_hash(&content);
        if !force && *self.last_hash.read().await == hash {
            return Ok(None);
        }

        let output = self.output.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut config = GrandOutputConfiguration::new();
            let mut errors = Vec::new();
            if config.load(&content, output.registry(), &mut errors) && output.set_configuration(&config, &mut errors) {
                Ok(output.current_version())
            } else {
                Err(errors)
            }
        })
        .await
        .map_err(|e| ConfigReloadError::Join(e.to_string()))?;

        *self.last_hash.write().await = hash.clone();
        let change = match outcome {
            Ok(version) => {
                let mut current = self.version.write().await;
                *current = ConfigVersion::new(current.version + 1, hash);
                info!(path = %self.path.display(), version, "Configuration file applied");
                ConfigChange::Applied { version }
            }
            Err(errors) => {
                warn!(path = %self.path.display(), errors = ?errors, "Configuration file rejected");
                ConfigChange::Rejected { errors }
            }
        };
        let _ = self.change_tx.send(change.clone());
        Ok(Some(change))
    }
}

/// Watches a configuration file for a GrandOutput
pub struct ConfigWatcher {
    state: Arc<WatchState>,
    interval: Duration,
    watcher_handle: Option<JoinHandle<()>>,
}

impl ConfigWatcher {
    pub fn new(path: impl AsRef<Path>, output: Arc<GrandOutput>) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(WatchState {
                path: path.as_ref().to_path_buf(),
                output,
                version: RwLock::new(ConfigVersion::new(0, String::new())),
                last_hash: RwLock::new(String::new()),
                change_tx,
            }),
            interval: DEFAULT_POLL_INTERVAL,
            watcher_handle: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Apply the file now, whether it changed or not
    pub async fn reload(&self) -> Result<ConfigVersion> {
        info!(path = %self.state.path.display(), "Manual configuration reload requested");
        match self.state.check(true).await? {
            Some(ConfigChange::Rejected { errors }) => Err(ConfigReloadError::Rejected(errors)),
            _ => Ok(self.current_version().await),
        }
    }

    /// Start polling the file; the first check happens immediately
    pub fn start(&mut self) {
        if self.watcher_handle.is_some() {
            return;
        }
        let state = self.state.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            info!(path = %state.path.display(), "Starting config file watcher");
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match state.check(false).await {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!("Configuration file unchanged"),
                    Err(e) => warn!(error = %e, "Failed to check config file"),
                }
            }
        });
        self.watcher_handle = Some(handle);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.watcher_handle.take() {
            handle.abort();
            debug!(path = %self.state.path.display(), "Config file watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.watcher_handle.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.state.change_tx.subscribe()
    }

    pub async fn current_version(&self) -> ConfigVersion {
        self.state.version.read().await.clone()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn compute_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grand_output::GrandOutputOptions;
    use crate::handlers::HandlerRegistry;
    use monitrail_core::MonitoringContext;

    const VALID: &str = r#"<GrandOutputConfiguration><Channel><Add Type="Console" Name="c" /></Channel></GrandOutputConfiguration>"#;

    fn output() -> Arc<GrandOutput> {
        GrandOutput::new(
            Arc::new(MonitoringContext::new()),
            HandlerRegistry::with_builtins(),
            GrandOutputOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash("test content");
        let hash2 = compute_hash("test content");
        let hash3 = compute_hash("different content");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[tokio::test]
    async fn test_manual_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitrail.xml");
        std::fs::write(&path, VALID).unwrap();

        let output = output();
        let watcher = ConfigWatcher::new(&path, output.clone());
        let mut rx = watcher.subscribe();

        let version = watcher.reload().await.unwrap();
        assert_eq!(version.version, 1);
        assert_eq!(version.hash, compute_hash(VALID));
        assert_eq!(output.current_version(), 1);
        assert_eq!(rx.try_recv().unwrap(), ConfigChange::Applied { version: 1 });
    }

    #[tokio::test]
    async fn test_rejected_reload_keeps_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitrail.xml");
        std::fs::write(&path, VALID).unwrap();
        let output = output();
        let watcher = ConfigWatcher::new(&path, output.clone());
        watcher.reload().await.unwrap();

        std::fs::write(&path, "<GrandOutputConfiguration />").unwrap();
        let err = watcher.reload().await.unwrap_err();
        assert!(matches!(err, ConfigReloadError::Rejected(ref errors) if errors.len() == 1));
        assert_eq!(output.current_version(), 1);
        assert_eq!(watcher.current_version().await.version, 1);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let watcher = ConfigWatcher::new("/nonexistent/monitrail.xml", output());
        assert!(matches!(watcher.reload().await, Err(ConfigReloadError::Io(_))));
    }

    #[tokio::test]
    async fn test_watcher_applies_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitrail.xml");
        std::fs::write(&path, VALID).unwrap();

        let output = output();
        let mut watcher = ConfigWatcher::new(&path, output.clone()).with_interval(Duration::from_millis(20));
        let mut rx = watcher.subscribe();
        watcher.start();
        assert!(watcher.is_running());

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, ConfigChange::Applied { version: 1 });

        std::fs::write(&path, VALID.replace("Name=\"c\"", "Name=\"d\"")).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(second, ConfigChange::Applied { version: 2 });

        watcher.stop();
        assert!(!watcher.is_running());
    }
}
