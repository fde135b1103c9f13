use super::config_portal::ConfigPortal;
use super::ConfigDocument;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONFIG_DIR: &str = "leaposc";
const CONFIG_FILE: &str = "config.json";

/// `<config dir>/leaposc/config.json`, falling back to the home directory and
/// then the working directory.
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| {
            warn!("Could not determine config or home directory, using current directory");
            PathBuf::from(".")
        });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

/// Reads the document at `path`. A missing file is created with defaults.
pub async fn load_or_create(path: &Path) -> Result<ConfigDocument> {
    if !tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
    {
        info!("No config at {}, writing defaults", path.display());
        let doc = ConfigDocument::default();
        save(path, &doc).await?;
        return Ok(doc);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let doc: ConfigDocument = serde_json::from_str(&content)
        .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    info!(
        "Loaded config from {} ({} hand assignment(s), {} alias(es))",
        path.display(),
        doc.hand_assignments.len(),
        doc.device_aliases.len()
    );
    Ok(doc)
}

/// Writes the document as pretty JSON, creating parent directories.
pub async fn save(path: &Path, doc: &ConfigDocument) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
    }

    let content = serde_json::to_string_pretty(doc)
        .map_err(|e| eyre!("Failed to serialize config: {}", e))?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;

    debug!("Config saved to {}", path.display());
    Ok(())
}

pub async fn save_portal(path: &Path, portal: &ConfigPortal) -> Result<()> {
    save(path, &portal.to_document()).await
}

/// Saves the portal every `interval_seconds` until `cancel` fires.
pub fn start_autosave_task(
    portal: Arc<ConfigPortal>,
    path: PathBuf,
    interval_seconds: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    info!(
        "Starting autosave task with interval: {}s",
        interval_seconds
    );

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));
        // first tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Autosave task cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = save_portal(&path, &portal).await {
                        error!("Failed to autosave configuration: {}", e);
                    } else {
                        debug!("Configuration autosaved successfully");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::HandAssignment;
    use crate::tracking::frame::HandSide;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let doc = load_or_create(&path).await.unwrap();

        assert_eq!(doc, ConfigDocument::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        assert!(load_or_create(&path).await.is_err());
    }

    #[tokio::test]
    async fn saved_document_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut doc = ConfigDocument::default();
        doc.hand_assignments
            .insert("SN1".to_string(), HandAssignment::parse("left").unwrap());
        doc.device_aliases
            .insert("SN1".to_string(), json!("dev3"));
        save(&path, &doc).await.unwrap();

        let portal = ConfigPortal::from_document(load_or_create(&path).await.unwrap());
        assert_eq!(portal.default_hand_assignment("SN1"), Some(HandSide::Left));
        assert_eq!(portal.aliases().alias_for("SN1").unwrap().as_str(), "dev3");

        let reloaded = load_or_create(&path).await.unwrap();
        assert_eq!(reloaded, doc);
    }

    #[tokio::test]
    async fn autosave_writes_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let portal = Arc::new(ConfigPortal::from_document(ConfigDocument::default()));
        portal.aliases().get_or_assign_alias("SN-auto");

        let cancel = CancellationToken::new();
        let task = start_autosave_task(portal, path.clone(), 1, cancel.clone());

        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
        cancel.cancel();
        task.await.unwrap();

        let saved = load_or_create(&path).await.unwrap();
        assert_eq!(saved.device_aliases.get("SN-auto"), Some(&json!("dev1")));
    }
}
