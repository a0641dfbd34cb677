//! On-disk copy of the mesh directory, so a restart begins from the last known-good peers.

use std::{io::ErrorKind, path::Path};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

use crate::state::models::CoreServer;

use super::MeshError;

const DIRECTORY_FORMAT_VERSION: u32 = 1;

/// Serialized directory file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryFile {
    /// Format version, currently `1`.
    pub version: u32,
    /// RFC 3339 timestamp of the write.
    pub saved_at: String,
    /// Known servers at the time of the write.
    pub servers: Vec<CoreServer>,
}

/// Read the persisted directory. A missing file is an empty directory.
pub async fn load_directory(path: &Path) -> Result<Vec<CoreServer>, MeshError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(MeshError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let file: DirectoryFile =
        serde_json::from_str(&contents).map_err(|source| MeshError::Format {
            path: path.to_path_buf(),
            source,
        })?;
    if file.version != DIRECTORY_FORMAT_VERSION {
        return Err(MeshError::UnsupportedVersion(file.version));
    }

    info!(count = file.servers.len(), path = %path.display(), "loaded persisted mesh directory");
    Ok(file.servers)
}

/// Write the directory next to `path` then rename it into place.
pub async fn save_directory(path: &Path, servers: &[CoreServer]) -> Result<(), MeshError> {
    let io_error = |source| MeshError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = DirectoryFile {
        version: DIRECTORY_FORMAT_VERSION,
        saved_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        servers: servers.to_vec(),
    };
    let contents = serde_json::to_string_pretty(&file).map_err(|source| MeshError::Format {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut temp = fs::File::create(&temp_path).await.map_err(io_error)?;
    temp.write_all(contents.as_bytes()).await.map_err(io_error)?;
    temp.sync_all().await.map_err(io_error)?;
    drop(temp);
    fs::rename(&temp_path, path).await.map_err(io_error)?;

    debug!(count = servers.len(), path = %path.display(), "saved mesh directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(address: &str) -> CoreServer {
        CoreServer {
            name: address.to_string(),
            address: address.to_string(),
            port: 8675,
            websocket_port: 8676,
        }
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let servers = load_directory(&dir.path().join("absent.json")).await.unwrap();
        assert!(servers.is_empty());
    }

    #[tokio::test]
    async fn saved_directory_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("knownHosts.json");
        let servers = vec![server("a.example"), server("b.example")];

        save_directory(&path, &servers).await.unwrap();

        assert_eq!(load_directory(&path).await.unwrap(), servers);
        assert!(!path.with_extension("tmp").exists());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["saved_at"].as_str().is_some_and(|stamp| !stamp.is_empty()));
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knownHosts.json");
        std::fs::write(&path, r#"{"version": 7, "saved_at": "", "servers": []}"#).unwrap();

        assert!(matches!(
            load_directory(&path).await,
            Err(MeshError::UnsupportedVersion(7))
        ));
    }
}
