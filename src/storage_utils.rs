use serde::{Serialize, de::DeserializeOwned};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// JSON file store rooted at one directory. Each key maps to `<key>.json`.
#[derive(Debug, Clone)]
pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g. ".../target/debug/storage/http_cache")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage rooted at `relative_path` next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// Storage rooted at an explicit directory, created if missing.
    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        if !fs::try_exists(&base_dir).await? {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }

    /// Writes `data` atomically: a reader sees either the old file or the new
    /// one, never a partial write.
    pub async fn save<T: Serialize>(&self, key: &str, data: &T) -> anyhow::Result<()> {
        let final_path = self.path_for(key);
        let tmp_path = self.base_dir.join(format!("{key}.json.tmp"));

        let json_bytes = serde_json::to_vec(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    /// `Ok(None)` when nothing is stored under `key`.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        // serde_json scans the bytes anyway, skip the UTF-8 pass of read_to_string
        let content = match fs::read(self.path_for(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Every stored key. Leftover `.json.tmp` files are not keys.
    pub async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.base_dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    pub async fn remove(&self, key: &str) -> anyhow::Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
