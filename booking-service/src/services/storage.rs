use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Rendered files smaller than this are treated as incomplete.
pub const MIN_READY_SIZE: u64 = 1000;
const READY_ATTEMPTS: u32 = 3;
const READY_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "ruta")]
    pub path: String,
    #[serde(rename = "tamano")]
    pub size: u64,
    #[serde(rename = "creado")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "modificado")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Flat store of rendered invoice files, addressed by file name.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Writes the file and returns its full path.
    async fn write(&self, name: &str, data: Vec<u8>) -> Result<String, AppError>;
    async fn read(&self, name: &str) -> Result<Vec<u8>, AppError>;
    async fn size(&self, name: &str) -> Result<Option<u64>, AppError>;
    async fn list(&self) -> Result<Vec<StoredFile>, AppError>;
    /// Deletes the file; a missing file is not an error.
    async fn remove(&self, name: &str) -> Result<(), AppError>;

    async fn exists(&self, name: &str) -> Result<bool, AppError> {
        Ok(self.size(name).await?.is_some())
    }

    /// Polls until the file reaches [`MIN_READY_SIZE`]; returns whether it did.
    async fn wait_until_ready(&self, name: &str) -> Result<bool, AppError> {
        for attempt in 1..=READY_ATTEMPTS {
            if let Some(size) = self.size(name).await? {
                if size > MIN_READY_SIZE {
                    return Ok(true);
                }
            }
            if attempt < READY_ATTEMPTS {
                tokio::time::sleep(READY_INTERVAL).await;
            }
        }
        Ok(false)
    }
}

/// Rejects names that could escape the storage directory.
pub fn validate_file_name(name: &str) -> Result<&str, AppError> {
    let valid = !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.chars().any(|c| c.is_control());

    if valid {
        Ok(name)
    } else {
        Err(AppError::BadRequest(anyhow!("Nombre de archivo inválido: {}", name)))
    }
}

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, AppError> {
        Ok(self.base_path.join(validate_file_name(name)?))
    }
}

fn to_utc(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, name: &str, data: Vec<u8>) -> Result<String, AppError> {
        let path = self.path_for(name)?;
        fs::write(&path, data).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, AppError> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(anyhow!(
                "Archivo no encontrado: {}",
                name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, name: &str) -> Result<Option<u64>, AppError> {
        let path = self.path_for(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), AppError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<StoredFile>, AppError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            files.push(StoredFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_string_lossy().into_owned(),
                size: meta.len(),
                created_at: to_utc(meta.created()),
                modified_at: to_utc(meta.modified()),
            });
        }
        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let path = storage.write("factura_1.pdf", vec![1u8; 2048]).await.unwrap();
        assert!(path.ends_with("factura_1.pdf"));
        assert_eq!(storage.read("factura_1.pdf").await.unwrap().len(), 2048);
        assert!(storage.exists("factura_1.pdf").await.unwrap());
        assert!(storage.wait_until_ready("factura_1.pdf").await.unwrap());

        let files = storage.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 2048);
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        assert!(!storage.exists("nope.pdf").await.unwrap());
        assert!(matches!(
            storage.read("nope.pdf").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn small_files_never_become_ready() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.write("tiny.pdf", vec![0u8; 10]).await.unwrap();

        assert!(!storage.wait_until_ready("tiny.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn remove_deletes_and_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.write("factura_2.pdf", vec![1u8; 10]).await.unwrap();

        storage.remove("factura_2.pdf").await.unwrap();
        assert!(!storage.exists("factura_2.pdf").await.unwrap());
        storage.remove("factura_2.pdf").await.unwrap();
        assert!(storage.remove("../factura_2.pdf").await.is_err());
    }

    #[test]
    fn traversal_names_are_rejected() {
        assert!(validate_file_name("factura_FAC-00000001_1.pdf").is_ok());
        for bad in ["", "..", "../etc/passwd", "a/b.pdf", "a\\b.pdf"] {
            assert!(validate_file_name(bad).is_err(), "{bad:?} accepted");
        }
    }
}
