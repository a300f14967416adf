use crate::error::IngestError;
use bon::Builder;
use log::info;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_RESULT_DIR: &str = "./data/results/";
pub const DEFAULT_WEATHER_FILENAME: &str = "weather.csv";
pub const DEFAULT_LOCATIONS_FILENAME: &str = "locations.csv";

/// Where the location table is read from and the weather table is written to.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct ResultLayout {
    #[builder(default = PathBuf::from(DEFAULT_RESULT_DIR), into)]
    pub result_dir: PathBuf,
    #[builder(default = DEFAULT_WEATHER_FILENAME.to_string(), into)]
    pub weather_filename: String,
    #[builder(default = DEFAULT_LOCATIONS_FILENAME.to_string(), into)]
    pub locations_filename: String,
}

impl Default for ResultLayout {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ResultLayout {
    pub fn weather_path(&self) -> PathBuf {
        self.result_dir.join(&self.weather_filename)
    }

    pub fn locations_path(&self) -> PathBuf {
        self.result_dir.join(&self.locations_filename)
    }
}

pub async fn ensure_dir_exists(path: &Path) -> Result<(), IngestError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(IngestError::ResultDirNotADirectory(path.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating result directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| IngestError::ResultDirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(IngestError::ResultDirMetadata(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = ResultLayout::default();
        assert_eq!(layout.weather_path(), Path::new("./data/results/weather.csv"));
        assert_eq!(layout.locations_path(), Path::new("./data/results/locations.csv"));
    }

    #[tokio::test]
    async fn test_ensure_dir_exists() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir_exists(&nested).await.unwrap();
        assert!(nested.is_dir());
        // second call is a no-op
        ensure_dir_exists(&nested).await.unwrap();

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = ensure_dir_exists(&file).await.unwrap_err();
        assert!(matches!(err, IngestError::ResultDirNotADirectory(_)));
    }
}
