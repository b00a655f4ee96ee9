//! Synthesized audio files served back to clients

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{Error, Result};

/// URL prefix under which artifacts are served
pub const AUDIO_ROUTE: &str = "/audio";

/// Scoped directory of synthesized MP3 replies
#[derive(Debug, Clone)]
pub struct AudioArtifacts {
    dir: PathBuf,
}

impl AudioArtifacts {
    /// Use `dir`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist MP3 bytes under a fresh name; returns the file name
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn save(&self, mp3: &[u8]) -> Result<String> {
        let filename = format!("resp-{}.mp3", Uuid::new_v4().simple());
        tokio::fs::write(self.dir.join(&filename), mp3).await?;
        tracing::debug!(%filename, bytes = mp3.len(), "audio artifact saved");
        Ok(filename)
    }

    /// Read a previously saved artifact
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or out-of-scope names
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.path_for(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("audio {filename}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a file name inside the artifact directory
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for names that could escape the directory
    pub fn path_for(&self, filename: &str) -> Result<PathBuf> {
        let plain = !filename.is_empty()
            && !filename.starts_with('.')
            && !filename.contains(['/', '\\', '\0'])
            && filename != "..";
        if !plain {
            return Err(Error::NotFound(format!("audio {filename}")));
        }
        Ok(self.dir.join(filename))
    }

    /// Public URL path for a saved artifact
    #[must_use]
    pub fn url_for(filename: &str) -> String {
        format!("{AUDIO_ROUTE}/{filename}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = AudioArtifacts::new(dir.path().join("audio")).unwrap();

        let name = artifacts.save(b"ID3fake").await.unwrap();
        assert!(name.starts_with("resp-") && name.ends_with(".mp3"));
        assert_eq!(artifacts.read(&name).await.unwrap(), b"ID3fake");
        assert_eq!(AudioArtifacts::url_for(&name), format!("/audio/{name}"));
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = AudioArtifacts::new(dir.path()).unwrap();
        assert!(matches!(
            artifacts.read("resp-missing.mp3").await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = AudioArtifacts::new(dir.path()).unwrap();
        for name in ["../secret", "..", ".hidden", "a/b.mp3", "a\\b.mp3", ""] {
            assert!(artifacts.path_for(name).is_err(), "{name} accepted");
        }
        assert!(artifacts.path_for("resp-1.mp3").is_ok());
    }
}
