use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use sr_core::collab::ArtifactStore;
use sr_core::{Artifact, JobId, Media};

/// Writes finished videos as `{job_id}_final.{ext}` under one directory.
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub async fn new(dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, job_id: JobId, video: &Media) -> anyhow::Result<Artifact> {
        let file_name = format!("{job_id}_final.{}", video.extension);
        let path = self.dir.join(&file_name);
        let partial = self.dir.join(format!("{file_name}.part"));

        tokio::fs::write(&partial, &video.bytes)
            .await
            .with_context(|| format!("failed to write {}", partial.display()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("failed to move video into {}", path.display()))?;

        Ok(Artifact {
            path,
            file_name,
            size_bytes: video.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_writes_final_file() {
        let dir = std::env::temp_dir().join(format!("storyreel-store-{}", JobId::new()));
        let store = FsArtifactStore::new(dir.clone()).await.unwrap();
        let id = JobId::new();

        let artifact = store.store(id, &Media::new(b"movie".to_vec(), "mp4")).await.unwrap();
        assert_eq!(artifact.file_name, format!("{id}_final.mp4"));
        assert_eq!(artifact.size_bytes, 5);
        assert_eq!(tokio::fs::read(&artifact.path).await.unwrap(), b"movie");
        assert!(!dir.join(format!("{id}_final.mp4.part")).exists());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
