use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{DeliveredArtifacts, Deliverer, EncodedVideo, EngineContext, EngineError};

/// Publishes finished artifacts into `<output_dir>/<job_id>/` and hands back
/// URLs under `<base_url>/outputs/videos/<job_id>/`.
pub struct LocalDelivery {
    output_dir: PathBuf,
    base_url: String,
}

impl LocalDelivery {
    pub fn new(output_dir: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, ctx: &EngineContext, file: &str) -> String {
        format!("{}/outputs/videos/{}/{}", self.base_url, ctx.job_id, file)
    }
}

async fn copy(from: &Path, to: &Path) -> Result<(), EngineError> {
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| EngineError::io(from, e))
}

#[async_trait]
impl Deliverer for LocalDelivery {
    async fn deliver(
        &self,
        ctx: &EngineContext,
        video: &EncodedVideo,
        captions_srt: &str,
    ) -> Result<DeliveredArtifacts, EngineError> {
        let target = self.output_dir.join(ctx.job_id.as_str());
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| EngineError::io(&target, e))?;

        copy(&video.path, &target.join("video.mp4")).await?;
        copy(&video.thumbnail, &target.join("thumbnail.jpg")).await?;

        let captions = target.join("captions.srt");
        tokio::fs::write(&captions, captions_srt)
            .await
            .map_err(|e| EngineError::io(&captions, e))?;

        log::info!("Delivered job {} to {}", ctx.job_id, target.display());

        Ok(DeliveredArtifacts {
            video_url: self.url(ctx, "video.mp4"),
            captions_url: self.url(ctx, "captions.srt"),
            thumbnail_url: self.url(ctx, "thumbnail.jpg"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::VideoMetadata;
    use crate::job::JobId;

    #[tokio::test]
    async fn test_deliver_copies_and_builds_urls() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let video_path = work.path().join("v.mp4");
        let thumb_path = work.path().join("t.jpg");
        std::fs::write(&video_path, b"video").unwrap();
        std::fs::write(&thumb_path, b"thumb").unwrap();

        let ctx = EngineContext {
            job_id: JobId::from("job-9"),
            workspace: work.path().to_path_buf(),
            seed: 0,
        };
        let video = EncodedVideo {
            path: video_path,
            thumbnail: thumb_path,
            metadata: VideoMetadata {
                duration_secs: 1.0,
                width: 2,
                height: 2,
                fps: 30,
                codec: "h264".to_string(),
                file_size: 5,
            },
        };

        let delivery = LocalDelivery::new(out.path(), "https://cdn.example.com/");
        let artifacts = delivery
            .deliver(&ctx, &video, "1\n00:00:00,000 --> 00:00:01,000\nHi\n")
            .await
            .unwrap();

        assert_eq!(
            artifacts.video_url,
            "https://cdn.example.com/outputs/videos/job-9/video.mp4"
        );
        assert_eq!(
            artifacts.captions_url,
            "https://cdn.example.com/outputs/videos/job-9/captions.srt"
        );
        let dir = out.path().join("job-9");
        assert_eq!(std::fs::read(dir.join("video.mp4")).unwrap(), b"video");
        assert_eq!(std::fs::read(dir.join("thumbnail.jpg")).unwrap(), b"thumb");
        assert!(std::fs::read_to_string(dir.join("captions.srt"))
            .unwrap()
            .contains("Hi"));
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let out = tempfile::tempdir().unwrap();
        let ctx = EngineContext {
            job_id: JobId::from("job-x"),
            workspace: out.path().to_path_buf(),
            seed: 0,
        };
        let video = EncodedVideo {
            path: out.path().join("nope.mp4"),
            thumbnail: out.path().join("nope.jpg"),
            metadata: VideoMetadata {
                duration_secs: 0.0,
                width: 0,
                height: 0,
                fps: 0,
                codec: String::new(),
                file_size: 0,
            },
        };
        let err = LocalDelivery::new(out.path(), "http://localhost:4000")
            .deliver(&ctx, &video, "")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
