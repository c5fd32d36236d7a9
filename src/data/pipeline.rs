//! Sequencing of an upload from the request body to a committed reference on the video record.
//!
//! Every run moves through [`PipelineStage`]s in order. Thumbnails skip straight from `Staged`
//! to `Published`, videos are probed, classified and remuxed in between. Any failure ends the run
//! with a [`Failed`] carrying the last reached stage. Staged and remuxed files are owned by the run
//! and removed when it ends, whichever way it ends.

use std::{fmt, sync::Arc, time::Instant};

use chrono::Utc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;
use warp::reject::Reject;

use crate::{
    config::Config,
    error::{Error, ErrorClass},
    model::Video,
    repository::VideoRepository,
    util::join_key_url,
};

use super::{
    encode::MediaTools,
    keys::{generate_key, media_type_to_extension},
    orientation::{DEFAULT_TOLERANCE, classify},
    reference::{StorageReference, resolve},
    s3utils::{ObjectStore, PutAck},
    staging::stage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Validated,
    Staged,
    Probed,
    Classified,
    Processed,
    Published,
    Committed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Validated => "validated",
            PipelineStage::Staged => "staged",
            PipelineStage::Probed => "probed",
            PipelineStage::Classified => "classified",
            PipelineStage::Processed => "processed",
            PipelineStage::Published => "published",
            PipelineStage::Committed => "committed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Thumbnail,
    Video,
}

impl MediaKind {
    /// Name of the multipart form field carrying the upload.
    pub fn form_field(self) -> &'static str {
        match self {
            MediaKind::Thumbnail => "thumbnail",
            MediaKind::Video => "video",
        }
    }

    pub fn accepted_media_types(self) -> &'static [&'static str] {
        match self {
            MediaKind::Thumbnail => &["image/jpeg", "image/png"],
            MediaKind::Video => &["video/mp4"],
        }
    }

    pub fn accepts(self, media_type: &str) -> bool {
        self.accepted_media_types().contains(&media_type)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.form_field())
    }
}

/// A run that ended before reaching `Committed`, or failed signing the committed reference.
#[derive(Error, Debug)]
#[error("{kind} upload for video {video_id} failed at stage '{stage}': {cause}")]
pub struct Failed {
    pub kind: MediaKind,
    pub video_id: Uuid,
    /// Last stage the run reached.
    pub stage: PipelineStage,
    #[source]
    pub cause: Error,
}

impl Reject for Failed {}

impl Failed {
    pub fn class(&self) -> ErrorClass {
        self.cause.class()
    }
}

/// An upload whose caller has been authenticated. Ownership of the video is checked by the
/// pipeline.
pub struct UploadRequest<R> {
    pub video_id: Uuid,
    pub user_id: Uuid,
    /// Media type of the uploaded part, without parameters.
    pub media_type: String,
    pub body: R,
}

struct Run {
    kind: MediaKind,
    video_id: Uuid,
    stage: PipelineStage,
    start_time: Instant,
}

impl Run {
    fn start<R>(kind: MediaKind, request: &UploadRequest<R>) -> Self {
        log::info!(
            "Uploading {kind} for video {} by user {}",
            request.video_id,
            request.user_id
        );
        Run {
            kind,
            video_id: request.video_id,
            stage: PipelineStage::Validated,
            start_time: Instant::now(),
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        debug_assert!(next > self.stage, "{next} does not follow {}", self.stage);
        log::debug!(
            "{} upload for video {}: {} -> {next} after {:?}",
            self.kind,
            self.video_id,
            self.stage,
            self.start_time.elapsed()
        );
        self.stage = next;
    }

    fn fail(&self, cause: Error) -> Failed {
        let failed = Failed {
            kind: self.kind,
            video_id: self.video_id,
            stage: self.stage,
            cause,
        };
        // server errors are logged once the rejection is handled
        if !failed.cause.class().is_server_error() {
            log::warn!("{failed}");
        }
        failed
    }

    fn complete(&self) {
        log::info!(
            "Completed {} upload for video {} in {:?}",
            self.kind,
            self.video_id,
            self.start_time.elapsed()
        );
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    repository: Arc<dyn VideoRepository>,
    store: Arc<dyn ObjectStore>,
    tools: Arc<dyn MediaTools>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        repository: Arc<dyn VideoRepository>,
        store: Arc<dyn ObjectStore>,
        tools: Arc<dyn MediaTools>,
    ) -> Self {
        Self {
            config,
            repository,
            store,
            tools,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stage and publish a jpeg or png thumbnail and point the record's `thumbnail_url` at its
    /// public url. Returns the updated record as persisted.
    pub async fn upload_thumbnail<R>(&self, request: UploadRequest<R>) -> Result<Video, Failed>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut run = Run::start(MediaKind::Thumbnail, &request);
        let mut video = self
            .authorize(&run, request.video_id, request.user_id, &request.media_type)
            .await?;
        let media_type = request.media_type;

        let mut staged = stage(
            &self.config.storage_root,
            &media_type_to_extension(&media_type),
            request.body,
        )
        .await
        .map_err(|e| run.fail(e))?;
        run.advance(PipelineStage::Staged);

        let key = generate_key(&media_type).map_err(|e| run.fail(e))?;
        self.publish(&run, &key, &media_type, staged.reader())
            .await?;
        run.advance(PipelineStage::Published);
        drop(staged);

        let thumbnail_url =
            join_key_url(&self.config.public_base_url, &key).map_err(|e| run.fail(e))?;
        video.thumbnail_url = Some(thumbnail_url.to_string());

        let video = self.commit(&mut run, &key, video).await?;
        run.complete();
        Ok(video)
    }

    /// Stage, probe, classify, remux and publish an mp4 under `<orientation>/<key>`, then store a
    /// reference to it in the record's `video_url`. Returns the updated record with `video_url`
    /// resolved to a presigned url.
    pub async fn upload_video<R>(&self, request: UploadRequest<R>) -> Result<Video, Failed>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut run = Run::start(MediaKind::Video, &request);
        let mut video = self
            .authorize(&run, request.video_id, request.user_id, &request.media_type)
            .await?;
        let media_type = request.media_type;

        let staged = stage(
            &self.config.storage_root,
            &media_type_to_extension(&media_type),
            request.body,
        )
        .await
        .map_err(|e| run.fail(e))?;
        run.advance(PipelineStage::Staged);

        let probe_result = self
            .tools
            .probe(staged.path())
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(PipelineStage::Probed);

        let orientation = classify(probe_result.width, probe_result.height, DEFAULT_TOLERANCE);
        log::debug!(
            "Video {} is {}x{}, classified as {orientation}",
            run.video_id,
            probe_result.width,
            probe_result.height
        );
        run.advance(PipelineStage::Classified);

        let processed = self
            .tools
            .remux(staged.path())
            .await
            .and_then(|path| TempPath::try_from_path(path).map_err(Error::from))
            .map_err(|e| run.fail(e))?;
        run.advance(PipelineStage::Processed);

        let key = generate_key(&media_type)
            .map(|key| format!("{orientation}/{key}"))
            .map_err(|e| run.fail(e))?;
        let mut processed_file = tokio::fs::File::open(&processed).await.map_err(|e| {
            run.fail(Error::IoError(format!(
                "Failed to open processed file {}: {e}",
                processed.display()
            )))
        })?;
        self.publish(&run, &key, &media_type, &mut processed_file)
            .await?;
        run.advance(PipelineStage::Published);
        drop(processed_file);
        drop(processed);
        drop(staged);

        let reference = StorageReference::new(self.config.object_container.as_str(), key.as_str())
            .map_err(|e| run.fail(e))?;
        video.video_url = Some(reference.encode());

        let video = self.commit(&mut run, &key, video).await?;
        let video = self.sign_video(video).await.map_err(|e| run.fail(e))?;
        run.complete();
        Ok(video)
    }

    /// Load a video owned by `user_id` with its video reference resolved to a fresh presigned url.
    pub async fn get_video(&self, video_id: Uuid, user_id: Uuid) -> Result<Video, Error> {
        let video = self.repository.get_video(video_id).await?;
        if video.user_id != user_id {
            return Err(Error::NotVideoOwnerError(video_id));
        }
        self.sign_video(video).await
    }

    /// Replace the stored reference in `video_url` with a url presigned for the default ttl.
    pub async fn sign_video(&self, mut video: Video) -> Result<Video, Error> {
        if let Some(ref video_url) = video.video_url {
            let presigned_url = resolve(
                self.store.as_ref(),
                video_url,
                self.config.presign_ttl_default,
            )
            .await?;
            video.video_url = Some(presigned_url);
        }
        Ok(video)
    }

    /// Checks done before touching the disk: the media type is accepted, the record exists and is
    /// owned by the uploader.
    async fn authorize(
        &self,
        run: &Run,
        video_id: Uuid,
        user_id: Uuid,
        media_type: &str,
    ) -> Result<Video, Failed> {
        if !run.kind.accepts(media_type) {
            return Err(run.fail(Error::UnsupportedMediaTypeError(
                media_type.to_string(),
            )));
        }

        let video = self
            .repository
            .get_video(video_id)
            .await
            .map_err(|e| run.fail(e))?;

        if video.user_id != user_id {
            return Err(run.fail(Error::NotVideoOwnerError(video_id)));
        }

        Ok(video)
    }

    async fn publish(
        &self,
        run: &Run,
        key: &str,
        media_type: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PutAck, Failed> {
        self.store
            .put(&self.config.object_container, key, media_type, reader)
            .await
            .map_err(|e| run.fail(e))
    }

    /// Persist the record. If this fails the published object stays in the store unreferenced.
    async fn commit(&self, run: &mut Run, key: &str, mut video: Video) -> Result<Video, Failed> {
        video.updated_at = Utc::now();
        if let Err(e) = self.repository.update_video(&video).await {
            log::error!(
                "Object {key} in {} is orphaned, updating video {} failed: {e}",
                &self.config.object_container,
                video.id
            );
            return Err(run.fail(Error::CommitError {
                key: key.to_string(),
                cause: e.to_string(),
            }));
        }
        run.advance(PipelineStage::Committed);
        Ok(video)
    }
}
