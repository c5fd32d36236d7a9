use std::{io, sync::Arc, task::Poll};

use futures::{Stream, TryStreamExt, ready};
use mime::Mime;
use mpart_async::server::MultipartStream;
use pin_project::pin_project;
use uuid::Uuid;
use warp::{Buf, Rejection, Reply};

use crate::error::Error;

use self::pipeline::{MediaKind, Pipeline, UploadRequest};

pub mod encode;
pub mod keys;
pub mod orientation;
pub mod pipeline;
pub mod reference;
pub mod s3utils;
pub mod staging;

pub async fn upload_thumbnail_handler(
    video_id: String,
    user_id: Uuid,
    mime: Mime,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin + Send,
    pipeline: Arc<Pipeline>,
) -> Result<impl Reply, Rejection> {
    upload_handler(MediaKind::Thumbnail, video_id, user_id, mime, body, pipeline).await
}

pub async fn upload_video_handler(
    video_id: String,
    user_id: Uuid,
    mime: Mime,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin + Send,
    pipeline: Arc<Pipeline>,
) -> Result<impl Reply, Rejection> {
    upload_handler(MediaKind::Video, video_id, user_id, mime, body, pipeline).await
}

pub async fn get_video_handler(
    video_id: String,
    user_id: Uuid,
    pipeline: Arc<Pipeline>,
) -> Result<impl Reply, Rejection> {
    let video_id = parse_video_id(&video_id)?;
    let video = pipeline.get_video(video_id, user_id).await?;
    Ok(warp::reply::json(&video))
}

async fn upload_handler(
    kind: MediaKind,
    video_id: String,
    user_id: Uuid,
    mime: Mime,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin + Send,
    pipeline: Arc<Pipeline>,
) -> Result<warp::reply::Json, Rejection> {
    let video_id = parse_video_id(&video_id)?;
    let boundary = mime
        .get_param("boundary")
        .map(|v| v.to_string())
        .ok_or_else(|| Error::InvalidMultipartError(String::from("No mime boundary")))?;

    let upload_limit = match kind {
        MediaKind::Thumbnail => pipeline.config().max_thumbnail_upload_size,
        MediaKind::Video => pipeline.config().max_video_upload_size,
    };

    let mut stream = MultipartStream::new(
        boundary,
        body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining())),
    );

    while let Some(field) = stream
        .try_next()
        .await
        .map_err(|e| Error::InvalidMultipartError(e.to_string()))?
    {
        let name = field
            .name()
            .map_err(|e| Error::InvalidMultipartError(e.to_string()))?;
        if name != kind.form_field() {
            continue;
        }

        let content_type = field
            .content_type()
            .map_err(|e| Error::InvalidMultipartError(e.to_string()))?;
        // parameters such as charset are not part of the media type compared against the
        // accepted types
        let media_type = match content_type.parse::<Mime>() {
            Ok(mime) => mime.essence_str().to_string(),
            Err(_) => content_type.to_string(),
        };

        let async_read = field
            .map_err(|e| io::Error::other(Error::InvalidMultipartError(e.to_string())))
            .into_async_read();
        let request = UploadRequest {
            video_id,
            user_id,
            media_type,
            body: UploadReader::new(async_read, upload_limit),
        };

        let video = match kind {
            MediaKind::Thumbnail => pipeline.upload_thumbnail(request).await,
            MediaKind::Video => pipeline.upload_video(request).await,
        }?;
        return Ok(warp::reply::json(&video));
    }

    Err(warp::reject::custom(Error::InvalidMultipartError(format!(
        "No multipart form field found for name '{}'",
        kind.form_field()
    ))))
}

fn parse_video_id(video_id: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(video_id).map_err(|_| Error::InvalidIdError(video_id.to_string()))
}

/// Adapts a multipart field to tokio's `AsyncRead` and fails the read once more than `limit`
/// bytes came through.
#[pin_project]
pub struct UploadReader<R> {
    #[pin]
    async_read: R,
    bytes_read: u64,
    limit: u64,
}

impl<R> UploadReader<R> {
    pub fn new(async_read: R, limit: u64) -> Self {
        Self {
            async_read,
            bytes_read: 0,
            limit,
        }
    }
}

impl<R: futures::io::AsyncRead> tokio::io::AsyncRead for UploadReader<R> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let slice = buf.initialize_unfilled();
        let this = self.project();
        let n = ready!(futures::io::AsyncRead::poll_read(
            this.async_read,
            cx,
            slice
        ))?;
        *this.bytes_read += n as u64;
        if *this.bytes_read > *this.limit {
            return Poll::Ready(Err(io::Error::other(Error::UploadTooLargeError(
                *this.limit,
            ))));
        }
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}
