use std::{task::Poll, time::Duration};

use async_trait::async_trait;
use futures::ready;
use pin_project::pin_project;
use s3::{Bucket, Region, creds::Credentials};
use tokio::io::AsyncRead;

use crate::{
    config::{Config, SigningCredential},
    error::Error,
};

/// Longest validity S3 accepts for a presigned url.
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Acknowledgement of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAck {
    pub response_status: u16,
    pub bytes_read: usize,
}

/// The object store uploads are published to and read urls are signed by.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the reader to `key`. Either the complete object exists afterwards or an error is
    /// returned.
    async fn put(
        &self,
        container: &str,
        key: &str,
        content_type: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PutAck, Error>;

    async fn presign_get(&self, container: &str, key: &str, ttl: Duration)
    -> Result<String, Error>;
}

pub struct S3ObjectStore {
    endpoint: String,
    is_aws_region: bool,
    credential: SigningCredential,
}

impl S3ObjectStore {
    pub fn new(config: &Config) -> Self {
        Self {
            endpoint: config.s3_endpoint.clone(),
            is_aws_region: config.s3_is_aws_region,
            credential: config.signing_credential.clone(),
        }
    }

    fn bucket(&self, container: &str) -> Result<Bucket, Error> {
        create_bucket(
            container,
            &self.endpoint,
            &self.credential,
            self.is_aws_region,
        )
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        content_type: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PutAck, Error> {
        let bucket = self.bucket(container)?;
        let mut reader = ByteCountingReader::new(reader);

        log::info!("Starting S3 upload for {key}");
        let status = bucket
            .put_object_stream_with_content_type(&mut reader, key, content_type)
            .await
            .map_err(|e| Error::S3Error(format!("Failed to upload file '{key}': {e}")))?;
        if status >= 300 {
            return Err(Error::S3ResponseError(status));
        }
        log::info!(
            "Finished S3 upload for {key} ({} bytes)",
            reader.byte_count
        );

        Ok(PutAck {
            response_status: status,
            bytes_read: reader.byte_count,
        })
    }

    async fn presign_get(
        &self,
        container: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, Error> {
        let expiry_secs = presign_expiry_secs(ttl)?;
        let bucket = self.bucket(container)?;
        bucket
            .presign_get(key, expiry_secs, None)
            .map_err(|e| Error::PresignError(format!("Failed to presign '{key}': {e}")))
    }
}

fn presign_expiry_secs(ttl: Duration) -> Result<u32, Error> {
    let secs = ttl.as_secs();
    if secs == 0 || secs > MAX_PRESIGN_EXPIRY_SECS {
        return Err(Error::PresignError(format!(
            "Expiry of {secs}s is outside of 1s..={MAX_PRESIGN_EXPIRY_SECS}s"
        )));
    }
    u32::try_from(secs).map_err(|e| Error::PresignError(e.to_string()))
}

pub fn create_bucket(
    bucket_name: &str,
    endpoint: &str,
    credential: &SigningCredential,
    is_aws_region: bool,
) -> Result<Bucket, Error> {
    let region = if is_aws_region {
        endpoint
            .parse::<Region>()
            .map_err(|e| Error::ConfigError(e.to_string()))
    } else {
        Ok(Region::Custom {
            region: String::from(""),
            endpoint: String::from(endpoint),
        })
    }?;

    let credentials = Credentials {
        access_key: Some(credential.access_key.clone()),
        secret_key: Some(credential.secret_key.clone()),
        security_token: None,
        session_token: None,
        expiration: None,
    };

    Bucket::new(bucket_name, region, credentials)
        .map_err(|e| Error::ConfigError(e.to_string()))
        .map(|b| {
            if is_aws_region {
                b
            } else {
                b.with_path_style()
            }
        })
}

#[pin_project]
pub struct ByteCountingReader<R> {
    #[pin]
    inner: R,
    byte_count: usize,
}

impl<R> ByteCountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            byte_count: 0,
        }
    }
}

impl<R: AsyncRead> AsyncRead for ByteCountingReader<R> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let curr_len = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        *this.byte_count += buf.filled().len() - curr_len;
        Poll::Ready(Ok(()))
    }
}
