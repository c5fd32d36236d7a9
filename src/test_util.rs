//! In-memory doubles for the database, object store and ffmpeg.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;
use uuid::Uuid;

use crate::{
    config::{Config, SigningCredential},
    data::{
        encode::{MediaTools, ProbeResult, processing_path},
        s3utils::{ObjectStore, PutAck},
    },
    error::Error,
    model::Video,
    repository::VideoRepository,
};

pub const TEST_JWT_SECRET: &str = "test-secret";

pub fn test_config(storage_root: &Path) -> Config {
    Config {
        port: 8091,
        database_url: String::from("postgres://localhost/tubely_test"),
        max_db_connections: 1,
        jwt_secret: String::from(TEST_JWT_SECRET),
        storage_root: storage_root.to_path_buf(),
        object_container: String::from("tubely-private"),
        s3_endpoint: String::from("us-east-2"),
        s3_is_aws_region: true,
        public_base_url: Url::parse("https://d1.cloudfront.net").unwrap(),
        signing_credential: SigningCredential {
            access_key: String::from("access"),
            secret_key: String::from("secret"),
        },
        presign_ttl_default: Duration::from_secs(300),
        process_timeout: None,
        concurrent_process_limit: 2,
        max_video_upload_size: 1 << 20,
        max_thumbnail_upload_size: 1 << 10,
    }
}

pub fn test_video(user_id: Uuid) -> Video {
    let now = Utc::now();
    Video {
        id: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
        title: String::from("Boots"),
        description: String::from("A video about boots"),
        thumbnail_url: None,
        video_url: None,
        user_id,
    }
}

#[derive(Default)]
pub struct MemoryVideoRepository {
    videos: Mutex<HashMap<Uuid, Video>>,
    fail_updates: AtomicBool,
    get_count: AtomicUsize,
    update_count: AtomicUsize,
}

impl MemoryVideoRepository {
    pub fn insert(&self, video: Video) {
        self.videos.lock().unwrap().insert(video.id, video);
    }

    /// Current state of a record, bypassing the call counters.
    pub fn get(&self, id: Uuid) -> Option<Video> {
        self.videos.lock().unwrap().get(&id).cloned()
    }

    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.get_count.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoRepository for MemoryVideoRepository {
    async fn get_video(&self, id: Uuid) -> Result<Video, Error> {
        self.get_count.fetch_add(1, Ordering::SeqCst);
        self.get(id).ok_or(Error::VideoNotFoundError(id))
    }

    async fn update_video(&self, video: &Video) -> Result<(), Error> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::QueryError(String::from("connection reset")));
        }
        let mut videos = self.videos.lock().unwrap();
        let stored = videos
            .get_mut(&video.id)
            .ok_or(Error::VideoNotFoundError(video.id))?;
        *stored = video.clone();
        self.update_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    fail_puts: AtomicBool,
    presign_count: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, container: &str) -> Vec<String> {
        let mut keys = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, k)| k.clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    pub fn presign_count(&self) -> usize {
        self.presign_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        container: &str,
        key: &str,
        content_type: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PutAck, Error> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::S3ResponseError(503));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let bytes_read = data.len();
        self.objects.lock().unwrap().insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(PutAck {
            response_status: 200,
            bytes_read,
        })
    }

    async fn presign_get(&self, container: &str, key: &str, ttl: Duration) -> Result<String, Error> {
        self.presign_count.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "memory://{container}/{key}?expires_in={}",
            ttl.as_secs()
        ))
    }
}

/// Stands in for ffprobe and ffmpeg. Remuxing writes the input prefixed with `faststart:` next to
/// it, the way the real remux leaves its output.
pub struct FakeMediaTools {
    probe_result: Option<ProbeResult>,
    fail_remux: bool,
    calls: Mutex<Vec<&'static str>>,
    seen_paths: Mutex<Vec<PathBuf>>,
}

impl FakeMediaTools {
    pub fn new(probe_result: ProbeResult) -> Self {
        Self {
            probe_result: Some(probe_result),
            fail_remux: false,
            calls: Mutex::new(Vec::new()),
            seen_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_probe() -> Self {
        Self {
            probe_result: None,
            ..Self::new(ProbeResult {
                width: 0,
                height: 0,
            })
        }
    }

    pub fn with_failing_remux(mut self) -> Self {
        self.fail_remux = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn seen_paths(&self) -> Vec<PathBuf> {
        self.seen_paths.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str, path: &Path) {
        assert!(path.exists(), "{call} called with missing file {}", path.display());
        self.calls.lock().unwrap().push(call);
        self.seen_paths.lock().unwrap().push(path.to_path_buf());
    }
}

#[async_trait]
impl MediaTools for FakeMediaTools {
    async fn probe(&self, path: &Path) -> Result<ProbeResult, Error> {
        self.record("probe", path);
        self.probe_result.ok_or_else(|| {
            Error::ProbeError(String::from("Invalid data found when processing input"))
        })
    }

    async fn remux(&self, input: &Path) -> Result<PathBuf, Error> {
        self.record("remux", input);
        if self.fail_remux {
            return Err(Error::RemuxError(String::from("moov atom not found")));
        }
        let mut content = b"faststart:".to_vec();
        content.extend(tokio::fs::read(input).await?);
        let output_path = processing_path(input);
        tokio::fs::write(&output_path, content).await?;
        Ok(output_path)
    }
}
