use async_trait::async_trait;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::{
        AsyncDieselConnectionManager,
        deadpool::{Object, Pool},
    },
};
use uuid::Uuid;

use crate::{config::Config, error::Error, model::Video, schema::videos};

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

/// Lookup and update of video records.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get_video(&self, id: Uuid) -> Result<Video, Error>;

    /// Persist the reference fields and `updated_at` of the given record.
    async fn update_video(&self, video: &Video) -> Result<(), Error>;
}

pub struct PgVideoRepository {
    pool: DbPool,
}

impl PgVideoRepository {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
        let pool = Pool::builder(manager)
            .max_size(config.max_db_connections)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to initialise connection pool: {e}")))?;

        Ok(Self { pool })
    }

    async fn acquire_db_connection(&self) -> Result<DbConnection, Error> {
        self.pool.get().await.map_err(Error::from)
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn get_video(&self, id: Uuid) -> Result<Video, Error> {
        let mut connection = self.acquire_db_connection().await?;
        videos::table
            .find(id)
            .get_result::<Video>(&mut *connection)
            .await
            .optional()?
            .ok_or(Error::VideoNotFoundError(id))
    }

    async fn update_video(&self, video: &Video) -> Result<(), Error> {
        let mut connection = self.acquire_db_connection().await?;
        let updated_rows = diesel::update(videos::table.find(video.id))
            .set((
                videos::thumbnail_url.eq(&video.thumbnail_url),
                videos::video_url.eq(&video.video_url),
                videos::updated_at.eq(video.updated_at),
            ))
            .execute(&mut *connection)
            .await?;

        if updated_rows == 0 {
            return Err(Error::VideoNotFoundError(video.id));
        }

        Ok(())
    }
}
