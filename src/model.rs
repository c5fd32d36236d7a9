use chrono::{DateTime, offset::Utc};
use diesel::{Identifiable, Queryable, Selectable};
use serde::Serialize;
use uuid::Uuid;

use crate::schema::videos;

/// A video record. Created elsewhere, the upload pipeline only ever sets `thumbnail_url` and
/// `video_url`.
///
/// `video_url` holds an encoded storage reference (see `data::reference`) and is replaced by a
/// presigned url before the record is sent to a client.
#[derive(Identifiable, Queryable, Selectable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = videos)]
#[diesel(primary_key(id))]
pub struct Video {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub user_id: Uuid,
}
