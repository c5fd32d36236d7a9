table! {
    videos (id) {
        id -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        title -> Varchar,
        description -> Text,
        thumbnail_url -> Nullable<Varchar>,
        video_url -> Nullable<Varchar>,
        user_id -> Uuid,
    }
}
