use serde::Serialize;
use thiserror::Error;
use warp::{Rejection, Reply, hyper::StatusCode, reject::Reject};

use crate::data::pipeline::Failed;

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not establish database connection")]
    DatabaseConnectionError,
    #[error("There has been an error executing a query: '{0}'")]
    QueryError(String),
    #[error("No video found for id {0}")]
    VideoNotFoundError(uuid::Uuid),
    #[error("Failed to decode request header as valid utf8")]
    UtfEncodingError,
    #[error("The auth header is not formatted correctly (expected JWT 'Bearer ' header)")]
    InvalidAuthHeaderError,
    #[error("No auth header provided")]
    MissingAuthHeaderError,
    #[error("The JWT is not or no longer valid")]
    InvalidJwtError,
    #[error("The current user does not own video {0}")]
    NotVideoOwnerError(uuid::Uuid),
    #[error("Invalid video id '{0}'")]
    InvalidIdError(String),
    #[error("Unsupported media type '{0}'")]
    UnsupportedMediaTypeError(String),
    #[error("The multipart body could not be read: {0}")]
    InvalidMultipartError(String),
    #[error("The upload exceeds the maximum size of {0} bytes")]
    UploadTooLargeError(u64),
    #[error("Failed to read random bytes for object key: {0}")]
    RandomSourceError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Failed to stage upload: {0}")]
    StagingError(String),
    #[error("ffprobe failed: {0}")]
    ProbeError(String),
    #[error("Malformed ffprobe output: {0}")]
    MalformedProbeOutputError(String),
    #[error("ffmpeg failed: {0}")]
    RemuxError(String),
    #[error("{0} did not finish within {1:?}")]
    ProcessTimeoutError(&'static str, std::time::Duration),
    #[error("The task was cancelled")]
    CancellationError,
    #[error("S3 error: {0}")]
    S3Error(String),
    #[error("S3 responded with non success status {0}")]
    S3ResponseError(u16),
    #[error("Failed to presign url: {0}")]
    PresignError(String),
    #[error("Failed to persist reference after upload of '{key}': {cause}")]
    CommitError { key: String, cause: String },
    #[error("Invalid storage reference '{0}'")]
    InvalidReferenceError(String),
    #[error("Invalid url: {0}")]
    InvalidUrlError(String),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl Reject for Error {}

/// The status class an error is reported under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    Auth,
    NotFound,
    Processing,
    Publish,
    Commit,
    Internal,
}

impl ErrorClass {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorClass::Input => StatusCode::BAD_REQUEST,
            ErrorClass::Auth => StatusCode::UNAUTHORIZED,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Processing
            | ErrorClass::Publish
            | ErrorClass::Commit
            | ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_server_error(self) -> bool {
        self.status_code().is_server_error()
    }

    fn description(self) -> &'static str {
        match self {
            ErrorClass::Input => "Invalid request",
            ErrorClass::Auth => "Unauthorized",
            ErrorClass::NotFound => "Video not found",
            ErrorClass::Processing => "Couldn't process media",
            ErrorClass::Publish => "Couldn't upload media",
            ErrorClass::Commit => "Couldn't update video",
            ErrorClass::Internal => "Internal server error",
        }
    }
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidIdError(_)
            | Error::UnsupportedMediaTypeError(_)
            | Error::InvalidMultipartError(_)
            | Error::UploadTooLargeError(_) => ErrorClass::Input,
            Error::UtfEncodingError
            | Error::InvalidAuthHeaderError
            | Error::MissingAuthHeaderError
            | Error::InvalidJwtError
            | Error::NotVideoOwnerError(_) => ErrorClass::Auth,
            Error::VideoNotFoundError(_) => ErrorClass::NotFound,
            Error::ProbeError(_)
            | Error::MalformedProbeOutputError(_)
            | Error::RemuxError(_)
            | Error::ProcessTimeoutError(..) => ErrorClass::Processing,
            Error::S3Error(_) | Error::S3ResponseError(_) => ErrorClass::Publish,
            Error::CommitError { .. } => ErrorClass::Commit,
            Error::DatabaseConnectionError
            | Error::QueryError(_)
            | Error::RandomSourceError(_)
            | Error::IoError(_)
            | Error::StagingError(_)
            | Error::CancellationError
            | Error::PresignError(_)
            | Error::InvalidReferenceError(_)
            | Error::InvalidUrlError(_)
            | Error::ConfigError(_) => ErrorClass::Internal,
        }
    }

    /// The message sent to the client. Server side errors never expose their detail.
    pub fn public_message(&self) -> String {
        let class = self.class();
        if class.is_server_error() {
            class.description().to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Error::QueryError(e.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for Error {
    fn from(e: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        log::error!("Failed to acquire database connection: {e}");
        Error::DatabaseConnectionError
    }
}

impl From<s3::error::S3Error> for Error {
    fn from(e: s3::error::S3Error) -> Self {
        Error::S3Error(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    message: String,
    status: String,
}

fn error_reply(code: StatusCode, message: String) -> warp::reply::WithStatus<warp::reply::Json> {
    let err_response = ErrorResponse {
        message,
        status: code.to_string(),
    };

    warp::reply::with_status(warp::reply::json(&err_response), code)
}

/// Creates a Rejection response for the given error and logs internal server errors.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(failed) = err.find::<Failed>() {
        let class = failed.cause.class();
        if class.is_server_error() {
            log::error!("Encountered internal server error: {}", failed);
        }
        Ok(error_reply(
            class.status_code(),
            failed.cause.public_message(),
        ))
    } else if let Some(e) = err.find::<Error>() {
        let class = e.class();
        if class.is_server_error() {
            log::error!("Encountered internal server error: {}", e);
        }
        Ok(error_reply(class.status_code(), e.public_message()))
    } else {
        Err(err)
    }
}
