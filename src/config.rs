use std::{
    cmp::{max, min},
    collections::HashMap,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use url::Url;

use crate::{data::s3utils::MAX_PRESIGN_EXPIRY_SECS, error::Error};

const DEFAULT_PRESIGN_TTL_SECS: u64 = 5 * 60;
const DEFAULT_MAX_VIDEO_UPLOAD_SIZE: u64 = 10 << 30;
const DEFAULT_MAX_THUMBNAIL_UPLOAD_SIZE: u64 = 10 << 20;

/// Credentials used to write objects and to sign read urls.
#[derive(Clone)]
pub struct SigningCredential {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredential")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Server configuration, built once on startup and handed to every component.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_db_connections: usize,
    pub jwt_secret: String,
    /// Directory uploads are staged in before being handed to ffmpeg.
    pub storage_root: PathBuf,
    pub object_container: String,
    pub s3_endpoint: String,
    pub s3_is_aws_region: bool,
    pub public_base_url: Url,
    pub signing_credential: SigningCredential,
    pub presign_ttl_default: Duration,
    pub process_timeout: Option<Duration>,
    pub concurrent_process_limit: usize,
    pub max_video_upload_size: u64,
    pub max_thumbnail_upload_size: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let vars = std::env::vars().collect::<HashMap<_, _>>();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::ConfigError(format!("Missing environment variable {key}")))
        };

        let public_base_url = required("PUBLIC_BASE_URL")?;
        let public_base_url = Url::parse(&public_base_url)
            .map_err(|e| Error::ConfigError(format!("PUBLIC_BASE_URL is not valid: {e}")))?;
        if public_base_url.cannot_be_a_base() {
            return Err(Error::ConfigError(String::from(
                "PUBLIC_BASE_URL cannot be a base url",
            )));
        }

        let object_container = required("S3_BUCKET")?;
        if object_container.contains(crate::data::reference::REFERENCE_DELIMITER) {
            return Err(Error::ConfigError(format!(
                "S3_BUCKET must not contain '{}'",
                crate::data::reference::REFERENCE_DELIMITER
            )));
        }

        let concurrent_process_limit = parse_optional(&lookup, "CONCURRENT_PROCESS_LIMIT")?
            .unwrap_or_else(|| max(1, min(8, num_cpus::get() / 2)));
        if concurrent_process_limit == 0 {
            return Err(Error::ConfigError(String::from(
                "CONCURRENT_PROCESS_LIMIT must be at least 1",
            )));
        }

        let presign_ttl_secs =
            parse_optional(&lookup, "PRESIGN_TTL_SECS")?.unwrap_or(DEFAULT_PRESIGN_TTL_SECS);
        if presign_ttl_secs == 0 || presign_ttl_secs > MAX_PRESIGN_EXPIRY_SECS {
            return Err(Error::ConfigError(format!(
                "PRESIGN_TTL_SECS must be between 1 and {MAX_PRESIGN_EXPIRY_SECS}"
            )));
        }

        Ok(Config {
            port: parse_required(&lookup, "PORT")?,
            database_url: required("DATABASE_URL")?,
            max_db_connections: parse_optional(&lookup, "MAX_DB_CONNECTIONS")?.unwrap_or(25),
            jwt_secret: required("JWT_SECRET")?,
            storage_root: PathBuf::from(required("ASSETS_ROOT")?),
            object_container,
            s3_endpoint: required("S3_REGION")?,
            s3_is_aws_region: parse_optional(&lookup, "S3_IS_AWS_REGION")?.unwrap_or(true),
            public_base_url,
            signing_credential: SigningCredential {
                access_key: required("S3_ACCESS_KEY")?,
                secret_key: required("S3_SECRET_KEY")?,
            },
            presign_ttl_default: Duration::from_secs(presign_ttl_secs),
            process_timeout: parse_optional(&lookup, "PROCESS_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            concurrent_process_limit,
            max_video_upload_size: parse_optional(&lookup, "MAX_VIDEO_UPLOAD_SIZE")?
                .unwrap_or(DEFAULT_MAX_VIDEO_UPLOAD_SIZE),
            max_thumbnail_upload_size: parse_optional(&lookup, "MAX_THUMBNAIL_UPLOAD_SIZE")?
                .unwrap_or(DEFAULT_MAX_THUMBNAIL_UPLOAD_SIZE),
        })
    }

    /// Create the staging directory if it does not exist yet.
    pub async fn ensure_assets_dir(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.storage_root)
            .await
            .map_err(|e| {
                Error::ConfigError(format!(
                    "Failed to create assets root {}: {e}",
                    self.storage_root.display()
                ))
            })
    }
}

fn parse_required<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_optional(lookup, key)?
        .ok_or_else(|| Error::ConfigError(format!("Missing environment variable {key}")))
}

fn parse_optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| Error::ConfigError(format!("{key} is not valid: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use crate::error::Error;

    use super::Config;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("PORT", "8091"),
            ("DATABASE_URL", "postgres://tubely@localhost/tubely"),
            ("JWT_SECRET", "secret"),
            ("ASSETS_ROOT", "./assets"),
            ("S3_BUCKET", "tubely-private"),
            ("S3_REGION", "us-east-2"),
            ("S3_ACCESS_KEY", "AKIA"),
            ("S3_SECRET_KEY", "shh"),
            ("PUBLIC_BASE_URL", "https://d1.cloudfront.net"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, Error> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.port, 8091);
        assert_eq!(config.max_db_connections, 25);
        assert!(config.s3_is_aws_region);
        assert_eq!(config.presign_ttl_default, Duration::from_secs(300));
        assert_eq!(config.process_timeout, None);
        assert!(config.concurrent_process_limit >= 1);
        assert_eq!(config.max_video_upload_size, 10 << 30);
        assert_eq!(config.max_thumbnail_upload_size, 10 << 20);
    }

    #[test]
    fn test_overrides() {
        let mut vars = base_vars();
        vars.insert("PRESIGN_TTL_SECS", "60");
        vars.insert("PROCESS_TIMEOUT_SECS", "120");
        vars.insert("S3_IS_AWS_REGION", "false");
        vars.insert("CONCURRENT_PROCESS_LIMIT", "3");
        let config = load(&vars).unwrap();
        assert_eq!(config.presign_ttl_default, Duration::from_secs(60));
        assert_eq!(config.process_timeout, Some(Duration::from_secs(120)));
        assert!(!config.s3_is_aws_region);
        assert_eq!(config.concurrent_process_limit, 3);
    }

    #[test]
    fn test_missing_and_invalid() {
        let mut vars = base_vars();
        vars.remove("JWT_SECRET");
        assert!(matches!(load(&vars), Err(Error::ConfigError(_))));

        let mut vars = base_vars();
        vars.insert("PORT", "not-a-port");
        assert!(matches!(load(&vars), Err(Error::ConfigError(_))));

        let mut vars = base_vars();
        vars.insert("S3_BUCKET", "a,b");
        assert!(matches!(load(&vars), Err(Error::ConfigError(_))));

        let mut vars = base_vars();
        vars.insert("CONCURRENT_PROCESS_LIMIT", "0");
        assert!(matches!(load(&vars), Err(Error::ConfigError(_))));

        for ttl in ["0", "604801", "-5"] {
            let mut vars = base_vars();
            vars.insert("PRESIGN_TTL_SECS", ttl);
            assert!(
                matches!(load(&vars), Err(Error::ConfigError(_))),
                "PRESIGN_TTL_SECS={ttl} should be rejected"
            );
        }

        let mut vars = base_vars();
        vars.insert("PRESIGN_TTL_SECS", "604800");
        assert!(load(&vars).is_ok());
    }
}
