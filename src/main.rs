#[macro_use]
extern crate diesel;
#[cfg(feature = "auto_migration")]
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use std::sync::Arc;

use config::Config;
use data::{encode::FfmpegTools, pipeline::Pipeline, s3utils::S3ObjectStore};
use dotenvy::dotenv;
use error::Error;
use mime::Mime;
use repository::PgVideoRepository;
use warp::{Filter, Rejection, Reply};

use crate::util::OptFmt;

mod auth;
mod config;
mod data;
mod error;
mod model;
mod repository;
mod schema;
#[cfg(test)]
mod test_util;
mod util;

#[cfg(feature = "auto_migration")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn main() {
    dotenv().ok();

    if let Err(e) = setup_logger() {
        eprintln!("Failed to set up logging: {e}");
        std::process::exit(1);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    #[cfg(feature = "auto_migration")]
    {
        use diesel::{Connection, PgConnection};

        log::info!("Running diesel migrations");
        let mut connection = match PgConnection::establish(&config.database_url) {
            Ok(connection) => connection,
            Err(e) => {
                log::error!("Failed to connect to database for migrations: {e}");
                std::process::exit(1);
            }
        };
        if let Err(e) = connection.run_pending_migrations(MIGRATIONS) {
            log::error!("Failed running db migrations: {e}");
            std::process::exit(1);
        }
        log::info!("Done running diesel migrations");
    }

    if let Err(e) = setup_tokio_runtime(config) {
        log::error!("Failed to start server: {e}");
        std::process::exit(1);
    }
}

/// Start a tokio runtime that runs a warp server.
#[tokio::main]
async fn setup_tokio_runtime(config: Config) -> Result<(), Error> {
    config.ensure_assets_dir().await?;

    let config = Arc::new(config);
    let repository = Arc::new(PgVideoRepository::new(&config)?);
    let store = Arc::new(S3ObjectStore::new(&config));
    let tools = Arc::new(FfmpegTools::new(&config));
    let pipeline = Arc::new(Pipeline::new(config.clone(), repository, store, tools));

    let port = config.port;
    log::info!("Starting server on port {port}");
    warp::serve(api_routes(config, pipeline))
        .run(([0, 0, 0, 0], port))
        .await;

    Ok(())
}

fn api_routes(
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let jwt_secret = Arc::new(config.jwt_secret.clone());
    let with_pipeline = warp::any().map(move || pipeline.clone());

    let upload_thumbnail_route = warp::path!("api" / "thumbnail_upload" / String)
        .and(warp::post())
        .and(auth::with_user(jwt_secret.clone()))
        .and(warp::header::<Mime>("content-type"))
        .and(warp::body::stream())
        .and(with_pipeline.clone())
        .and_then(data::upload_thumbnail_handler);

    let upload_video_route = warp::path!("api" / "video_upload" / String)
        .and(warp::post())
        .and(auth::with_user(jwt_secret.clone()))
        .and(warp::header::<Mime>("content-type"))
        .and(warp::body::stream())
        .and(with_pipeline.clone())
        .and_then(data::upload_video_handler);

    let get_video_route = warp::path!("api" / "videos" / String)
        .and(warp::get())
        .and(auth::with_user(jwt_secret))
        .and(with_pipeline)
        .and_then(data::get_video_handler);

    let routes = upload_thumbnail_route
        .or(upload_video_route)
        .or(get_video_route)
        .boxed();

    routes
        .recover(error::handle_rejection)
        .with(warp::log::custom(|info| {
            let is_upload = info.path().contains("_upload/");
            let log_level = if info.elapsed().as_secs() >= 10 && !is_upload {
                log::Level::Warn
            } else if info.elapsed().as_millis() >= 250 {
                log::Level::Info
            } else {
                log::Level::Debug
            };

            log::log!(
                target: "tubely::api",
                log_level,
                "{} \"{} {} {:?}\" {} \"{}\" \"{}\" {:?}",
                OptFmt(info.remote_addr()),
                info.method(),
                info.path(),
                info.version(),
                info.status().as_u16(),
                OptFmt(info.referer()),
                OptFmt(info.user_agent()),
                info.elapsed(),
            );
        }))
}

fn setup_logger() -> Result<(), Box<dyn std::error::Error>> {
    // create logs dir as fern does not appear to handle that itself
    if !std::path::Path::new("logs/").exists() {
        std::fs::create_dir("logs")?;
    }

    let logging_level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}]{}[{}] {}",
                record.level(),
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("tubely", logging_level)
        .level_for("tubely_server", logging_level)
        .chain(std::io::stdout())
        .chain(fern::DateBased::new("logs/", "logs_%Y-%m-%d.log"))
        .apply()?;

    Ok(())
}
