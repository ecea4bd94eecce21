use std::env;
use std::process::ExitCode;

use aws_config::BehaviorVersion;
use clap::Parser;
use log::{error, info, warn};
use serde::Serialize;
use shared::ImagesetId;
use tokio_util::sync::CancellationToken;

use pipeline::cli::{Cli, Command, S3_BUCKET_ENV};
use pipeline::commands::{self, CommandError};
use pipeline::detector::{self, ImageLoader, ImageLocator};
use pipeline::error::error_chain;
use pipeline::storage::S3Service;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.global.debug { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(level));

    let config = match cli.resolve_config(env::var(S3_BUCKET_ENV).ok()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding detections");
            ctrl_c.cancel();
        }
    });

    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let loader = ImageLoader::new(Some(S3Service::new(
        aws_sdk_s3::Client::new(&aws_config),
        None,
    )));

    match cli.command {
        Command::DetectImage { locator } => {
            let locator = match ImageLocator::parse(&locator) {
                Ok(locator) => locator,
                Err(e) => {
                    error!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let detector = match detector::load_model_detector(&config.model_file, loader) {
                Ok(detector) => detector,
                Err(e) => {
                    error!("Failed to load detector: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let outcome = commands::detect_image(&detector, &locator, &config).await;
            print_json(&outcome);
            if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::DetectImageBatch {
            csv,
            root_dir,
            filename_column,
        } => {
            let model_file = config.model_file.clone();
            let result = commands::detect_image_batch(
                &csv,
                &filename_column,
                root_dir.as_deref(),
                &config,
                move || detector::load_model_detector(&model_file, loader),
                cancel,
            )
            .await;
            match result {
                Ok(results) => {
                    print_json(&results);
                    ExitCode::SUCCESS
                }
                Err(e) => fail(&e),
            }
        }
        Command::DetectImageset { imageset_id, .. } => {
            let dry_run = config.dry_run;
            match commands::detect_imageset(ImagesetId(imageset_id), config, &aws_config, cancel).await {
                Ok(report) => {
                    info!(
                        "Run {} finished with status {} ({} images, {} succeeded, {} failed)",
                        report.run_id, report.status, report.total, report.succeeded, report.failed
                    );
                    if dry_run {
                        print_json(&report.results);
                    }
                    print_json(&report);
                    ExitCode::SUCCESS
                }
                Err(e) => fail(&e),
            }
        }
    }
}

fn fail(e: &CommandError) -> ExitCode {
    error!("{}", error_chain(e));
    let processed = e.images_processed();
    if processed > 0 {
        error!("{} images were processed before the failure", processed);
    }
    ExitCode::FAILURE
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}
