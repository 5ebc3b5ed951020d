use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod cli;
mod config;
mod embedding;
mod fetch;
mod search;
mod similarity;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use search::{CancelToken, SearchOptions};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();

    let mut config = Config::load()?;

    match args.command {
        cli::Command::Serve { addr } => {
            if let Some(addr) = addr {
                config.listen_addr = addr;
            }
            web::start_daemon(config)
        }

        cli::Command::Search {
            image,
            threshold,
            top_k,
            report,
        } => {
            let filename = image.to_string_lossy();
            if !web::allowed_file(&filename) {
                bail!("unsupported image type: {filename} (expected png, jpg or jpeg)");
            }
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;

            if let Some(threshold) = threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    bail!("threshold must be between 0.0 and 1.0, got {threshold}");
                }
            }

            let service = Arc::new(app::build_service(&config)?);

            let mut options: SearchOptions = service.options().clone();
            if let Some(threshold) = threshold {
                options.threshold = threshold;
            }
            if top_k.is_some() {
                options.top_k = top_k;
            }
            let cancel = CancelToken::new();

            let result = runtime()?.block_on(async {
                let ctrl_c = {
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            cancel.cancel();
                        }
                    })
                };
                let result = service.search_with(bytes, &options, &cancel).await;
                ctrl_c.abort();
                result
            })?;

            if report {
                for skipped in &result.skipped {
                    eprintln!("skipped product {}: {}", skipped.id, skipped.cause);
                }
                if result.cancelled {
                    eprintln!("search was interrupted, results are partial");
                }
            }

            let envelope = web::Envelope::from_report(result);
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }

        cli::Command::Products { count } => {
            let catalog = app::build_catalog(&config);
            let products = catalog.list_active_products_with_images()?;

            if count {
                println!("{} products found", products.len());
                return Ok(());
            }

            let envelope = web::Envelope::new(products.into_iter().map(Into::into).collect());
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
    }
}
