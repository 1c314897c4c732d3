//! CLI entry point for the fetcher tool.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fetcher_core::fetch::constants::DEFAULT_FOLLOW;
use fetcher_core::{Fetcher, FetcherConfig, ReqwestTransportConfig, RequestInit};
use futures_util::StreamExt;
use tracing::{debug, info};

mod app_config;
mod cli;

use app_config::{FileConfig, load_file_config};
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = load_file_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config.verbosity.map_or("info", |v| v.filter()),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, ?file_config, "CLI arguments parsed");

    let fetcher = Fetcher::from_config(&fetcher_config(&args, &file_config))
        .context("Failed to build HTTP transport")?;
    let init = request_init(&args, &file_config);

    let response = fetcher
        .fetch(args.url.as_str(), init)
        .await
        .with_context(|| format!("Failed to fetch {}", args.url))?;
    info!(
        status = response.status(),
        url = response.url(),
        redirects = response.redirect_count(),
        "Response received"
    );

    // A size limit or timeout only holds when the body is drained through
    // the response; stream straight to the sink otherwise.
    let buffered = if body_limited(&args, &file_config) {
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", args.url))?;
        Some(bytes)
    } else {
        None
    };

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create '{}'", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    if args.include {
        writeln!(out, "HTTP {} {}", response.status(), response.status_text())?;
        for (name, value) in response.headers() {
            writeln!(out, "{name}: {value}")?;
        }
        writeln!(out)?;
    }

    let written = match buffered {
        Some(bytes) => {
            out.write_all(&bytes)?;
            bytes.len() as u64
        }
        None => {
            let mut body = response.stream().context("Response body unavailable")?;
            let mut written: u64 = 0;
            while let Some(chunk) = body.next().await {
                let chunk =
                    chunk.with_context(|| format!("Failed to read body of {}", args.url))?;
                out.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            written
        }
    };
    out.flush()?;
    debug!(bytes = written, "Body written");

    Ok(())
}

fn body_limited(args: &Args, file: &FileConfig) -> bool {
    let size = args.max_size.or(file.max_size).unwrap_or(0);
    let timeout_ms = args.timeout.or(file.timeout_ms).unwrap_or(0);
    size > 0 || timeout_ms > 0
}

fn fetcher_config(args: &Args, file: &FileConfig) -> FetcherConfig {
    let defaults = ReqwestTransportConfig::default();
    FetcherConfig {
        transport: ReqwestTransportConfig {
            connect_timeout_secs: args
                .connect_timeout
                .or(file.connect_timeout_secs)
                .unwrap_or(defaults.connect_timeout_secs),
            proxy: args.proxy.clone().or_else(|| file.proxy.clone()),
            ..defaults
        },
    }
}

fn request_init(args: &Args, file: &FileConfig) -> RequestInit {
    let mut init = RequestInit::new()
        .method(args.method())
        .headers(args.headers.clone())
        .redirect(args.redirect)
        .follow(args.follow.or(file.follow).unwrap_or(DEFAULT_FOLLOW))
        .compress(!args.no_compress && file.compress.unwrap_or(true));
    if let Some(timeout_ms) = args.timeout.or(file.timeout_ms) {
        init = init.timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(size) = args.max_size.or(file.max_size) {
        init = init.size(size);
    }
    if let Some(data) = &args.data {
        init = init.body(data.as_str());
    }
    if let Some((user, password)) = &args.proxy_user {
        init = init.user(user.as_str()).password(password.as_str());
    }
    init
}
