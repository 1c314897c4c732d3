//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use fetcher_core::RedirectPolicy;

/// Fetch a URL and print the response body.
///
/// Redirects, timeouts and gzip/deflate decoding follow fetch semantics;
/// HTTP error statuses are printed, not treated as failures.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Absolute http(s) URL to fetch
    pub url: String,

    /// Request method (default: POST with --data, else GET)
    #[arg(short = 'X', long)]
    pub method: Option<String>,

    /// Request header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body text
    #[arg(short = 'd', long)]
    pub data: Option<String>,

    /// Redirect handling: follow, manual or error
    #[arg(long, default_value = "follow")]
    pub redirect: RedirectPolicy,

    /// Maximum redirects to follow (0-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub follow: Option<u32>,

    /// Timeout in milliseconds per hop and for the body (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Maximum response body size in bytes (0 disables)
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Do not request or decode gzip/deflate
    #[arg(long)]
    pub no_compress: bool,

    /// Proxy URL for all schemes
    #[arg(long)]
    pub proxy: Option<String>,

    /// Proxy credentials as USER:PASSWORD, sent when the proxy asks
    #[arg(long, value_parser = parse_credentials)]
    pub proxy_user: Option<(String, String)>,

    /// Connect timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Print the status line and response headers before the body
    #[arg(short, long)]
    pub include: bool,

    /// Write the body to FILE instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/fetcher/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Method to send: the explicit `-X` value, else POST when a body is given.
    #[must_use]
    pub fn method(&self) -> &str {
        match (&self.method, &self.data) {
            (Some(method), _) => method,
            (None, Some(_)) => "POST",
            (None, None) => "GET",
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("expected NAME:VALUE, got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_credentials(raw: &str) -> Result<(String, String), String> {
    raw.split_once(':')
        .map(|(user, password)| (user.to_string(), password.to_string()))
        .ok_or_else(|| "expected USER:PASSWORD".to_string())
}
