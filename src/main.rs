use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use mailwire::config::MailwireConfig;
use mailwire::context::Context;
use mailwire::error::RateLimitError;
use mailwire::ratelimit::{EndpointType, RateLimiter};

/// Inspect and exercise the Mailwire client-side rate limiter.
#[derive(Debug, Parser)]
#[command(name = "mailwire", version, about)]
struct Cli {
    /// YAML configuration file; MAILWIRE__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the rate limit status of one or all endpoint categories
    Status {
        /// Category to report (general, statistics, send_message)
        endpoint: Option<EndpointType>,
    },
    /// Print the category a request would be throttled under
    Classify {
        /// HTTP method
        method: String,
        /// Request path
        path: String,
    },
    /// Fire concurrent admissions against one category and report the outcome
    Simulate {
        #[arg(long, default_value = "POST")]
        method: String,
        #[arg(long, default_value = "/email")]
        path: String,
        /// Number of concurrent requests
        #[arg(long, default_value_t = 20)]
        requests: usize,
        /// Per-request deadline in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
}

#[derive(Debug, Default, Serialize)]
struct SimulationSummary {
    endpoint: Option<EndpointType>,
    requests: usize,
    admitted: usize,
    canceled: usize,
    deadline_exceeded: usize,
    elapsed_ms: u128,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = MailwireConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limiting)?);
    debug!(global_enabled = rate_limiter.is_global_enabled(), "Rate limiter initialized");

    match cli.command {
        Command::Status { endpoint } => {
            let statuses = match endpoint {
                Some(endpoint) => vec![rate_limiter.get_rate_limit_status(endpoint)],
                None => rate_limiter.statuses(),
            };
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        Command::Classify { method, path } => {
            println!("{}", rate_limiter.classify(&method, &path));
        }
        Command::Simulate {
            method,
            path,
            requests,
            timeout_ms,
        } => {
            let summary = simulate(
                rate_limiter,
                &method,
                &path,
                requests,
                Duration::from_millis(timeout_ms),
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(
    rate_limiter: Arc<RateLimiter>,
    method: &str,
    path: &str,
    requests: usize,
    timeout: Duration,
) -> SimulationSummary {
    let endpoint = rate_limiter.classify(method, path);
    info!(endpoint = %endpoint, requests = requests, timeout_ms = timeout.as_millis() as u64, "Starting simulation");

    let start = Instant::now();
    let ctx = Context::background().with_timeout(timeout);
    let waits = (0..requests).map(|i| {
        let rate_limiter = rate_limiter.clone();
        let ctx = ctx.clone();
        let method = method.to_string();
        let path = path.to_string();
        tokio::spawn(async move {
            let result = rate_limiter.wait_for_token_with_context(&ctx, &method, &path).await;
            debug!(request = i, elapsed_ms = start.elapsed().as_millis() as u64, result = ?result, "Admission finished");
            result
        })
    });

    let mut summary = SimulationSummary {
        endpoint: Some(endpoint),
        requests,
        ..Default::default()
    };

    for result in futures::future::join_all(waits).await {
        match result {
            Ok(Ok(())) => summary.admitted += 1,
            Ok(Err(RateLimitError::Canceled)) => summary.canceled += 1,
            Ok(Err(RateLimitError::DeadlineExceeded)) => summary.deadline_exceeded += 1,
            Ok(Err(err)) => debug!(error = %err, "Unexpected admission error"),
            Err(err) => debug!(error = %err, "Admission task failed"),
        }
    }

    summary.elapsed_ms = start.elapsed().as_millis();
    info!(
        admitted = summary.admitted,
        deadline_exceeded = summary.deadline_exceeded,
        elapsed_ms = summary.elapsed_ms as u64,
        "Simulation finished"
    );
    summary
}
