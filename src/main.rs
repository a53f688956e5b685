mod cli;

use devcamper::pipeline::Stage;
use devcamper::{config, pipeline, routes, server};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

/// File config, then environment. CLI flags are applied by the caller.
fn load(config_path: Option<&Path>) -> Result<config::Config> {
    let mut config = config::load_config_or_default(config_path)?;
    config::apply_env(&mut config)?;
    Ok(config)
}

fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<i32> {
    let mut config = load(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::debug!(
        "Starting devcamper on {}:{} ({})",
        config.server.host,
        config.server.port,
        config.server.mode
    );

    let rt = tokio::runtime::Runtime::new()?;
    let reason = rt.block_on(server::start_server(config))?;
    Ok(reason.exit_code())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "devcamper=trace,tower_http=debug".to_string()
        } else {
            "devcamper=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let code = start_server(host, port, cli.config.as_deref())?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Stages => print_stages(cli.config.as_deref()),
        Commands::Version => {
            println!("devcamper {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            print_summary(&config);
        }
    }

    Ok(())
}

fn print_summary(config: &config::Config) {
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Mode: {}", config.server.mode);
    println!("  Static dir: {}", config.server.static_dir.display());
    println!(
        "  Rate limit: {} requests / {}s",
        config.rate_limit.max_requests, config.rate_limit.window_secs
    );
    println!(
        "  Body limits: json {} bytes, upload {} bytes",
        config.body.json_limit_bytes, config.body.upload_limit_bytes
    );
}

fn print_stages(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let limiter = Arc::new(pipeline::stages::FixedWindowLimiter::new(&config.rate_limit));
    let pipeline = pipeline::build_pipeline(&config, limiter, routes::api_v1());

    println!("Pipeline ({} mode):", config.server.mode);
    let mut position = 0;
    for stage in pipeline.stages() {
        position += 1;
        if stage.is_router() {
            println!("  {:>2}. {} [router]", position, stage.name());
        } else {
            println!("  {:>2}. {}", position, stage.name());
        }
    }
    println!("  {:>2}. {} [terminal]", position + 1, pipeline.error_handler_name());

    Ok(())
}
