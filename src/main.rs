//! Mock API Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mock_api_server::{MockRequest, MockServer, MockServerConfig};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-api-server",
    about = "Configuration-driven HTTP mock server - validate configs and resolve requests offline",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Method of the request to resolve
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Path of the request to resolve; nothing is resolved without it
    #[arg(short, long)]
    path: Option<String>,

    /// Request header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Raw query string, without the leading `?`
    #[arg(short, long)]
    query: Option<String>,

    /// Request body
    #[arg(short, long)]
    body: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    };

    // Validate and exit if requested
    if args.validate {
        let warnings = config.warnings();
        for warning in &warnings {
            println!("warning: {}", warning);
        }
        println!(
            "Configuration is valid ({} endpoints defined, {} warnings)",
            config.endpoints.len(),
            warnings.len()
        );
        return Ok(());
    }

    let Some(path) = args.path else {
        println!(
            "Configuration loaded ({} endpoints); pass --path to resolve a request",
            config.endpoints.len()
        );
        return Ok(());
    };

    let mut request = MockRequest::new(args.method, path);
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid header '{}', expected NAME:VALUE", header))?;
        request = request.with_header(name.trim(), value.trim());
    }
    if let Some(query) = args.query {
        request = request.with_query(query);
    }
    if let Some(body) = args.body {
        request = request.with_body(body);
    }

    let server = MockServer::new(config);
    let response = server.handle(&request).await;

    println!("HTTP {}", response.status);
    let mut headers: Vec<_> = response.headers.iter().collect();
    headers.sort();
    for (name, value) in headers {
        println!("{}: {}", name, value);
    }
    if let Some(rule) = response.matched_rule {
        println!("X-Mock-Matched-Rule: {}", rule);
    }
    println!();
    println!("{}", String::from_utf8_lossy(&response.body));

    Ok(())
}
