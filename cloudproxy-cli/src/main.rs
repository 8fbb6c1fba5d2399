use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cloudproxy_engine::{FetchPipeline, MimeTypes, ProxyConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{Level, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

mod cli;
mod error;
mod router;
mod tls;

use cli::CliArgs;
use error::AppError;
use router::{AppState, build_router};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();
    let _log_guard = init_logging(&args)?;

    info!("Cloudproxy - caching HTTPS proxy for object storage");
    info!("==================================================================");

    let mime_types = MimeTypes::from_json_file(&args.mime_types_file)?;
    info!(file = %args.mime_types_file.display(), "Loaded MIME types");

    let config = ProxyConfig::builder()
        .with_cache_root(&args.cache_dir)
        .with_auth_secret(&args.auth_cookie)
        .with_exempt_path(args.auth_path.clone())
        .with_credentials(&args.access_key_id, &args.secret_access_key)
        .with_video_base_url(args.video_base_url.clone())
        .with_timeout(Duration::from_secs(args.fetch_timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_passphrase_option(args.passphrase.clone())
        .with_mime_types(mime_types)
        .with_post_fetch_hook(args.post_fetch_command())
        .build();
    config.validate()?;
    info!(
        cache_root = %config.cache_root.display(),
        upstream = ?config.upstream,
        codec = ?config.codec,
        "Proxy configuration"
    );

    let pipeline = FetchPipeline::new(Arc::new(config))?;
    pipeline.initialize().await?;

    let tls_config = tls::build_server_config(&args.server_certificate, &args.server_key)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let router = build_router(AppState::new(
        Arc::new(pipeline),
        args.trusted_addresses.clone(),
    ));

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "Listening for HTTPS connections");

    tls::serve(listener, acceptor, router).await
}

/// Install the stdout subscriber and, with `--log-file`, a non-blocking file writer.
fn init_logging(args: &CliArgs) -> Result<Option<WorkerGuard>, AppError> {
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    Ok(guard)
}
