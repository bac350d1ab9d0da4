//! Web server

use crate::cli::ServeArgs;
use crate::error::DisclosureError;

use std::path::PathBuf;
use std::{net::SocketAddr, str::FromStr, time::Duration};

use axum::ServiceExt;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use expanduser::expanduser;
use tokio::signal;
use tracing::info;

/// Serve the disclosure statistics service
///
/// # Arguments
///
/// * `args`: Serve command line arguments
/// * `service`: The [crate::app::Service] to serve
pub async fn serve(args: &ServeArgs, service: crate::app::Service) -> Result<(), DisclosureError> {
    let addr = SocketAddr::from_str(&format!("{}:{}", args.host, args.port)).map_err(|_| {
        DisclosureError::Configuration {
            reason: format!(
                "invalid host name, IP address or port number {}:{}",
                args.host, args.port
            ),
        }
    })?;

    // Catch ctrl+c and try to shutdown gracefully
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(
        handle.clone(),
        args.graceful_shutdown_timeout,
    ));

    if args.https {
        let abs_cert_file = tls_file(&args.cert_file, "certificate")?;
        let abs_key_file = tls_file(&args.key_file, "key")?;
        // Set up TLS config
        let tls_config = RustlsConfig::from_pem_file(abs_cert_file, abs_key_file)
            .await
            .map_err(|err| DisclosureError::Configuration {
                reason: format!("failed to load TLS certificate files: {err}"),
            })?;
        info!("listening on https://{}", addr);
        // run HTTPS server with hyper
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(service.into_make_service())
            .await
            .map_err(DisclosureError::Server)
    } else {
        info!("listening on http://{}", addr);
        // run HTTP server with hyper
        axum_server::bind(addr)
            .handle(handle)
            .serve(service.into_make_service())
            .await
            .map_err(DisclosureError::Server)
    }
}

/// Expand and canonicalise the path of a TLS file, checking that it exists.
fn tls_file(path: &str, kind: &str) -> Result<PathBuf, DisclosureError> {
    let expanded = expanduser(path).map_err(|_| DisclosureError::Configuration {
        reason: format!(
            "failed to expand ~ in TLS {kind} file path {path}. Please provide an absolute path instead."
        ),
    })?;
    expanded
        .canonicalize()
        .map_err(|_| DisclosureError::Configuration {
            reason: format!(
                "TLS {kind} file expected at '{}' but not found",
                expanded.display()
            ),
        })
}

/// Graceful shutdown handler
///
/// Installs signal handlers to catch Ctrl-C or SIGTERM and trigger a graceful shutdown.
async fn shutdown_signal(handle: Handle, timeout: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
    // Force shutdown if graceful shutdown takes longer than the timeout
    handle.graceful_shutdown(Some(Duration::from_secs(timeout)));
}
