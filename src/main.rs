//! spiffe-rotate - in-process mTLS certificate rotation
//!
//! Keeps a leaf certificate issued by a Vault / `OpenBao` PKI backend fresh
//! and builds rustls configs that authorize peers by SPIFFE ID.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rustls::RootCertStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use spiffe_rotate::{
    Authorizer, Issuer, Manager, Options, PkiIssuer, VaultClient,
    cli::{Cli, Command},
    config::Config,
    rotation::{error_hook, rotate_hook},
    setup_tracing, tls,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup tracing
    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.as_deref().unwrap_or(&config.log.format);
    if let Err(e) = setup_tracing(level, Some(format)) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Issue) => run_issue(&config).await,
        Some(Command::Check { ids }) => run_check(&config, &ids),
        Some(Command::Run) | None => run_rotation(config).await,
    }
}

fn build_issuer(config: &Config) -> spiffe_rotate::Result<Arc<PkiIssuer>> {
    let client = Arc::new(VaultClient::from_config(&config.vault)?);
    Ok(Arc::new(PkiIssuer::from_config(client, &config.issuer)))
}

/// Issue once and print the bundle summary
async fn run_issue(config: &Config) -> ExitCode {
    let issuer = match build_issuer(config) {
        Ok(i) => i,
        Err(e) => {
            error!("Failed to create issuer: {e}");
            return ExitCode::FAILURE;
        }
    };

    match issuer.issue().await {
        Ok(bundle) => match serde_json::to_string_pretty(&bundle.info()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Failed to serialize to JSON: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("❌ Issuance failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Evaluate authorizer rules against the given IDs
fn run_check(config: &Config, ids: &[String]) -> ExitCode {
    let authorizer = Authorizer::from_config(&config.authorizer);
    if authorizer.is_empty() {
        warn!("No authorizer rules configured; every ID is denied");
    }

    let mut denied = 0usize;
    for id in ids {
        if authorizer.is_allowed(id) {
            println!("✅ allow {id}");
        } else {
            println!("❌ deny  {id}");
            denied += 1;
        }
    }

    if denied == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Rotate until Ctrl-C
async fn run_rotation(config: Config) -> ExitCode {
    let issuer = match build_issuer(&config) {
        Ok(i) => i,
        Err(e) => {
            error!("Failed to create issuer: {e}");
            return ExitCode::FAILURE;
        }
    };

    let opts = Options::from_config(&config.rotation)
        .with_on_rotate(rotate_hook(|_ctx, info| async move {
            info!(
                serial = %info.serial_number,
                common_name = %info.common_name,
                not_after = %info.not_after,
                "Rotation hook: new certificate active"
            );
        }))
        .with_on_error(error_hook(|_ctx, err| async move {
            warn!(error = %err, "Rotation hook: issuance failed");
        }));
    let manager = Arc::new(Manager::with_options(issuer, opts));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.vault.addr,
        role = %config.issuer.role,
        "Starting certificate rotation"
    );

    if let Err(e) = manager.start().await {
        error!("Initial issuance failed: {e}");
        return ExitCode::FAILURE;
    }

    let authorizer = Arc::new(Authorizer::from_config(&config.authorizer));
    let server = tls::server_config(Arc::clone(&manager), Arc::clone(&authorizer), RootCertStore::empty());
    let client = tls::client_config(Arc::clone(&manager), authorizer, RootCertStore::empty());
    match (server, client) {
        (Ok(server), Ok(client)) => info!(
            server_alpn = server.alpn_protocols.len(),
            client_alpn = client.alpn_protocols.len(),
            "mTLS configs ready"
        ),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to build TLS config: {e}");
            return ExitCode::FAILURE;
        }
    }

    let cancel = CancellationToken::new();
    let loop_task = tokio::spawn({
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received");
    cancel.cancel();

    if let Err(e) = loop_task.await {
        error!("Rotation loop ended abnormally: {e}");
        return ExitCode::FAILURE;
    }

    info!("Rotation shutdown complete");
    ExitCode::SUCCESS
}
