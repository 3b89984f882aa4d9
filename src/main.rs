//! none-authservice - permissive SASL/TLS authentication gate for AMQP 1.0
//!
//! Accepts every credential, stamps the connection with an identity and the
//! `manage` group, and closes.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use none_authservice::{
    Error,
    cli::{Cli, Command, TlsCommand},
    client::{AuthServiceClient, Credentials},
    config::ListenerConfig,
    listener::{IdentityStamp, Listener, shutdown_signal},
    setup_tracing,
    tls::{
        CertGenerator, EndpointOptions, TlsSettings, build_client_options,
        cert_manager::{CaParams, LeafCertParams},
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Probe {
            ref host,
            port,
            ref servername,
            ref username,
            ref password,
            timeout_secs,
        }) => {
            let endpoint = EndpointOptions {
                host: Some(host.clone()),
                port: Some(port),
                servername: servername.clone(),
            };
            let credentials = Credentials {
                username: username.clone(),
                password: password.clone(),
            };
            run_probe(&endpoint, &credentials, Duration::from_secs(timeout_secs)).await
        }
        Some(Command::Paths) => run_paths(),
        Some(Command::Tls(ref cmd)) => run_tls_command(cmd),
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Run the authentication listener
async fn run_server(cli: &Cli) -> ExitCode {
    let config = match ListenerConfig::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.port = Some(port);
            }
            if let Some(ref host) = cli.host {
                config.host = host.clone();
            }
            if let Some(ref cert_dir) = cli.cert_dir {
                config.cert_dir = cert_dir.clone();
            }
            config
        }
        Err(e) => return startup_failure("Failed to load configuration", &e),
    };

    let listener = match Listener::bind(&config, IdentityStamp::default()).await {
        Ok(l) => l,
        Err(e) => return startup_failure("Failed to start listener", &e),
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port.unwrap_or_default(),
        cert_dir = %config.cert_dir.display(),
        "none-authservice listening"
    );

    match listener.serve(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Listener error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Log a startup error. Missing or unusable configuration and TLS material
/// exit with status 2, anything else (bind failures) with 1.
fn startup_failure(context: &str, e: &Error) -> ExitCode {
    error!(fatal = e.is_fatal(), "{context}: {e}");
    if e.is_fatal() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

/// Authenticate against a running gate and print the grant
async fn run_probe(endpoint: &EndpointOptions, credentials: &Credentials, timeout: Duration) -> ExitCode {
    let settings = match TlsSettings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    let options = match build_client_options(endpoint, &settings) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let client = AuthServiceClient::new(options).with_timeout(timeout);
    match client.authenticate(credentials).await {
        Ok(grant) => match serde_json::to_string_pretty(&grant) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Failed to serialize grant: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("❌ Authentication failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print resolved TLS paths
fn run_paths() -> ExitCode {
    let paths = match TlsSettings::from_env() {
        Ok(settings) => settings.resolve_paths(),
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&paths) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to serialize paths: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run development certificate commands
fn run_tls_command(cmd: &TlsCommand) -> ExitCode {
    match cmd {
        TlsCommand::InitCa { out, cn, days } => {
            let ca = match CertGenerator::init_ca(&CaParams {
                cn,
                validity_days: *days,
            }) {
                Ok(ca) => ca,
                Err(e) => {
                    eprintln!("❌ {e}");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = CertGenerator::write_to_dir(&ca, out, "ca") {
                eprintln!("❌ {e}");
                return ExitCode::FAILURE;
            }
            println!("✅ CA written to {}", out.display());
            println!("   {}", out.join("ca.crt").display());
            println!("   {}", out.join("ca.key").display());
            ExitCode::SUCCESS
        }
        TlsCommand::Issue {
            ca_dir,
            out,
            cn,
            san_dns,
            days,
        } => {
            let (ca_cert, ca_key) = match (
                std::fs::read_to_string(ca_dir.join("ca.crt")),
                std::fs::read_to_string(ca_dir.join("ca.key")),
            ) {
                (Ok(cert), Ok(key)) => (cert, key),
                (Err(e), _) | (_, Err(e)) => {
                    eprintln!("❌ Cannot read CA from {}: {e}", ca_dir.display());
                    return ExitCode::FAILURE;
                }
            };

            let mut sans = san_dns.clone();
            if sans.is_empty() {
                sans.push(cn.clone());
            }
            let params = LeafCertParams {
                cn,
                san_dns: sans,
                validity_days: *days,
            };
            let leaf = match CertGenerator::issue_leaf(&params, &ca_cert, &ca_key) {
                Ok(leaf) => leaf,
                Err(e) => {
                    eprintln!("❌ {e}");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = CertGenerator::write_to_dir(&leaf, out, "tls") {
                eprintln!("❌ {e}");
                return ExitCode::FAILURE;
            }
            // Listener and clients look for ca.crt next to tls.crt.
            if out != ca_dir {
                if let Err(e) = std::fs::write(out.join("ca.crt"), &ca_cert) {
                    eprintln!("❌ Cannot copy ca.crt: {e}");
                    return ExitCode::FAILURE;
                }
            }
            println!("✅ Certificate for {cn} written to {}", out.display());
            ExitCode::SUCCESS
        }
    }
}
