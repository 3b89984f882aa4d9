//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Permissive SASL/TLS authentication gate for AMQP 1.0
#[derive(Parser, Debug)]
#[command(name = "none-authservice")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to listener configuration file (YAML)
    #[arg(short, long, env = "AUTHSERVICE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides LISTENPORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Directory holding tls.crt and tls.key (overrides CERT_DIR)
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTHSERVICE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHSERVICE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the authentication listener (default)
    Serve,

    /// Authenticate against a running gate and print the grant as JSON
    Probe {
        /// Gate host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Gate port
        #[arg(long)]
        port: u16,

        /// SNI server name (defaults to host)
        #[arg(long)]
        servername: Option<String>,

        /// Username for PLAIN; omit for ANONYMOUS
        #[arg(short, long)]
        username: Option<String>,

        /// Password for PLAIN
        #[arg(long, env = "AUTHSERVICE_PROBE_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Overall timeout in seconds
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
    },

    /// Print the TLS paths resolved from CERT_DIR, CA_PATH, CERT_PATH and KEY_PATH
    Paths,

    /// Development certificate commands
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// Development certificate subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Generate a self-signed CA (writes ca.crt and ca.key)
    InitCa {
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Common Name
        #[arg(long, default_value = "none-authservice dev CA")]
        cn: String,

        /// Validity in days
        #[arg(long, default_value = "365")]
        days: u32,
    },

    /// Issue a CA-signed certificate (writes tls.crt and tls.key)
    Issue {
        /// Directory holding ca.crt and ca.key
        #[arg(long, default_value = ".")]
        ca_dir: PathBuf,

        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Common Name
        #[arg(long, default_value = "localhost")]
        cn: String,

        /// DNS subject alternative names (repeatable)
        #[arg(long = "san-dns")]
        san_dns: Vec<String>,

        /// Validity in days
        #[arg(long, default_value = "90")]
        days: u32,
    },
}
