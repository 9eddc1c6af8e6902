//! PKI Forge - Workspace Certificate Authority
//!
//! Command-line front end over the `pki_forge` library. Role settings
//! (config, claim, policy) are read from `<workspace>/pki.toml`; serial
//! numbers advanced by `gen-cert` and `sign` are saved back to it.
//!
//! # Quick Start
//!
//! ```bash
//! pki-forge --workspace pki init
//! pki-forge --workspace pki gen-cert root
//! pki-forge --workspace pki gen-csr intermediate sre
//! pki-forge --workspace pki sign root root intermediate sre
//! pki-forge --workspace pki gen-csr server web
//! pki-forge --workspace pki sign intermediate sre server web
//! pki-forge --workspace pki verify intermediate sre server web --dns web.example.com
//! ```
//!
//! Log output is controlled with `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pki_forge::builder::{gen_cert, gen_csr, sign_csr};
use pki_forge::cert::{Cert, CertRole};
use pki_forge::configs::PkiConfig;
use pki_forge::policy::policy_trust_func;
use pki_forge::verify::verify_cert;
use pki_forge::workspace::Workspace;

#[derive(Parser)]
#[command(name = "pki-forge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and maintain an X.509 CA hierarchy in a directory", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, global = true, value_name = "DIR", default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace directories and a default pki.toml
    Init,

    /// Generate a self-signed Root CA
    GenCert {
        name: String,
    },

    /// Generate a key pair and certificate signing request
    GenCsr {
        role: CertRole,
        name: String,
    },

    /// Sign a pending request with a CA
    Sign {
        ca_role: CertRole,
        ca_name: String,
        role: CertRole,
        name: String,
    },

    /// Verify a certificate against a CA chain
    Verify {
        ca_role: CertRole,
        ca_name: String,
        role: CertRole,
        name: String,

        /// DNS name the certificate must be valid for
        #[arg(long, value_name = "NAME")]
        dns: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = Workspace::new(cli.workspace);

    match cli.command {
        Commands::Init => init(&workspace)?,
        Commands::GenCert { name } => {
            let mut settings = load(&workspace)?;
            let root = Cert::new(name, CertRole::Root);
            let role = settings.role_mut(CertRole::Root);
            gen_cert(&workspace, &mut role.config, &role.claim, &root)
                .with_context(|| format!("Failed to generate {}", root))?;
            save(&settings, &workspace)?;
            println!("✓ {} generated", root);
        }
        Commands::GenCsr { role, name } => {
            let cert = Cert::new(name, role);
            let settings = load(&workspace)?;
            let settings = settings.role(role);
            gen_csr(&workspace, &settings.config, &settings.claim, &cert)
                .with_context(|| format!("Failed to generate request for {}", cert))?;
            println!("✓ Request for {} generated", cert);
        }
        Commands::Sign {
            ca_role,
            ca_name,
            role,
            name,
        } => {
            let ca = Cert::new(ca_name, ca_role);
            let cert = Cert::new(name, role);
            let mut settings = load(&workspace)?;
            let ca_settings = settings.role(ca_role).clone();
            let trust = policy_trust_func(&ca_settings.policy);
            sign_csr(
                &workspace,
                &ca_settings.config,
                &ca,
                &mut settings.role_mut(role).config,
                &cert,
                &trust,
            )
            .with_context(|| format!("Failed to sign {} with {}", cert, ca))?;
            save(&settings, &workspace)?;
            println!("✓ {} signed by {}", cert, ca);
        }
        Commands::Verify {
            ca_role,
            ca_name,
            role,
            name,
            dns,
        } => {
            let ca = Cert::new(ca_name, ca_role);
            let cert = Cert::new(name, role);
            verify_cert(&workspace, &ca, &cert, dns.as_deref())
                .with_context(|| format!("Failed to verify {} against {}", cert, ca))?;
            println!("✓ {} verified against {}", cert, ca);
        }
    }
    Ok(())
}

fn init(workspace: &Workspace) -> Result<()> {
    workspace
        .init()
        .context("Failed to create workspace directories")?;
    let config_path = workspace.config_path();
    if config_path.exists() {
        println!("✓ Workspace ready, keeping existing {}", config_path.display());
    } else {
        PkiConfig::default()
            .save(&config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("✓ Workspace ready, wrote {}", config_path.display());
    }
    Ok(())
}

fn load(workspace: &Workspace) -> Result<PkiConfig> {
    let config_path = workspace.config_path();
    PkiConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))
}

fn save(settings: &PkiConfig, workspace: &Workspace) -> Result<()> {
    let config_path = workspace.config_path();
    settings
        .save(&config_path)
        .with_context(|| format!("Failed to save {}", config_path.display()))
}
