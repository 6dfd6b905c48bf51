//! qsafe CLI
//!
//! Runs the hybrid crypto engine against the in-process PQC backend.

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use qsafe_core::{EngineConfig, RequestContext, SignatureAlgorithm};
use qsafe_engine::{Engine, VerifyOptions};

#[derive(Parser)]
#[command(name = "qsafe")]
#[command(version)]
#[command(about = "Hybrid post-quantum / classical crypto engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); QSAFE__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Artificial latency added to every PQC backend call
    #[arg(long, global = true, env = "QSAFE_PQC_LATENCY_MS")]
    pqc_latency_ms: Option<u64>,

    /// PQC bridge timeout
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Take the PQC backend offline before running the command
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe both crypto paths
    Health,

    /// Generate a key pair, ML-KEM-768 first
    Keygen {
        /// User the key is generated for
        #[arg(short, long)]
        user: Option<String>,

        /// Skip the quantum-safe path
        #[arg(long)]
        classical: bool,

        /// Write the key pair as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt a message, print the envelope and decrypt it again
    Encrypt {
        message: String,

        #[arg(short, long)]
        user: Option<String>,

        /// Skip the quantum-safe path
        #[arg(long)]
        classical: bool,
    },

    /// Sign data (JSON or plain text) and verify the signature
    Sign {
        data: String,

        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long, value_enum, default_value_t = AlgorithmArg::MlDsa65)]
        algorithm: AlgorithmArg,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AlgorithmArg {
    #[value(name = "ml-dsa-65")]
    MlDsa65,
    #[value(name = "rsa-2048")]
    Rsa2048,
}

impl From<AlgorithmArg> for SignatureAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::MlDsa65 => SignatureAlgorithm::MlDsa65,
            AlgorithmArg::Rsa2048 => SignatureAlgorithm::Rsa2048,
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let env_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.bridge.timeout_ms = timeout_ms;
    }
    if let Some(latency_ms) = cli.pqc_latency_ms {
        config.backend.simulated_latency_ms = latency_ms;
    }
    config.validate()?;
    Ok(config)
}

fn context(user: Option<String>, classical: bool) -> RequestContext {
    let ctx = match user {
        Some(user) => RequestContext::for_user(user),
        None => RequestContext::anonymous(),
    };
    if classical {
        ctx.classical_only()
    } else {
        ctx
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    let config = load_config(&cli)?;
    if let Commands::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let engine = Engine::local(config)?;
    if cli.offline {
        if let Some(backend) = engine.local_backend() {
            backend.set_online(false);
        }
    }

    match cli.command {
        Commands::Health => {
            let report = engine.health_report().await;
            print_json(&report)?;
        }

        Commands::Keygen {
            user,
            classical,
            output,
        } => {
            let pair = engine
                .generate_key_pair_with_fallback(&context(user, classical))
                .await?;

            println!("Algorithm: {}", pair.algorithm);
            println!("Key ID: {}", pair.key_id);
            println!("Fallback used: {}", pair.fallback_used);
            println!("Public key: {} bytes", pair.public_key.len());

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&pair)?)?;
                println!("Written to {:?}", path);
            }
        }

        Commands::Encrypt {
            message,
            user,
            classical,
        } => {
            let ctx = context(user, classical);
            // Keys are issued before any outage so both paths stay decryptable
            if let Some(backend) = engine.local_backend() {
                backend.set_online(true);
            }
            let bundle = engine.generate_key_bundle(&ctx).await?;
            if cli.offline {
                if let Some(backend) = engine.local_backend() {
                    backend.set_online(false);
                }
            }

            let envelope = engine
                .encrypt_with_fallback(message.as_bytes(), &bundle.recipient, &ctx)
                .await?;
            println!("{}", envelope.to_json_pretty()?);

            let plaintext = engine.decrypt_with_fallback(&envelope, &bundle.decryption)?;
            anyhow::ensure!(plaintext == message.as_bytes(), "round trip mismatch");
            tracing::info!(
                algorithm = %envelope.algorithm(),
                fallback_used = envelope.fallback_used(),
                "Round trip verified"
            );
        }

        Commands::Sign {
            data,
            user,
            algorithm,
        } => {
            let value: Value = serde_json::from_str(&data).unwrap_or(Value::String(data));
            let options = match &user {
                Some(user) => VerifyOptions::default().for_user(user.clone()),
                None => VerifyOptions::default(),
            };
            let ctx = context(user, false);

            let envelope = engine
                .generate_signature(&value, algorithm.into(), &ctx)
                .await?;
            let report = engine.verify_signature(&value, &envelope, &options).await?;

            print_json(&json!({
                "signature": envelope,
                "verification": report,
            }))?;
        }

        Commands::Config => {}
    }

    Ok(())
}
