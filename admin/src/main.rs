//! keysmith operator CLI
//!
//! Sets up key material, issues and administers activation codes, and
//! verifies license files offline.
//!
//! Usage:
//!   keysmith-admin init-keys --out keysmith.key
//!   keysmith-admin generate --product <uuid> --count 100 --batch "spring promo"
//!   keysmith-admin activate ABCDEF-GHJKLM-NPQRST-UVWXYZ-234567 --out license.json
//!   keysmith-admin verify-file license.json --this-host

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use keysmith_admin::{
    format_batch, format_code, init_keys, load_config, load_manager, open_service, verify_file,
};
use keysmith_license::{
    ActivationRequest, ActivationResult, CodeStatus, DeviceInfo, FingerprintProvider,
    HostFingerprint, IssueRequest, LicenseType, LicensingConfig,
};
use keysmith_types::{CodeId, ProductId, UserId};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "keysmith-admin")]
#[command(about = "Activation code and license file administration")]
struct Args {
    /// Path to the config file (defaults to $KEYSMITH_CONFIG or keysmith.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new key file
    InitKeys {
        #[arg(short, long, default_value = "keysmith.key")]
        out: PathBuf,
        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },
    #[command(flatten)]
    Operation(Operation),
}

/// Commands that need a loaded configuration.
#[derive(Subcommand, Debug)]
enum Operation {
    /// Issue a batch of activation codes
    Generate {
        #[arg(short, long)]
        product: ProductId,
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
        /// TRIAL, STANDARD, PREMIUM, ENTERPRISE or LIFETIME
        #[arg(long)]
        license_type: Option<String>,
        #[arg(long)]
        max_activations: Option<u32>,
        #[arg(long)]
        concurrent_limit: Option<u32>,
        /// Days until the codes expire
        #[arg(long)]
        expires_in_days: Option<i64>,
        #[arg(long)]
        issuer: Option<UserId>,
        #[arg(long)]
        notes: Option<String>,
        /// Record the codes as a named batch
        #[arg(long)]
        batch: Option<String>,
    },
    /// List code batches with their redemption counts
    Batches {
        #[arg(short, long)]
        product: Option<ProductId>,
    },
    /// List stored codes
    List {
        #[arg(short, long)]
        product: Option<ProductId>,
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Check a code without activating it
    Validate {
        code: String,
        #[arg(short, long)]
        fingerprint: Option<String>,
        /// Do not record a VALIDATE log row
        #[arg(long)]
        check_only: bool,
    },
    /// Activate a code and write the license file
    Activate {
        code: String,
        /// Device fingerprint (defaults to this host)
        #[arg(short, long)]
        fingerprint: Option<String>,
        #[arg(long)]
        user: Option<UserId>,
        #[arg(short, long, default_value = "license.json")]
        out: PathBuf,
    },
    /// Release a code from a device
    Deactivate {
        code: String,
        #[arg(short, long)]
        fingerprint: Option<String>,
        /// Leave the code activated for other devices
        #[arg(long)]
        keep_license: bool,
    },
    /// Permanently revoke a code
    Revoke {
        id: CodeId,
        #[arg(short, long)]
        reason: String,
        #[arg(long)]
        by: Option<UserId>,
    },
    /// Suspend a code
    Suspend {
        id: CodeId,
        #[arg(short, long)]
        reason: String,
    },
    /// Lift a suspension
    Reinstate { id: CodeId },
    /// Move every overdue code to EXPIRED
    Expire,
    /// Reissue the license file of an activated code
    LicenseFile {
        id: CodeId,
        #[arg(long)]
        hardware_id: Option<String>,
        #[arg(short, long, default_value = "license.json")]
        out: PathBuf,
    },
    /// Verify a license file offline
    VerifyFile {
        path: PathBuf,
        #[arg(long, conflicts_with = "this_host")]
        hardware_id: Option<String>,
        /// Check the hardware binding against this host
        #[arg(long)]
        this_host: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::InitKeys { out, force } => init_keys(&out, force),
        Command::Operation(operation) => {
            let config = load_config(args.config.as_deref())?;
            debug!(?config, "Resolved configuration");
            run(operation, &config)
        }
    }
}

fn run(operation: Operation, config: &LicensingConfig) -> Result<()> {
    let now = Utc::now();

    match operation {
        Operation::VerifyFile {
            path,
            hardware_id,
            this_host,
        } => {
            let manager = load_manager(config)?;
            let hardware_id = if this_host {
                Some(HostFingerprint.fingerprint())
            } else {
                hardware_id
            };
            let validation = verify_file(&manager, &path, hardware_id.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&validation)?);
            if !validation.valid {
                bail!(
                    "license file rejected: {}",
                    validation.error_message().unwrap_or_default()
                );
            }
        }
        Operation::Generate {
            product,
            count,
            license_type,
            max_activations,
            concurrent_limit,
            expires_in_days,
            issuer,
            notes,
            batch,
        } => {
            let service = open_service(config)?;
            let license_type = license_type
                .map(|s| {
                    LicenseType::parse(&s).with_context(|| format!("unknown license type {s}"))
                })
                .transpose()?;
            let request = IssueRequest {
                license_type,
                max_activations,
                concurrent_limit,
                expires_at: expires_in_days.map(|days| now + Duration::days(days)),
                issuer_id: issuer,
                notes,
                batch_name: batch,
                ..IssueRequest::new(product, count)
            };
            let codes = service.issue_codes(&request, now)?;
            for code in &codes {
                println!("{}", code.human_code());
            }
            if let Some(batch_id) = codes.first().and_then(|c| c.batch_id()) {
                info!(%batch_id, "Codes recorded as a batch");
            }
            info!(count = codes.len(), "Codes written to stdout");
        }
        Operation::Batches { product } => {
            for usage in open_service(config)?.list_batches(product.as_ref())? {
                println!("{}", format_batch(&usage));
            }
        }
        Operation::List { product, status } => {
            let service = open_service(config)?;
            let status = status
                .map(|s| {
                    CodeStatus::parse(&s.to_ascii_uppercase())
                        .with_context(|| format!("unknown status {s}"))
                })
                .transpose()?;
            for code in service.store().list_codes(product.as_ref(), status)? {
                println!("{}", format_code(&code));
            }
        }
        Operation::Validate {
            code,
            fingerprint,
            check_only,
        } => {
            let service = open_service(config)?;
            let outcome =
                service.validate_code(&code, fingerprint.as_deref(), None, check_only, now)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Operation::Activate {
            code,
            fingerprint,
            user,
            out,
        } => {
            let service = open_service(config)?;
            let device = match fingerprint {
                Some(fp) => DeviceInfo::new(fp),
                None => HostFingerprint.device_info(),
            };
            let request = ActivationRequest {
                code,
                device,
                ip_address: None,
                user_id: user,
            };
            match service.activate(&request, now)? {
                ActivationResult::Activated(receipt) => {
                    for warning in &receipt.warnings {
                        warn!("{warning}");
                    }
                    fs::write(&out, &receipt.license_file)
                        .with_context(|| format!("Failed to write {}", out.display()))?;
                    println!("{}", format_code(&receipt.code));
                    info!(path = %out.display(), "License file written");
                }
                ActivationResult::VerificationRequired { method, outcome } => {
                    bail!(
                        "device change requires {method} verification: {}",
                        outcome.error_summary()
                    );
                }
                ActivationResult::Rejected(outcome) => {
                    bail!("activation rejected: {}", outcome.error_summary());
                }
            }
        }
        Operation::Deactivate {
            code,
            fingerprint,
            keep_license,
        } => {
            let service = open_service(config)?;
            let fingerprint = fingerprint.unwrap_or_else(|| HostFingerprint.fingerprint());
            let code = service.deactivate(&code, &fingerprint, keep_license, None, now)?;
            println!("{}", format_code(&code));
        }
        Operation::Revoke { id, reason, by } => {
            let code = open_service(config)?.revoke(&id, by, &reason, now)?;
            println!("{}", format_code(&code));
        }
        Operation::Suspend { id, reason } => {
            let code = open_service(config)?.suspend(&id, &reason, now)?;
            println!("{}", format_code(&code));
        }
        Operation::Reinstate { id } => {
            let code = open_service(config)?.reinstate(&id, now)?;
            println!("{}", format_code(&code));
        }
        Operation::Expire => {
            let expired = open_service(config)?.expire_overdue(now)?;
            for id in &expired {
                println!("{id}");
            }
            info!(count = expired.len(), "Expired overdue codes");
        }
        Operation::LicenseFile {
            id,
            hardware_id,
            out,
        } => {
            let bytes = open_service(config)?.license_file(&id, hardware_id.as_deref(), now)?;
            fs::write(&out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
            info!(path = %out.display(), "License file written");
        }
    }

    Ok(())
}
