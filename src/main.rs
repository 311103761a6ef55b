//! Textgate - Multi-tenant text normalization gateway
//!
//! Command-line front end: normalizes single records or batch files and exposes
//! the operational surface (breakers, cache, providers) for one process.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use tracing::{Level, error, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use textgate::Orchestrator;
use textgate::cli::{Args, BreakerAction, CacheAction, Commands, split_list};
use textgate::config::Config;
use textgate::error::GatewayError;
use textgate::input::{collect_batch_files, load_batch, output_path_for};
use textgate::models::{BatchMode, NormalizeRequest, TenantContext};
use textgate::translate::ProviderKind;

const DEFAULT_CONFIG_FILE: &str = "textgate.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    // init-config must work without a valid configuration
    if let Commands::InitConfig { output, force } = &args.command {
        if output.exists() && !*force {
            return Err(GatewayError::Config(format!(
                "{} already exists; pass --force to overwrite",
                output.display()
            ))
            .into());
        }
        Config::default().save_to_file(output)?;
        println!("Wrote default configuration to {}", output.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env_overrides();

    let default_target = config.pipeline.default_target_lang.clone();
    let orchestrator = Orchestrator::from_config(config).await?;

    match args.command {
        Commands::Normalize {
            tenant,
            record_id,
            record_type,
            source_lang,
            target_lang,
            provider,
            glossary,
            text,
        } => {
            let tenant_ctx = tenant_context(&tenant, provider.as_deref(), glossary.as_deref())?;
            orchestrator
                .check_rate_limit(Some(&tenant), None)
                .await
                .ensure_allowed(&tenant)?;

            let request = NormalizeRequest {
                tenant_id: tenant,
                record_id,
                record_type: record_type.parse()?,
                text,
                source_lang,
                target_lang: target_lang.unwrap_or(default_target),
            };
            let response = orchestrator.normalize_one(&request, &tenant_ctx).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Batch {
            input,
            output_dir,
            mode,
            concurrency,
            provider,
            glossary,
        } => {
            let mode: BatchMode = mode.parse()?;
            let files = collect_batch_files(&input)?;
            if files.is_empty() {
                warn!("No batch files found under {}", input.display());
                return Ok(());
            }
            if let Some(dir) = &output_dir {
                std::fs::create_dir_all(dir)?;
            }

            info!("Processing {} batch file(s) in {:?} mode", files.len(), mode);
            let started = Instant::now();

            let pb = ProgressBar::new(files.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("#>-"),
            );

            let mut failed = 0usize;
            for file in &files {
                pb.set_message(file.display().to_string());
                match process_batch_file(
                    &orchestrator,
                    file,
                    output_dir.as_deref(),
                    mode,
                    concurrency,
                    provider.as_deref(),
                    glossary.as_deref(),
                )
                .await
                {
                    Ok(output) => info!("Wrote {}", output.display()),
                    Err(e) => {
                        failed += 1;
                        error!("Batch {} failed: {}", file.display(), e);
                    }
                }
                pb.inc(1);
            }
            pb.finish_with_message("done");

            println!(
                "Processed {} file(s), {} failed, in {}",
                files.len(),
                failed,
                format_duration(started.elapsed().as_secs())
            );
            if failed > 0 {
                return Err(GatewayError::Validation(format!("{} batch file(s) failed", failed)).into());
            }
        }
        Commands::Detect { text } => {
            let detection = orchestrator.detect_language(&text).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "lang": detection.lang,
                    "confidence": detection.confidence,
                    "detector": orchestrator.detector_name(),
                }))?
            );
        }
        Commands::Providers { languages } => {
            println!("{:<10} {:<10}", "Provider", "Status");
            println!("{}", "-".repeat(21));
            for (name, available) in orchestrator.available_providers() {
                println!("{:<10} {:<10}", name, if available { "ready" } else { "missing" });
            }

            if languages {
                for kind in [ProviderKind::Google, ProviderKind::DeepL] {
                    match orchestrator.supported_languages(kind).await {
                        Ok(langs) if langs.is_empty() => println!("\n{}: language list unavailable", kind),
                        Ok(langs) => println!("\n{} ({}): {}", kind, langs.len(), langs.join(", ")),
                        Err(e) => println!("\n{}: {}", kind, e),
                    }
                }
            }
        }
        Commands::Breakers { action } => match action {
            BreakerAction::Show { name } => {
                let snapshots = orchestrator.breaker_snapshot(name.as_deref());
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            }
            BreakerAction::Reset { name } => {
                if orchestrator.reset_breaker(&name) {
                    println!("Breaker '{}' reset to closed", name);
                } else {
                    return Err(GatewayError::Config(format!("Unknown breaker '{}'", name)).into());
                }
            }
        },
        Commands::Cache { action } => match action {
            CacheAction::Invalidate { pattern } => {
                let removed = orchestrator.invalidate_cache(&pattern).await;
                println!("Removed {} cached entr{} matching '{}'", removed, if removed == 1 { "y" } else { "ies" }, pattern);
            }
            CacheAction::Stats => {
                println!("{}", serde_json::to_string_pretty(&orchestrator.cache_stats())?);
            }
        },
        Commands::InitConfig { .. } => unreachable!("handled before configuration is loaded"),
    }

    Ok(())
}

async fn process_batch_file(
    orchestrator: &Orchestrator,
    file: &Path,
    output_dir: Option<&Path>,
    mode: BatchMode,
    concurrency: Option<usize>,
    provider: Option<&str>,
    glossary: Option<&str>,
) -> Result<std::path::PathBuf> {
    let request = load_batch(file)?;
    let tenant = tenant_context(&request.tenant_id, provider, glossary)?;

    orchestrator
        .check_rate_limit(Some(&request.tenant_id), None)
        .await
        .ensure_allowed(&request.tenant_id)?;

    let response = orchestrator
        .normalize_batch(&request, &tenant, mode, concurrency)
        .await?;

    let output = output_path_for(file, output_dir);
    std::fs::write(&output, serde_json::to_string_pretty(&response)?)?;
    Ok(output)
}

fn tenant_context(id: &str, provider: Option<&str>, glossary: Option<&str>) -> Result<TenantContext> {
    let mut tenant = TenantContext::new(id);
    tenant.provider_preference = provider.map(str::parse::<ProviderKind>).transpose()?;
    tenant.glossary_preserve_terms = split_list(glossary);
    Ok(tenant)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".textgate").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "textgate.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the writer alive for the whole process
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // stdout carries command output, so console logs go to stderr
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("textgate.log").display()
    );

    Ok(())
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
