use anyhow::{bail, Result};
use spoolex::{
    config::RunConfig,
    error::ExtractError,
    pipeline::{build_extractions, cancel_on_interrupt},
    process::{merge_tables, SpoolTextParser},
};
use std::env;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const USAGE: &str = "usage: spoolex import <extraction> | merge [transaction]";

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,spoolex=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) config ───────────────────────────────────────────────────
    let config = RunConfig::load()?;
    let period = config.reference_period()?;
    info!(period = %period, workers = config.workers, capacity = config.shared_capacity, "startup");
    let cancel = cancel_on_interrupt();

    // ─── 3) offline commands ─────────────────────────────────────────
    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().cloned().unwrap_or_default();
    let start = Instant::now();

    let task = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["import", name] => {
            let name = name.to_string();
            tokio::task::spawn_blocking(move || import(&config, &name))
        }
        ["merge"] | ["merge", _] => {
            let only = args.get(1).cloned();
            tokio::task::spawn_blocking(move || {
                let written = merge_tables(
                    &config.exported_dir,
                    &config.table_dir,
                    &config.tables,
                    only.as_deref(),
                )?;
                info!(tables = written.len(), "merge finished");
                Ok(())
            })
        }
        _ => {
            error!("{USAGE}");
            bail!(USAGE);
        }
    };

    tokio::select! {
        result = task => result??,
        _ = cancel.cancelled() => {
            return Err(ExtractError::Cancelled { operation: command }.into());
        }
    }

    info!(elapsed = ?start.elapsed(), "all done");
    Ok(())
}

/// Re-parse the landing directory for one extraction and persist it.
fn import(config: &RunConfig, name: &str) -> Result<()> {
    let mut extractions = build_extractions(config)?;
    let Some(pos) = extractions
        .iter()
        .position(|e| e.name().eq_ignore_ascii_case(name))
    else {
        let known: Vec<&str> = extractions.iter().map(|e| e.name()).collect();
        bail!("unknown extraction {name}; configured: {}", known.join(", "));
    };
    let extraction = &mut extractions[pos];

    let rows = extraction.import(&config.landing_dir, SpoolTextParser::new(config.parse_mode))?;
    let written = extraction.export(&config.exported_dir, &config.output_formats)?;
    info!(name = extraction.name(), rows, files = written.len(), "import finished");

    if config.merge_tables {
        merge_tables(
            &config.exported_dir,
            &config.table_dir,
            &config.tables,
            Some(extraction.schema().transaction()),
        )?;
    }
    Ok(())
}
