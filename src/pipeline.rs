// src/pipeline.rs
//! One extraction end to end: cleanup, distributed submission, completion
//! barrier, spool retrieval, parsing, tagging and persistence.

use anyhow::{Context, Result};
use chrono::Local;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ExtractionConfig, ParameterSource, RunConfig};
use crate::error::ExtractError;
use crate::fetch::{cleanup, JobCompletionBarrier, SpoolRetrievalStage};
use crate::period::ReferencePeriod;
use crate::process::query::distinct_values;
use crate::process::row::{tag_rows, RETRIEVED_AT_FORMAT};
use crate::process::spool::text_files_matching;
use crate::process::{
    merge_tables, read_delimited, write_rows, OutputFormat, ResultSet, Row, SpoolTextParser,
};
use crate::remote::{list_all_spools, Clipboard, SessionCell, SessionProvider, TransferChannel};
use crate::retry::{retry_until_success, RetryPolicy};
use crate::scheduler::{distribute, JobDistributionScheduler};
use crate::schema::ImportSchema;
use crate::variant::{pad_codes, MeasurementsByCode, QuerySetup};

/// A logical extraction: what to query, for which period, and the rows it
/// has collected so far.
pub struct Extraction {
    name: String,
    schema: Arc<ImportSchema>,
    period: ReferencePeriod,
    setup: Arc<dyn QuerySetup>,
    parameters: Vec<String>,
    rows: ResultSet,
}

impl Extraction {
    pub fn new(
        name: impl Into<String>,
        schema: Arc<ImportSchema>,
        period: ReferencePeriod,
        setup: Arc<dyn QuerySetup>,
        parameters: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            period,
            setup,
            parameters,
            rows: Vec::new(),
        }
    }

    /// IW67 measurements for `codes`, or the scope's default codes.
    pub fn measurements(
        variant: MeasurementsByCode,
        period: ReferencePeriod,
        codes: Option<Vec<String>>,
    ) -> Self {
        let parameters = codes
            .map(pad_codes)
            .unwrap_or_else(|| variant.default_codes());
        Self::new(
            variant.extraction_name(&period),
            variant.schema(),
            period,
            Arc::new(variant),
            parameters,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<ImportSchema> {
        &self.schema
    }

    pub fn period(&self) -> &ReferencePeriod {
        &self.period
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Tag `rows` with this extraction's period and `retrieved_at`, then
    /// append them.
    pub fn append(&mut self, mut rows: ResultSet, retrieved_at: &str) {
        tag_rows(&mut rows, self.period.name(), retrieved_at);
        self.rows.extend(rows);
    }

    /// Parse the landed files named after this extraction and append their
    /// rows. Returns the number of rows added.
    pub fn import(&mut self, landing_dir: &Path, parser: SpoolTextParser) -> Result<usize> {
        let retrieved_at = Local::now().format(RETRIEVED_AT_FORMAT).to_string();
        let rows = load_rows(landing_dir, &self.name, &self.schema, parser)?;
        let added = rows.len();
        self.append(rows, &retrieved_at);
        Ok(added)
    }

    /// Write the collected rows once per format. Nothing is written when
    /// there are no rows.
    pub fn export(&self, exported_dir: &Path, formats: &[OutputFormat]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for format in formats {
            if let Some(path) = write_rows(exported_dir, &self.name, &self.rows, *format)? {
                written.push(path);
            }
        }
        Ok(written)
    }
}

/// Rows of every landed `.txt` file whose name contains `name`.
pub fn load_rows(
    landing_dir: &Path,
    name: &str,
    schema: &ImportSchema,
    parser: SpoolTextParser,
) -> Result<ResultSet> {
    let files = text_files_matching(landing_dir, &[name])?;
    info!(name, files = files.len(), "reading exported spool files");
    parser.parse(&files, schema)
}

/// Parameters for one configured extraction: explicit codes, a query over
/// an exported table, or the variant's defaults.
pub fn resolve_parameters(config: &ExtractionConfig) -> Result<Option<Vec<String>>> {
    if let Some(ParameterSource { file, column, filters }) = &config.source {
        let rows = read_delimited(std::slice::from_ref(file))
            .with_context(|| format!("reading parameter source {}", file.display()))?;
        let values = distinct_values(&rows, column, filters);
        info!(source = %file.display(), column = %column, values = values.len(), "parameters from table");
        return Ok(Some(pad_codes(values)));
    }
    Ok(config.codes.clone())
}

/// Every extraction the configuration names, in order.
pub fn build_extractions(config: &RunConfig) -> Result<Vec<Extraction>> {
    let period = config.reference_period()?;
    config
        .extractions
        .iter()
        .map(|extraction| {
            let codes = resolve_parameters(extraction)?;
            let variant = MeasurementsByCode::new(extraction.kind.scope());
            Ok(Extraction::measurements(variant, period.clone(), codes))
        })
        .collect()
}

/// A token that is cancelled when the process receives Ctrl-C.
pub fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub name: String,
    pub parameters: usize,
    pub submitted: usize,
    pub failed_workers: usize,
    pub spools: usize,
    pub rows: usize,
    pub outputs: Vec<PathBuf>,
    pub tables: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Runs configured extractions against a remote host.
pub struct ExtractionPipeline {
    provider: Arc<dyn SessionProvider>,
    transfer: TransferChannel,
    config: RunConfig,
}

impl ExtractionPipeline {
    pub fn new(provider: Arc<dyn SessionProvider>, clipboard: Arc<dyn Clipboard>, config: RunConfig) -> Self {
        Self {
            provider,
            transfer: TransferChannel::new(clipboard),
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Every configured extraction, one after the other.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Vec<ExtractionSummary>> {
        self.config.validate()?;
        let mut summaries = Vec::new();
        for mut extraction in build_extractions(&self.config)? {
            let summary = self
                .run_extraction(&mut extraction, cancel)
                .await
                .with_context(|| format!("extraction {}", extraction.name()))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    #[tracing::instrument(level = "info", skip_all, fields(name = %extraction.name(), period = %extraction.period()))]
    pub async fn run_extraction(
        &self,
        extraction: &mut Extraction,
        cancel: &CancellationToken,
    ) -> Result<ExtractionSummary> {
        let start = Instant::now();
        let config = &self.config;
        let stage_policy = config.stage_policy();
        info!(parameters = extraction.parameters().len(), "starting background extraction");

        let session = self.coordinator_session(cancel).await?;
        cleanup(&session, &config.landing_dir, &stage_policy, cancel).await?;

        let items = distribute(
            extraction.parameters(),
            config.workers,
            config.shared_capacity,
            extraction.schema().clone(),
            extraction.period(),
        )?;
        let scheduler = JobDistributionScheduler::new(
            self.provider.clone(),
            extraction.setup.clone(),
            self.transfer.clone(),
            config.system_name.clone(),
        )
        .with_submit_policy(stage_policy.clone())
        .with_session_policy(config.session_policy());
        let reports = scheduler.launch(extraction.name(), items, cancel).await;
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled {
                operation: format!("submission of {}", extraction.name()),
            }
            .into());
        }
        let submitted: usize = reports.iter().map(|r| r.submitted).sum();
        let failed_workers = reports.iter().filter(|r| !r.succeeded()).count();
        if failed_workers > 0 {
            warn!(failed_workers, submitted, "continuing with the batches that were submitted");
        }

        JobCompletionBarrier::new(config.poll_interval())
            .with_list_policy(stage_policy.clone().with_delay(Some(config.poll_interval())))
            .await_all(&session, cancel)
            .await?;

        let cell = &session;
        let spools = retry_until_success("list spools", &stage_policy, cancel, move |_| async move {
            list_all_spools(&mut **cell.lock().await).await
        })
        .await?
        .len();
        if spools != submitted {
            warn!(spools, submitted, "spool listing differs from submitted batches");
        }

        let rows = self
            .retrieve_and_import(extraction, &session, spools, &stage_policy, cancel)
            .await?;
        let outputs = self.export(extraction, &stage_policy, cancel).await?;

        let tables = if config.merge_tables {
            let prefix = extraction.schema().transaction().to_string();
            let (exported, table_dir, tables) =
                (config.exported_dir.clone(), config.table_dir.clone(), config.tables.clone());
            tokio::task::spawn_blocking(move || merge_tables(&exported, &table_dir, &tables, Some(prefix.as_str())))
                .await
                .context("merge task panicked")??
        } else {
            Vec::new()
        };

        let summary = ExtractionSummary {
            name: extraction.name().to_string(),
            parameters: extraction.parameters().len(),
            submitted,
            failed_workers,
            spools,
            rows,
            outputs,
            tables,
            elapsed: start.elapsed(),
        };
        info!(
            submitted,
            spools,
            rows,
            elapsed = ?summary.elapsed,
            "extraction finished"
        );
        Ok(summary)
    }

    async fn coordinator_session(&self, cancel: &CancellationToken) -> Result<SessionCell> {
        let provider = &self.provider;
        let system = self.config.system_name.as_str();
        let session = retry_until_success("open session", &self.config.session_policy(), cancel, move |_| {
            provider.session(system, 1)
        })
        .await
        .with_context(|| format!("opening coordinator session of {system}"))?;
        Ok(SessionCell::new(session))
    }

    /// Export the spools and parse what landed as one retried unit, so a
    /// malformed export is fetched again rather than re-read.
    async fn retrieve_and_import(
        &self,
        extraction: &mut Extraction,
        session: &SessionCell,
        expected: usize,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let parser = SpoolTextParser::new(self.config.parse_mode);
        let stage = SpoolRetrievalStage::new(&self.config.landing_dir).with_policy(policy.clone());
        let landing = stage.landing_dir();
        let name = extraction.name().to_string();
        let schema = extraction.schema().clone();
        let (name, schema) = (&name, &schema);

        let (report, (rows, retrieved_at)) = stage
            .retrieve(session, expected, cancel, move |_files| async move {
                let retrieved_at = Local::now().format(RETRIEVED_AT_FORMAT).to_string();
                let (landing, name, schema) = (landing.to_path_buf(), name.clone(), schema.clone());
                let rows = tokio::task::spawn_blocking(move || load_rows(&landing, &name, &schema, parser))
                    .await
                    .context("import task panicked")??;
                Ok((rows, retrieved_at))
            })
            .await?;

        let added = rows.len();
        extraction.append(rows, &retrieved_at);
        info!(
            attempts = report.attempts,
            rows = added,
            total = extraction.rows().len(),
            "imported spool rows"
        );
        Ok(added)
    }

    async fn export(
        &self,
        extraction: &Extraction,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        retry_until_success("export rows", policy, cancel, |_| async move {
            extraction.export(&self.config.exported_dir, &self.config.output_formats)
        })
        .await
    }
}
