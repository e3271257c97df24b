// tests/pipeline.rs
use std::{fs, path::Path, sync::Arc};

use spoolex::{
    config::RunConfig,
    process::{read_delimited, OutputFormat},
    remote::memory::{MemoryHost, SubmittedJob},
    variant::{CODE_LOW, DIALOG_PASTE},
    ExtractionPipeline,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_test_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,spoolex=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

const IW67_TITLES: [&str; 14] = [
    "Nota", "CóMd", "StatSist", "Exec.por", "Texto medidas", "Localiz.", "Criado/a",
    "Dt.criação", "Concl.por", "Concluído", "Iníc.planj", "Fim plan.", "Medi", "LocInstal.",
];

/// One report line per pasted code, below the usual page header.
fn measurement_report(job: &SubmittedJob) -> String {
    let mut text = format!("{}\n\n{}|\n", job.title, IW67_TITLES.join("|"));
    for (i, code) in job.pasted.iter().enumerate() {
        let note = (1000 + i).to_string();
        let fields = [
            note.as_str(),
            code.as_str(),
            "MEDE",
            "JSILVA",
            "leitura",
            "12",
            "MARIA",
            "05.09.2023",
            "JOAO",
            "06.09.2023",
            "01.09.2023",
            "30.09.2023",
            "1",
            "EQ-100",
        ];
        text.push_str(&fields.join("|"));
        text.push_str("|\n");
    }
    text
}

fn config(root: &Path) -> RunConfig {
    let mut config = RunConfig::from_yaml(
        r#"
period: "2023_09"
workers: 3
shared_capacity: 6
poll_interval_secs: 1
session_retry_secs: 1
retry:
  delay_ms: 100
"#,
    )
    .unwrap();
    config.landing_dir = root.join("spool");
    config.exported_dir = root.join("data");
    config.table_dir = root.join("tables");
    config
}

fn host(config: &RunConfig) -> MemoryHost {
    MemoryHost::new(&config.landing_dir)
        .with_polls_to_finish(3)
        .with_page_size(4)
        .with_paste_binding(DIALOG_PASTE, CODE_LOW)
        .with_content(measurement_report)
}

#[tokio::test(start_paused = true)]
async fn both_measurement_extractions_land_in_the_consolidated_table() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    let host = host(&config);
    host.fail_next_sessions(1);
    host.fail_next_submissions(2);
    host.short_next_exports(1);

    let pipeline = ExtractionPipeline::new(Arc::new(host.clone()), host.clipboard(), config.clone());
    let summaries = pipeline.run(&CancellationToken::new()).await.unwrap();

    let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["IW67_MEDL", "IW67_MEDE_2023_09"]);
    for summary in &summaries {
        assert_eq!(summary.parameters, 6);
        // Two codes per worker, one code per background job.
        assert_eq!(summary.submitted, 6);
        assert_eq!(summary.failed_workers, 0);
        assert_eq!(summary.spools, 6);
        assert_eq!(summary.rows, 6);
        assert_eq!(summary.outputs.len(), 1);
    }

    // Every code went out in its own job, with the selection verified.
    let submissions = host.submissions();
    assert_eq!(submissions.len(), 12);
    assert!(submissions
        .iter()
        .all(|job| job.pasted.len() == 1 && job.fields[CODE_LOW] == job.pasted[0]));

    // Cleanup before the second extraction removed the first one's jobs.
    assert_eq!(host.live_jobs(), 6);

    let exported = read_delimited(&[config.exported_dir.join("IW67_MEDE_2023_09.txt")]).unwrap();
    assert_eq!(exported.len(), 6);
    assert!(exported.iter().all(|row| row.get("REFERENCIA") == Some("2023_09")));
    assert!(exported.iter().all(|row| row.get("EQUIPAMENTO") == Some("EQ-100")));

    let merged = config.table_dir.join("TB_ECC_MEDIDA.txt");
    assert_eq!(summaries[1].tables, vec![merged.clone()]);
    assert_eq!(read_delimited(&[merged]).unwrap().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn failed_jobs_leave_nothing_to_export() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.extractions.truncate(1);
    config.merge_tables = false;
    config.output_formats = vec![OutputFormat::Text, OutputFormat::Json];
    let host = host(&config);
    host.fail_jobs_titled("MEDL");

    let pipeline = ExtractionPipeline::new(Arc::new(host.clone()), host.clipboard(), config.clone());
    let summaries = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].submitted, 6);
    assert_eq!(summaries[0].spools, 0);
    assert_eq!(summaries[0].rows, 0);
    assert!(summaries[0].outputs.is_empty());
    assert!(!config.exported_dir.join("IW67_MEDL.txt").exists());
    assert!(fs::read_dir(&config.landing_dir).unwrap().next().is_none());
}

#[tokio::test(start_paused = true)]
async fn malformed_export_is_fetched_again() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.extractions.truncate(1);
    config.merge_tables = false;
    let host = host(&config);
    host.garble_next_exports(1);

    let pipeline = ExtractionPipeline::new(Arc::new(host.clone()), host.clipboard(), config.clone());
    let summaries = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(host.export_count(), 2);
    assert_eq!(summaries[0].spools, 6);
    assert_eq!(summaries[0].rows, 6);
    let exported = read_delimited(&[config.exported_dir.join("IW67_MEDL.txt")]).unwrap();
    assert_eq!(exported.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn invalid_worker_count_aborts_before_any_session() {
    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.workers = 0;
    let host = host(&config);

    let pipeline = ExtractionPipeline::new(Arc::new(host.clone()), host.clipboard(), config);
    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();
    assert!(spoolex::error::is_fatal(&err));
    assert!(host.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_run() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    let host = host(&config);
    host.fail_next_sessions(u32::MAX);

    let cancel = CancellationToken::new();
    let pipeline = ExtractionPipeline::new(Arc::new(host.clone()), host.clipboard(), config);
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        trigger.cancel();
    });

    let err = pipeline.run(&cancel).await.unwrap_err();
    assert!(spoolex::error::is_fatal(&err));
    assert!(host.submissions().is_empty());
}
