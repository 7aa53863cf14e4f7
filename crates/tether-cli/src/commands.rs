use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use tether_host::{InProcessLauncher, ProcessLauncher, RemoteHost, WorkerLauncher};
use tether_registry::GlobalOperationRegistry;
use tether_snapshot::Workspace;
use tether_store::{ContentStore, InMemoryContentStore};
use tether_types::{CancellationSignal, Checksum, SnapshotVersion};
use tether_worker::stats::{
    DocumentStats, DocumentStatsParams, FindMatch, FindParams, SolutionStats, DOCUMENT_STATS, FIND,
    SOLUTION_STATS,
};
use tether_worker::TextStatsService;
use tracing::info;

use crate::cli::*;
use crate::config::CliConfig;
use crate::loader::load_directory;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Worker(args) => cmd_worker(args, config).await,
        Command::Analyze(args) => cmd_analyze(args, config, cli.format).await,
        Command::Checksum(args) => cmd_checksum(args, config, cli.format),
    }
}

async fn cmd_worker(args: WorkerArgs, config: CliConfig) -> anyhow::Result<()> {
    let mut worker = config.worker;
    if let Some(dir) = args.cache_dir {
        worker.cache_dir = Some(dir);
    }
    if let Some(capacity) = args.cache_capacity {
        worker.cache_capacity = capacity;
    }
    info!(cache_dir = ?worker.cache_dir, cache_capacity = worker.cache_capacity, "worker starting");
    tether_worker::serve_stdio(&worker, Arc::new(TextStatsService)).await?;
    info!("host disconnected");
    Ok(())
}

/// Everything `analyze` reports about one directory.
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub checksum: Checksum,
    pub version: SnapshotVersion,
    /// Nodes the worker pulled to resolve the snapshot.
    pub fetched: usize,
    pub whole_snapshot_hit: bool,
    pub solution: SolutionStats,
    pub documents: Vec<DocumentStats>,
    pub matches: Vec<FindMatch>,
}

async fn cmd_analyze(args: AnalyzeArgs, config: CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let launcher: Arc<dyn WorkerLauncher> = if args.in_process {
        Arc::new(InProcessLauncher::new(config.worker.clone(), Arc::new(TextStatsService)))
    } else if let Some(program) = &args.worker {
        Arc::new(ProcessLauncher::new(program, config.host.worker_args.clone()))
    } else {
        Arc::new(ProcessLauncher::from_config(&config.host)?)
    };

    let cancel = CancellationSignal::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let store: Arc<dyn ContentStore> =
        Arc::new(InMemoryContentStore::with_config(config.host.store.clone()));
    let workspace = load_directory(&args.path, store)?;
    let report = analyze(&workspace, launcher, args.find.as_deref(), &cancel).await;
    interrupt.abort();
    let report = report?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&args.path, &report),
    }
    Ok(())
}

/// Sync the workspace's current snapshot to a worker and collect its
/// statistics. The worker is shut down before returning.
pub async fn analyze(
    workspace: &Workspace,
    launcher: Arc<dyn WorkerLauncher>,
    find: Option<&str>,
    cancel: &CancellationSignal,
) -> anyhow::Result<AnalysisReport> {
    let host = RemoteHost::new(
        Arc::clone(workspace.store()),
        launcher,
        GlobalOperationRegistry::new(),
    );
    let result = collect(&host, workspace, find, cancel).await;
    host.shutdown().await;
    result
}

async fn collect(
    host: &RemoteHost,
    workspace: &Workspace,
    find: Option<&str>,
    cancel: &CancellationSignal,
) -> anyhow::Result<AnalysisReport> {
    let snapshot = workspace.current();
    let pin = host.synchronize(&snapshot, cancel).await?;

    let solution = host
        .invoke(&snapshot, SOLUTION_STATS, json!({}), Some(&pin), cancel)
        .await?;
    let solution: SolutionStats = serde_json::from_value(solution)?;

    let mut documents = Vec::new();
    for doc in snapshot.documents() {
        let params = serde_json::to_value(DocumentStatsParams { document: doc.id() })?;
        let stats = host
            .invoke(&snapshot, DOCUMENT_STATS, params, Some(&pin), cancel)
            .await?;
        documents.push(serde_json::from_value::<DocumentStats>(stats)?);
    }
    documents.sort_by(|a, b| a.name.cmp(&b.name));

    let matches = match find {
        Some(pattern) => {
            let params = serde_json::to_value(FindParams { pattern: pattern.to_string() })?;
            let found = host.invoke(&snapshot, FIND, params, Some(&pin), cancel).await?;
            serde_json::from_value(found)?
        }
        None => Vec::new(),
    };

    let report = AnalysisReport {
        checksum: pin.checksum(),
        version: snapshot.version(),
        fetched: pin.fetched(),
        whole_snapshot_hit: pin.whole_snapshot_hit(),
        solution,
        documents,
        matches,
    };
    host.release_pin(pin).await?;
    Ok(report)
}

fn print_report(path: &Path, report: &AnalysisReport) {
    println!(
        "{} Analyzed {} ({} {})",
        "✓".green().bold(),
        path.display().to_string().bold(),
        "snapshot".dimmed(),
        report.checksum.short_hex().cyan(),
    );
    println!(
        "  Synced: {} nodes{}",
        report.fetched.to_string().bold(),
        if report.whole_snapshot_hit { " (already resident)".dimmed().to_string() } else { String::new() },
    );
    let totals = &report.solution.totals;
    println!(
        "  Documents: {}  Lines: {}  Words: {}  Bytes: {}",
        report.solution.documents.to_string().bold(),
        totals.lines,
        totals.words,
        totals.bytes,
    );
    for doc in &report.documents {
        println!(
            "    {:>6} {:>7} {:>8}  {}",
            doc.stats.lines,
            doc.stats.words,
            doc.stats.bytes,
            doc.name.yellow(),
        );
    }
    if !report.matches.is_empty() {
        println!("  Matches: {}", report.matches.len().to_string().bold());
        for m in &report.matches {
            println!("    {}:{}:{}", m.name.yellow(), m.line, m.column);
        }
    }
}

fn cmd_checksum(args: ChecksumArgs, config: CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::with_config(config.host.store));
    let workspace = load_directory(&args.path, store)?;
    let snapshot = workspace.current();

    if format == OutputFormat::Json {
        let projects: Vec<_> = snapshot
            .projects()
            .map(|p| {
                let documents: Vec<_> = p
                    .documents()
                    .map(|d| json!({ "name": d.name(), "checksum": d.checksum() }))
                    .collect();
                json!({ "name": p.name(), "checksum": p.checksum(), "documents": documents })
            })
            .collect();
        let out = json!({
            "checksum": snapshot.checksum(),
            "nodes": snapshot.all_checksums().len(),
            "projects": projects,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", snapshot.checksum().to_hex().cyan().bold());
    println!(
        "  {} projects, {} documents, {} nodes",
        snapshot.projects().count(),
        snapshot.documents().count(),
        snapshot.all_checksums().len(),
    );
    if args.tree {
        for project in snapshot.projects() {
            println!("  {} {}", project.checksum().short_hex().dimmed(), project.name().bold());
            for doc in project.documents() {
                println!("    {} {}", doc.checksum().short_hex().dimmed(), doc.name());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tether_worker::WorkerConfig;

    fn launcher() -> Arc<dyn WorkerLauncher> {
        Arc::new(InProcessLauncher::new(WorkerConfig::default(), Arc::new(TextStatsService)))
    }

    fn load(root: &Path) -> Workspace {
        load_directory(root, Arc::new(InMemoryContentStore::new())).unwrap()
    }

    #[tokio::test]
    async fn analyze_directory_in_process() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one two\nthree TODO\n").unwrap();
        fs::write(dir.path().join("b.txt"), "TODO four\n").unwrap();
        let workspace = load(dir.path());

        let report = analyze(&workspace, launcher(), Some("TODO"), &CancellationSignal::new())
            .await
            .unwrap();

        assert_eq!(report.checksum, workspace.current().checksum());
        assert!(report.fetched > 0);
        assert!(!report.whole_snapshot_hit);
        assert_eq!(report.solution.projects, 1);
        assert_eq!(report.solution.documents, 2);
        assert_eq!(report.solution.totals.lines, 3);
        assert_eq!(report.solution.totals.words, 6);
        let names: Vec<_> = report.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(report.documents[0].stats.lines, 2);
        assert_eq!(report.matches.len(), 2);
    }

    #[tokio::test]
    async fn analyze_without_find_has_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("only.txt"), "TODO").unwrap();
        let report = analyze(&load(dir.path()), launcher(), None, &CancellationSignal::new())
            .await
            .unwrap();
        assert!(report.matches.is_empty());
        assert_eq!(report.documents.len(), 1);
    }

    #[tokio::test]
    async fn analyze_reports_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), "x").unwrap();
        let cancel = CancellationSignal::new();
        cancel.cancel();
        assert!(analyze(&load(dir.path()), launcher(), None, &cancel).await.is_err());
    }

    #[test]
    fn report_serializes_flat_stats() {
        let report = AnalysisReport {
            checksum: Checksum::of(b"s"),
            version: SnapshotVersion::INITIAL,
            fetched: 3,
            whole_snapshot_hit: false,
            solution: SolutionStats {
                projects: 1,
                documents: 0,
                totals: Default::default(),
            },
            documents: Vec::new(),
            matches: Vec::new(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["solution"]["lines"], 0);
        assert_eq!(value["fetched"], 3);
    }
}
