mod interactive;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use subsearch::engine::is_container;
use subsearch::{is_candidate, CancelFlag, Config, Engine, StatusEvent, SubsearchError};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "subsearch")]
#[command(version, about = "Search subtitle files and embedded subtitle tracks")]
#[command(long_about = "Scan folders for subtitle files (srt, vtt, ass, ssa, sub, sbv, ttml) and subtitle tracks inside video containers, then list every line containing the query with its timestamp.")]
struct Cli {
    /// Text to search for
    query: String,

    /// Folder or file to scan; repeatable (defaults to the current directory)
    #[arg(short, long = "path")]
    paths: Vec<PathBuf>,

    /// Match case exactly
    #[arg(short, long)]
    case_sensitive: bool,

    /// Number of parallel workers (defaults to one per CPU)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print the video and start time for the first hit
    #[arg(long)]
    seek: bool,

    /// Choose a hit interactively and print its video and start time
    #[arg(long, conflicts_with = "seek")]
    pick: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Expand folders into the subtitle and container files below them.
fn discover(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        for entry in WalkDir::new(root).follow_links(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_candidate(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry: {}", e),
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

fn has_containers(files: &[PathBuf]) -> bool {
    files.iter().any(|f| is_container(f))
}

fn scan_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Scanning...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let roots = if cli.paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        cli.paths.clone()
    };
    for root in &roots {
        if !root.exists() {
            anyhow::bail!("Path not found: {}", root.display());
        }
    }

    // Load and validate configuration
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    // One search per run; parsing happens on demand.
    config.warm_after_scan = false;
    config.validate().context("Configuration validation failed")?;

    let files = discover(&roots);
    info!("Found {} candidate files", files.len());

    if has_containers(&files) {
        let ffmpeg = subsearch::FfmpegExtractor::from_config(&config);
        if let Err(e) = ffmpeg.check_available().await {
            warn!("{}; embedded subtitle tracks will be skipped", e);
        }
    }

    let spinner = scan_spinner();
    let progress = spinner.clone();
    let engine = Engine::new(config)
        .context("Failed to start search engine")?
        .with_status(Arc::new(move |event: &StatusEvent| match event {
            StatusEvent::ScanProgress { scanned, total } => {
                progress.set_message(format!("Scanning... {scanned}/{total}"));
            }
            StatusEvent::ParseDegraded { key, .. } => {
                progress.suspend(|| warn!("{} could not be fully parsed", key));
            }
            _ => {}
        }));

    let report = engine.scan(&files).await.context("Scan failed")?;
    spinner.finish_with_message(format!(
        "✓ {} documents from {} files",
        report.documents.len(),
        report.files_scanned
    ));
    for failure in &report.failures {
        warn!("{}: {}", failure.path.display(), failure.reason);
    }

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel()).context("Failed to install Ctrl+C handler")?;

    let results = match engine
        .search_with_cancel(&cli.query, cli.case_sensitive, &cancel)
        .await
    {
        Ok(results) => results,
        Err(SubsearchError::Cancelled) => {
            println!("Search cancelled");
            return Ok(());
        }
        Err(e) => return Err(e).context("Search failed"),
    };

    interactive::print_results(&results);

    let chosen = if cli.seek {
        results.hits.first()
    } else if cli.pick && !results.hits.is_empty() {
        interactive::pick_hit(&results.hits)?.map(|i| &results.hits[i])
    } else {
        None
    };

    if let Some(hit) = chosen {
        match engine.resolve_seek_target(hit) {
            Ok(target) => interactive::print_seek_target(&target),
            Err(e) => warn!("{}", e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("season1");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("b.srt"), "").unwrap();
        std::fs::write(dir.path().join("a.ass"), "").unwrap();
        std::fs::write(dir.path().join("movie.mkv"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = discover(&[dir.path().to_path_buf()]);
        let names: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("a.ass"),
                PathBuf::from("movie.mkv"),
                Path::new("season1").join("b.srt"),
            ]
        );
        assert!(has_containers(&files));
    }

    #[test]
    fn test_explicit_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("odd.captions");
        std::fs::write(&file, "").unwrap();
        assert_eq!(discover(&[file.clone()]), vec![file]);
    }
}
