use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tonescale_analysis::{
    build_histogram, Annotation, FragmentSearch, HistogramCache, HistogramTable, Matcher, Recording,
};

mod annotation_file;
mod config;

use annotation_file::AnnotationFile;
use config::Config;

/// Tone scale analysis and transposition invariant matching of pitch annotated recordings
#[derive(Parser)]
#[command(name = "tonescale", author, version, about, long_about = None)]
struct Cli {
    /// TOML file with analysis settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank recordings by pitch class similarity to a needle
    Match {
        needle: PathBuf,
        #[arg(required = true)]
        haystack: Vec<PathBuf>,
    },
    /// Print the tone scale of a recording as a Scala file
    Scale {
        annotations: PathBuf,
        /// Description line of the Scala file (defaults to the file name)
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Dump the pitch class histogram of a recording
    Table { annotations: PathBuf },
    /// Find where a short fragment occurs in a longer recording
    Fragment {
        needle: PathBuf,
        haystack: PathBuf,
        /// Number of best windows to print
        #[arg(short, long, default_value_t = 5)]
        top: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    config.init_thread_pool()?;

    match cli.command {
        Commands::Match { needle, haystack } => run_match(&config, needle, haystack),
        Commands::Scale {
            annotations,
            description,
        } => run_scale(&config, annotations, description),
        Commands::Table { annotations } => run_table(&config, annotations),
        Commands::Fragment {
            needle,
            haystack,
            top,
        } => run_fragment(&config, needle, haystack, top),
    }
}

fn read(path: &Path) -> Result<Vec<Annotation>> {
    AnnotationFile::new(path)
        .annotations()
        .with_context(|| format!("failed to read annotations from {}", path.display()))
}

fn run_match(config: &Config, needle: PathBuf, haystack: Vec<PathBuf>) -> Result<()> {
    let cache = HistogramCache::new();
    let matcher = Matcher::new(config.match_params()?, &cache);
    let needle = AnnotationFile::new(needle);
    let haystack: Vec<AnnotationFile> = haystack.iter().map(AnnotationFile::new).collect();

    let results = matcher
        .rank(&needle, &haystack)
        .with_context(|| format!("failed to fingerprint {}", needle.path.display()))?;
    info!("{} candidates ranked", results.len());

    println!("id;score;displacement;kind");
    for r in results {
        println!(
            "{};{:.4};{};{}",
            r.candidate_id, r.score, r.displacement, r.kind
        );
    }
    Ok(())
}

fn run_scale(config: &Config, path: PathBuf, description: Option<String>) -> Result<()> {
    let annotations = read(&path)?;
    let histogram = build_histogram(&annotations, &config.fingerprint_params())
        .with_context(|| format!("no usable pitch class histogram for {}", path.display()))?;
    let description = description.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let scale = histogram.scale(description, &config.peak_params())?;
    print!("{scale}");
    Ok(())
}

fn run_table(config: &Config, path: PathBuf) -> Result<()> {
    let annotations = read(&path)?;
    let histogram = build_histogram(&annotations, &config.fingerprint_params())
        .with_context(|| format!("no usable pitch class histogram for {}", path.display()))?;
    print!("{}", HistogramTable::new(histogram.counts()));
    Ok(())
}

fn run_fragment(config: &Config, needle: PathBuf, haystack: PathBuf, top: usize) -> Result<()> {
    let fragment = read(&needle)?;
    let recording = read(&haystack)?;
    let search = FragmentSearch::new(&fragment, config.fragment_params())
        .with_context(|| format!("unusable fragment {}", needle.display()))?;

    let mut windows = search.search(&recording)?;
    info!(
        "{} windows of {:.2}s scored",
        windows.len(),
        search.duration()
    );
    // stable, earlier windows first on ties
    windows.sort_by(|a, b| b.score.total_cmp(&a.score));

    println!("start_seconds;score;shift_cents");
    for w in windows.iter().take(top) {
        println!("{:.3};{:.4};{}", w.start_seconds, w.score, w.shift_cents);
    }
    Ok(())
}
