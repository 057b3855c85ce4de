use anyhow::{Context, Result};
use chromix::affinity::{Affinity, Weights, attraction};
use chromix::catalog::{Catalog, Track, TrackId};
use chromix::db::Database;
use chromix::force::{force, mass};
use chromix::identity::{FsProbe, Identity, StdProbe};
use chromix::pathtree::{PathDistance, PathTree};
use chromix::scanner::ScanOptions;
use chromix::scanner::metadata::LoftyExtractor;
use chromix::similarity::{self, TOP_K};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chromix", version, about = "Mood/tempo/spectrum affinity for a music library")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for audio files and add them to the catalog
    Scan {
        /// Directories to scan (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Probe every file, not just known audio extensions
        #[arg(long)]
        all_files: bool,
    },

    /// Merge analyzer feature records (JSON array or TOML [[track]] tables)
    Import {
        /// Analysis file; a .toml extension selects the TOML layout
        file: PathBuf,
    },

    /// Show catalog statistics
    Stats,

    /// List the tracks pulled most strongly toward a track
    Similar {
        /// Catalogued path of the track
        path: String,

        /// Number of neighbours to show
        #[arg(short = 'n', long, default_value_t = 10)]
        top: usize,

        /// Root for directory locality (defaults to the first music_dirs entry)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Compute neighbours for every track in parallel
    Sweep {
        /// Number of parallel workers (0 = auto)
        #[arg(short, long, default_value_t = 0)]
        jobs: usize,

        /// Neighbours kept per track
        #[arg(short = 'n', long, default_value_t = TOP_K)]
        top: usize,

        /// Root for directory locality (defaults to the first music_dirs entry)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Show the per-feature affinity, masses and force between two tracks
    Force {
        a: String,
        b: String,

        /// Root for directory locality (defaults to the first music_dirs entry)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Declare that one path is a repeat of another
    Repeat {
        /// Path of the duplicate
        alias: String,
        /// Path it repeats
        canonical: String,
    },

    /// List repeat groups
    Aliases,

    /// Re-check every track on disk and drop the ones that are gone
    Prune,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = chromix::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(chromix::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path).context("Failed to open database")?;
    let probe = StdProbe;
    let weights = config.weights;

    let load = |db: &Database| -> Result<Catalog> {
        let (catalog, report) = db
            .load_catalog(&probe, config.verify_devices)
            .context("Failed to load catalog")?;
        for (alias, repeats) in &report.orphans {
            eprintln!("warning: {} repeats unknown path {}", alias, repeats);
        }
        Ok(catalog)
    };
    let tree_for = |catalog: &Catalog, root: Option<PathBuf>| -> Option<PathTree> {
        let root = root.or_else(|| config.music_dirs.first().cloned())?;
        Some(PathTree::new(root, catalog.iter().map(|(_, t)| t.path())))
    };

    match cli.command {
        Commands::Scan { paths, all_files } => {
            // Resolve scan paths: CLI args > config music_dirs
            let scan_paths = if !paths.is_empty() {
                paths
            } else if !config.music_dirs.is_empty() {
                config.music_dirs.clone()
            } else {
                anyhow::bail!(
                    "No directories to scan. Pass paths as arguments or set music_dirs in config."
                );
            };

            let mut catalog = load(&db)?;
            let options = ScanOptions {
                extension_filter: config.extension_filter && !all_files,
                show_progress: true,
            };
            let result = chromix::scanner::scan(
                &mut catalog,
                &LoftyExtractor,
                &probe,
                &scan_paths,
                &options,
            );
            db.save_catalog(&mut catalog).context("Failed to save catalog")?;
            println!(
                "Scan complete: {} scanned, {} new, {} repeats, {} not tracks, {} skipped, {} errors",
                result.scanned,
                result.new,
                result.repeats,
                result.not_tracks,
                result.skipped,
                result.errors
            );
        }

        Commands::Import { file } => {
            let records = chromix::import::read_records(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut catalog = load(&db)?;
            let report = chromix::import::import_features(&mut catalog, &records)
                .context("Import failed")?;
            db.save_catalog(&mut catalog).context("Failed to save catalog")?;
            println!(
                "Import complete: {} records, {} aliases updated",
                report.records, report.aliases_updated
            );
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Catalog Statistics");
            println!("==================");
            println!("Total tracks:     {}", stats.total_tracks);
            println!("  of which repeats: {}", stats.repeat_tracks);
            println!("With spectrum:    {}", stats.analyzed_tracks);
            println!("With colour:      {}", stats.colored_tracks);
            println!("Non-track files:  {}", stats.not_tracks);
            println!("Total duration:   {:.1} hours", stats.total_duration_hours);
            println!();

            if !stats.formats.is_empty() {
                println!("Formats:");
                for (fmt, count) in &stats.formats {
                    println!("  {:<8} {}", fmt, count);
                }
            }
        }

        Commands::Similar { path, top, root } => {
            let catalog = load(&db)?;
            let id = find(&catalog, &path)?;
            let tree = tree_for(&catalog, root);
            let neighbors = similarity::neighbors_of(
                &catalog,
                &weights,
                tree.as_ref().map(|t| t as &dyn PathDistance),
                id,
                top,
            )
            .context("Similarity search failed")?;

            println!("Strongest pulls on {}:", catalog.track(id)?.label());
            for (rank, n) in neighbors.iter().enumerate() {
                let t = catalog.track(n.id)?;
                println!("{:>3}. {:>9.2}  {}", rank + 1, n.force, t.path());
            }
        }

        Commands::Sweep { jobs, top, root } => {
            let catalog = load(&db)?;
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let tree = tree_for(&catalog, root);
            let result = similarity::compute_neighbors(
                &catalog,
                &weights,
                tree.as_ref().map(|t| t as &dyn PathDistance),
                workers,
                top,
            )
            .context("Force sweep failed")?;

            for (id, neighbors) in &result.neighbors {
                let Some(best) = neighbors.first() else {
                    continue;
                };
                println!(
                    "{:<40} -> {:<40} {:>9.2}",
                    catalog.track(*id)?.label(),
                    catalog.track(best.id)?.label(),
                    best.force
                );
            }
            println!(
                "Sweep complete: {} tracks, {} pairs",
                result.tracks_processed, result.pairs_compared
            );
        }

        Commands::Force { a, b, root } => {
            weights.validate().context("Invalid weights in config")?;
            let catalog = load(&db)?;
            let ta = catalog.track(find(&catalog, &a)?)?;
            let tb = catalog.track(find(&catalog, &b)?)?;
            let ctx = tree_for(&catalog, root).and_then(|t| t.context(ta.path(), tb.path()));

            let affinity = Affinity::between(ta.features(), tb.features(), ctx);
            print_affinity(&affinity, &weights);
            println!("attraction  {:>9.4}", attraction(&weights, ta, tb, ctx));
            println!("mass a      {:>9.4}", mass(&weights, ta));
            println!("mass b      {:>9.4}", mass(&weights, tb));
            println!("force       {:>9.4}", force(&weights, ta, tb, ctx));
        }

        Commands::Repeat { alias, canonical } => {
            let mut catalog = load(&db)?;
            if catalog.lookup_by_path(&alias).is_none() {
                let stat = probe
                    .stat(&alias)
                    .with_context(|| format!("Cannot read {}", alias))?;
                let mut track = Track::new(&alias);
                track.identity = Identity::new(stat.inode, stat.device);
                catalog.insert(track);
            }
            catalog
                .declare_repeat_path(&alias, &canonical)
                .context("Repeat declaration failed")?;
            db.save_catalog(&mut catalog).context("Failed to save catalog")?;
            println!("{} now repeats {}", alias, canonical);
        }

        Commands::Aliases => {
            let catalog = load(&db)?;
            let groups = catalog.repeat_groups();
            if groups.is_empty() {
                println!("No repeat groups.");
            }
            for group in groups {
                for (i, id) in group.iter().enumerate() {
                    let marker = if i == 0 { "*" } else { " " };
                    println!("{} {}", marker, catalog.track(*id)?.path());
                }
                println!();
            }
        }

        Commands::Prune => {
            let mut catalog = load(&db)?;
            let missing = catalog.refresh_reachability(&probe);
            let dropped = db.save_catalog(&mut catalog).context("Failed to save catalog")?;
            println!("{} unreachable, {} dropped", missing, dropped);
        }
    }

    Ok(())
}

fn find(catalog: &Catalog, path: &str) -> Result<TrackId> {
    catalog
        .lookup_by_path(path)
        .with_context(|| format!("{} is not in the catalog", path))
}

fn print_affinity(a: &Affinity, w: &Weights) {
    let rows = [
        ("hue", w.hue, a.hue),
        ("saturation", w.saturation, a.saturation),
        ("brightness", w.brightness, a.brightness),
        ("tempo", w.tempo, a.tempo),
        ("spectral", w.spectral, a.spectral),
        ("path", w.path, a.path),
    ];
    for (name, weight, sim) in rows {
        match sim {
            Some(s) => println!("{:<11} {:>9.4}  (weight {:.2})", name, s, weight),
            None => println!("{:<11} {:>9}  (weight {:.2})", name, "-", weight),
        }
    }
}
