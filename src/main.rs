use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use everloop::analysis::model::Span;
use everloop::analysis::source::JsonFileSource;
use everloop::analysis::{Kind, NodeRef};
use everloop::graph::AnnotatedTrack;
use everloop::library::{self, BuildOutcome};
use everloop::remix::JumpSelector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "everloop", version, about = "Endless remixes from song analyses")]
struct Cli {
    /// Path to the graph cache database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Bar,
    Beat,
    Tatum,
    Segment,
}

impl From<KindArg> for Kind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Bar => Kind::Bar,
            KindArg::Beat => Kind::Beat,
            KindArg::Tatum => Kind::Tatum,
            KindArg::Segment => Kind::Segment,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or load from cache) the jump graph of one analysis file
    Build {
        /// Analysis JSON file
        path: PathBuf,

        /// Node kind to build the graph over (defaults to config)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Rebuild even if a cached graph exists
        #[arg(long)]
        no_cache: bool,
    },

    /// Build graphs for every analysis file under a directory
    BuildAll {
        /// Directory to walk for *.json analyses
        dir: PathBuf,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Rebuild even if a cached graph exists
        #[arg(long)]
        no_cache: bool,
    },

    /// Print an endless-remix walk through a track
    Walk {
        /// Analysis JSON file
        path: PathBuf,

        /// Number of steps to print
        #[arg(short = 'n', long, default_value = "64")]
        steps: usize,

        /// Node to start from
        #[arg(long, default_value = "0")]
        start: usize,

        /// RNG seed for a reproducible walk
        #[arg(long)]
        seed: Option<u64>,

        /// Jump probability per step (defaults to config)
        #[arg(short, long)]
        probability: Option<f64>,
    },

    /// Show the links and jump edges of one node
    Inspect {
        /// Analysis JSON file
        path: PathBuf,

        /// Node index within the graph's kind
        #[arg(long, default_value = "0")]
        node: usize,
    },

    /// List cached graphs
    List,

    /// Remove every cached graph of one analysis file
    Forget {
        /// Analysis JSON file
        path: PathBuf,
    },

    /// Show cache statistics
    Stats,
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
    let config = everloop::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(everloop::config::default_db_path);
    log::info!("Graph cache: {}", db_path.display());

    let store = everloop::db::GraphStore::open(&db_path).context("Failed to open graph cache")?;

    match cli.command {
        Commands::Build { path, kind, jobs, no_cache } => {
            let mut graph_config = config.graph.clone();
            if let Some(kind) = kind {
                graph_config.kind = kind.into();
            }
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let (graph, outcome) = library::load_or_build(
                &store,
                &source_for(&path),
                &path.to_string_lossy(),
                &graph_config,
                workers,
                !no_cache,
            )
            .with_context(|| format!("Failed to build graph for {}", path.display()))?;

            match outcome {
                BuildOutcome::Built => println!("Built graph for {}", path.display()),
                BuildOutcome::Cached => println!("Loaded cached graph for {}", path.display()),
            }
            println!();
            print_graph_summary(&graph);
        }

        Commands::BuildAll { dir, jobs, no_cache } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let result = library::build_directory(&store, &dir, &config.graph, workers, !no_cache)
                .context("Batch build failed")?;
            println!(
                "Build complete: {} files, {} built, {} cached, {} failed",
                result.scanned, result.built, result.cached, result.failed
            );
        }

        Commands::Walk { path, steps, start, seed, probability } => {
            let graph = load_graph(&store, &path, &config)?;
            let mut remix_config = config.remix.clone();
            if let Some(p) = probability {
                remix_config.jump_probability = p;
            }
            let selector = JumpSelector::new(&graph, remix_config).context("Invalid remix settings")?;
            let rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };

            println!("{:>6} {:<14} {:>9} {:>9}", "Step", "Node", "Start", "Dur");
            println!("{}", "-".repeat(44));
            let mut jumps = 0usize;
            for (i, step) in selector.session(start, rng).take(steps).enumerate() {
                let span = graph.track().span(step.node);
                if step.jumped {
                    jumps += 1;
                }
                println!(
                    "{:>6} {:<14} {:>8.3}s {:>8.3}s{}",
                    i,
                    step.node.to_string(),
                    span.start(),
                    span.duration(),
                    if step.jumped { "  <- jump" } else { "" },
                );
            }
            println!();
            println!("{} jumps in {} steps", jumps, steps);
        }

        Commands::Inspect { path, node } => {
            let graph = load_graph(&store, &path, &config)?;
            let Some(annotations) = graph.node(node) else {
                println!("No {} #{} (graph has {} nodes).", graph.kind(), node, graph.len());
                return Ok(());
            };
            print_node(&graph, NodeRef::new(graph.kind(), node));

            if annotations.all_neighbours.is_empty() {
                println!("No candidate jumps.");
                return Ok(());
            }
            println!();
            println!("{:>6} {:<14} {:>9}  {}", "Edge", "Target", "Dist", "Kept");
            println!("{}", "-".repeat(40));
            for edge in &annotations.all_neighbours {
                let kept = annotations.neighbours.iter().any(|e| e.target == edge.target);
                println!(
                    "{:>6} {:<14} {:>9.3}  {}",
                    if kept { edge.id.to_string() } else { "-".to_string() },
                    edge.target.to_string(),
                    edge.distance,
                    if kept { "yes" } else { "" },
                );
            }
            println!();
            println!("Reach: #{}", annotations.reach);
        }

        Commands::List => {
            let graphs = store.list().context("Query failed")?;
            if graphs.is_empty() {
                println!("No cached graphs.");
                return Ok(());
            }
            println!(
                "{:<16} {:<8} {:>6} {:>6} {:>5}  {:<19}  {}",
                "Fingerprint", "Kind", "Nodes", "Edges", "Warn", "Created", "Source"
            );
            println!("{}", "-".repeat(90));
            for g in &graphs {
                println!(
                    "{:<16} {:<8} {:>6} {:>6} {:>5}  {:<19}  {}",
                    &g.fingerprint[..g.fingerprint.len().min(16)],
                    g.kind,
                    g.node_count,
                    g.edge_count,
                    g.warning_count,
                    g.created_at,
                    g.source.as_deref().unwrap_or("?"),
                );
            }
        }

        Commands::Forget { path } => {
            let removed = library::forget(&store, &source_for(&path), &path.to_string_lossy())
                .with_context(|| format!("Failed to read {}", path.display()))?;
            println!("Removed {} cached graph(s) for {}", removed, path.display());
        }

        Commands::Stats => {
            let stats = store.stats().context("Failed to get stats")?;
            println!("Graph Cache Statistics");
            println!("======================");
            println!("Cached graphs:    {}", stats.graphs);
            println!("Distinct tracks:  {}", stats.tracks);
            println!("Total nodes:      {}", stats.total_nodes);
            println!("Total edges:      {}", stats.total_edges);
            println!("With warnings:    {}", stats.graphs_with_warnings);
            println!("Payload size:     {:.1} KiB", stats.payload_bytes as f64 / 1024.0);
            println!();

            if !stats.kinds.is_empty() {
                println!("Kinds:");
                for (kind, count) in &stats.kinds {
                    println!("  {:<10} {}", kind, count);
                }
            }
        }
    }

    Ok(())
}

fn source_for(path: &Path) -> JsonFileSource {
    JsonFileSource::new(path.parent().unwrap_or_else(|| Path::new(".")))
}

/// Graph for `path` with the configured settings, built if not cached.
fn load_graph(
    store: &everloop::db::GraphStore,
    path: &Path,
    config: &everloop::config::AppConfig,
) -> Result<AnnotatedTrack> {
    let (graph, _) = library::load_or_build(
        store,
        &source_for(path),
        &path.to_string_lossy(),
        &config.graph,
        config.resolve_workers(),
        true,
    )
    .with_context(|| format!("Failed to build graph for {}", path.display()))?;
    Ok(graph)
}

fn print_graph_summary(graph: &AnnotatedTrack) {
    let track = graph.track();
    println!("Fingerprint:  {}", graph.fingerprint());
    println!("Duration:     {:.1} s", track.duration());
    println!(
        "Nodes:        {} sections, {} bars, {} beats, {} tatums, {} segments",
        track.sections().len(),
        track.bars().len(),
        track.beats().len(),
        track.tatums().len(),
        track.segments().len(),
    );
    println!("Graph kind:   {} ({} nodes)", graph.kind(), graph.len());
    println!("Candidates:   {}", graph.candidate_count());
    match graph.threshold() {
        Some(t) => println!("Threshold:    {:.3} (p{})", t, graph.config().percentile),
        None => println!("Threshold:    n/a"),
    }
    println!("Jump edges:   {}", graph.edge_count());

    if !graph.warnings().is_empty() {
        println!();
        println!("Warnings:");
        for w in graph.warnings() {
            println!("  {}", w);
        }
    }
}

/// Print the hierarchy links of one node.
fn print_node(graph: &AnnotatedTrack, node: NodeRef) {
    let linked = graph.linked();
    let span = graph.track().span(node);
    let show = |n: Option<NodeRef>| n.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());

    println!("Node:         {}", node);
    println!("Time:         {:.3}s + {:.3}s", span.start(), span.duration());
    println!("Prev / next:  {} / {}", show(linked.prev(node)), show(linked.next(node)));
    println!("Parent:       {}", show(linked.parent(node)));
    println!("Children:     {}", linked.children(node).count());
    println!("Segments:     {}", linked.overlapping_segments(node).count());
    println!(
        "Owner:        {}",
        show(linked.owning_segment(node).map(|s| NodeRef::new(Kind::Segment, s)))
    );
}
