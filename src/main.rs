mod config;
mod db;
mod extract;
mod minify;
mod report;
mod summary;
#[cfg(feature = "serve")]
mod serve;

use clap::{Parser, Subcommand};
use db::{JobStatus, JobUpdate, NewJob};
use serde_json::json;
use std::path::PathBuf;

/// Durable queue for long-running agent task invocations: enqueue and update
/// job records, normalize finished runs into compact summaries, and serve
/// the queue as a JSON API plus dashboard.
#[derive(Parser, Debug)]
#[command(name = "runledger", version, about)]
struct Cli {
    /// Path to the queue database (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file path
    #[arg(long, default_value = "runledger.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and schema if needed
    Init,

    /// Insert a new job entry, printing its id
    Enqueue {
        /// Task text
        #[arg(long)]
        task: String,
        #[arg(long, value_enum, default_value_t = JobStatus::Pending)]
        status: JobStatus,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        tier: Option<String>,
        #[arg(long = "cache")]
        cache_status: Option<String>,
        #[arg(long)]
        result_path: Option<String>,
        #[arg(long)]
        log_path: Option<String>,
        #[arg(long)]
        meta_path: Option<String>,
        #[arg(long)]
        summary_path: Option<String>,
        #[arg(long)]
        started_at: Option<String>,
    },

    /// Update an existing job; only supplied fields change
    Update {
        /// Job id
        #[arg(long)]
        id: i64,
        #[arg(long, value_enum)]
        status: Option<JobStatus>,
        #[arg(long)]
        exit_code: Option<i32>,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        completed_at: Option<String>,
        #[arg(long)]
        result_path: Option<String>,
        #[arg(long)]
        log_path: Option<String>,
        #[arg(long)]
        meta_path: Option<String>,
        #[arg(long)]
        summary_path: Option<String>,
        #[arg(long = "cache")]
        cache_status: Option<String>,
        #[arg(long)]
        error: Option<String>,
    },

    /// List recent jobs as JSON
    List {
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Normalize a raw run log (plus optional metadata) into a compact
    /// summary JSON object on stdout
    Parse {
        /// Path to the raw run log
        #[arg(long)]
        log: PathBuf,
        /// Path to the metadata JSON emitted by the invocation wrapper
        #[arg(long)]
        meta: Option<PathBuf>,
    },

    /// Flatten a summary (compact or legacy shaped) to the short-key schema
    Minify {
        /// Input summary JSON (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a one-line report for a run summary file
    Report {
        #[arg(long)]
        summary: PathBuf,
    },

    /// Serve the queue as a JSON API plus dashboard
    #[cfg(feature = "serve")]
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Default and fallback limit for /api/jobs
        #[arg(long)]
        limit: Option<u32>,
        /// Path to a dashboard HTML file
        #[arg(long)]
        dashboard: Option<PathBuf>,
        /// Open the dashboard in a browser after binding
        #[arg(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runledger=info".parse().expect("static filter parses")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

fn emit_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).expect("json serializes"));
}

async fn run(cli: Cli) -> i32 {
    let config = config::load(&cli.config);
    let db_path = cli.db.unwrap_or(config.storage.db);

    match cli.command {
        Commands::Init => match db::open_or_create(&db_path) {
            Ok(_) => {
                emit_json(&json!({"status": "ok", "db": db_path.display().to_string()}));
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        },

        Commands::Enqueue {
            task,
            status,
            repo,
            run_id,
            session_id,
            mode,
            tier,
            cache_status,
            result_path,
            log_path,
            meta_path,
            summary_path,
            started_at,
        } => {
            let job = NewJob {
                task,
                status,
                repo,
                run_id,
                session_id,
                mode,
                tier,
                cache_status,
                result_path,
                log_path,
                meta_path,
                summary_path,
                started_at,
            };
            let result = db::open_or_create(&db_path).and_then(|conn| db::enqueue(&conn, &job));
            match result {
                Ok(id) => {
                    println!("{id}");
                    0
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            }
        }

        Commands::Update {
            id,
            status,
            exit_code,
            session_id,
            completed_at,
            result_path,
            log_path,
            meta_path,
            summary_path,
            cache_status,
            error,
        } => {
            let update = JobUpdate {
                status,
                exit_code,
                session_id,
                completed_at,
                result_path,
                log_path,
                meta_path,
                summary_path,
                cache_status,
                error,
            };
            let result =
                db::open_or_create(&db_path).and_then(|conn| db::update_job(&conn, id, &update));
            match result {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            }
        }

        Commands::List { limit } => {
            let limit = limit.unwrap_or(config.serve.limit);
            let result = db::open_or_create(&db_path).and_then(|conn| db::fetch_jobs(&conn, limit));
            match result {
                Ok(jobs) => {
                    emit_json(&json!({"jobs": jobs}));
                    0
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            }
        }

        Commands::Parse { log, meta } => {
            let summary = summary::parse_run(&log, meta.as_deref());
            // One machine-parseable object, no trailing content.
            println!("{}", serde_json::to_string(&summary).expect("json serializes"));
            0
        }

        Commands::Minify { input, output } => run_minify(input.as_deref(), output.as_deref()),

        Commands::Report { summary } => match report::load_summary(&summary) {
            Ok(loaded) => {
                println!("{}", report::render(&loaded));
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                2
            }
        },

        #[cfg(feature = "serve")]
        Commands::Serve {
            host,
            port,
            limit,
            dashboard,
            open,
        } => {
            let options = serve::ServeOptions {
                host: host.unwrap_or(config.serve.host),
                port: port.unwrap_or(config.serve.port),
                default_limit: limit.unwrap_or(config.serve.limit),
                dashboard: dashboard.or(config.serve.dashboard),
                open_browser: open,
            };
            match serve::run(db_path, options).await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            }
        }
    }
}

/// Minify reads leniently (bad input becomes an empty object, yielding the
/// all-null skeleton) to match the rest of the summarization pipeline.
fn run_minify(input: Option<&std::path::Path>, output: Option<&std::path::Path>) -> i32 {
    use std::io::Read;

    let text = match input {
        Some(path) => std::fs::read_to_string(path).unwrap_or_default(),
        None => {
            let mut buf = String::new();
            if std::io::stdin().read_to_string(&mut buf).is_err() {
                buf.clear();
            }
            buf
        }
    };
    let summary = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let minimized = minify::minify(&summary);
    let rendered = serde_json::to_string_pretty(&minimized).expect("json serializes");

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        eprintln!("error: cannot create {}: {e}", parent.display());
                        return 1;
                    }
                }
            }
            if let Err(e) = std::fs::write(path, rendered + "\n") {
                eprintln!("error: cannot write {}: {e}", path.display());
                return 1;
            }
            0
        }
        None => {
            println!("{rendered}");
            0
        }
    }
}
