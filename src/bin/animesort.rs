#![forbid(unsafe_code)]

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use animesort::source::JikanConfig;
use animesort::{
    FileItemSource, ItemSource, JikanSource, KFactorPolicy, Phase, Session, SessionConfig,
    SessionError, SqliteSnapshotStore,
};

#[derive(Parser)]
#[command(name = "animesort", version, about = "Rank your anime list one pair at a time")]
struct Cli {
    /// Save slot database
    #[arg(long, global = true, env = "ANIMESORT_SAVE_PATH")]
    save: Option<PathBuf>,
    /// Seed for pair shuffling (reproducible sessions)
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Rating update policy
    #[arg(long, global = true, value_enum, default_value_t = KFactorArg::Fixed)]
    k_factor: KFactorArg,
    /// K used by the fixed policy
    #[arg(long, global = true, default_value_t = animesort::elo::DEFAULT_K_FACTOR)]
    k_value: f64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KFactorArg {
    Fixed,
    Banded,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new ranking
    Rank {
        /// MyAnimeList username to fetch the list for
        #[arg(long, conflicts_with = "items", required_unless_present = "items")]
        user: Option<String>,
        /// Local JSON file with list items instead of the API
        #[arg(long)]
        items: Option<PathBuf>,
        /// Override the list API endpoint
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Continue the saved ranking
    Resume,
    /// Load an exported ranking into the save slot
    Import {
        #[arg(long)]
        file: PathBuf,
        /// Refresh titles from a local item file
        #[arg(long, conflicts_with = "offline")]
        items: Option<PathBuf>,
        /// Use the titles stored in the document, no fetch
        #[arg(long)]
        offline: bool,
    },
    /// Write the saved, finished ranking as JSON
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the saved ranking
    Results {
        /// Show only the top N entries
        #[arg(long)]
        top: Option<usize>,
    },
    /// Forget the saved ranking
    DeleteSave,
}

enum Prompt {
    Left,
    Right,
    Undo,
    Save,
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let config = SessionConfig {
        k_factor: match cli.k_factor {
            KFactorArg::Fixed => KFactorPolicy::Fixed(cli.k_value),
            KFactorArg::Banded => KFactorPolicy::Banded,
        },
        rng_seed: cli.seed,
        ..SessionConfig::default()
    };
    let save_path = cli.save.unwrap_or_else(SqliteSnapshotStore::default_path);
    let snapshots = SqliteSnapshotStore::new(&save_path)?;
    let mut session = Session::new(config, snapshots);

    match cli.command {
        Commands::Rank {
            user,
            items,
            base_url,
        } => {
            let source: Box<dyn ItemSource> = match &items {
                Some(path) => Box::new(FileItemSource::new(path)),
                None => {
                    let mut jikan = JikanConfig::from_env();
                    if let Some(url) = base_url {
                        jikan.base_url = url;
                    }
                    Box::new(JikanSource::with_config(jikan)?)
                }
            };
            let source_id = user.unwrap_or_else(|| "local".to_string());
            session.set_source(source_id)?;
            eprintln!("loading list of {}...", session.state().username());
            session.load(source.as_ref()).await?;
            if session.state().phase() == Phase::ErrorLoading {
                let message = session.state().last_error().unwrap_or("unknown error");
                return Err(format!("could not start: {message}").into());
            }
            compare_loop(&mut session)?;
        }
        Commands::Resume => {
            session.restore()?;
            match session.state().phase() {
                Phase::Comparing => compare_loop(&mut session)?,
                Phase::Finished => print_results(&session, None),
                phase => return Err(format!("saved session is {phase:?}, nothing to resume").into()),
            }
        }
        Commands::Import {
            file,
            items,
            offline,
        } => {
            let raw = std::fs::read_to_string(&file)?;
            session.import_json(&raw)?;
            if offline {
                session.finish_import_offline()?;
            } else {
                let source: Box<dyn ItemSource> = match &items {
                    Some(path) => Box::new(FileItemSource::new(path)),
                    None => Box::new(JikanSource::from_env()?),
                };
                let refreshed = match session.load(source.as_ref()).await {
                    Ok(phase) => phase == Phase::Finished,
                    Err(err) => {
                        eprintln!("could not refresh titles ({err})");
                        false
                    }
                };
                if !refreshed {
                    eprintln!("using stored titles");
                    session.import_json(&raw)?;
                    session.finish_import_offline()?;
                }
            }
            session.save()?;
            println!(
                "imported ranking of {} items into {}",
                session.state().results().len(),
                save_path.display()
            );
            print_results(&session, Some(10));
        }
        Commands::Export { out } => {
            session.restore()?;
            let document = session.export()?;
            std::fs::write(&out, document.to_json_pretty()?)?;
            println!("wrote {}", out.display());
        }
        Commands::Results { top } => {
            session.restore()?;
            print_results(&session, top);
        }
        Commands::DeleteSave => {
            session.delete_save()?;
            println!("deleted saved session in {}", save_path.display());
        }
    }

    Ok(())
}

fn compare_loop(session: &mut Session<SqliteSnapshotStore>) -> Result<(), SessionError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    while session.state().phase() == Phase::Comparing {
        let Some(pair) = session.state().current_pair() else {
            break;
        };
        let state = session.state();
        let label = |id| {
            state
                .title_of(id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{id}"))
        };
        println!(
            "[{:5.1}%] 1) {}   2) {}",
            state.progress(),
            label(pair.left),
            label(pair.right)
        );
        print!("> ");
        io::stdout().flush().ok();

        let Some(Ok(line)) = lines.next() else {
            println!();
            break;
        };
        let prompt = match line.trim() {
            "1" => Prompt::Left,
            "2" => Prompt::Right,
            "u" => Prompt::Undo,
            "s" => Prompt::Save,
            "q" => Prompt::Quit,
            other => {
                println!("unknown choice {other:?}: 1, 2, u (undo), s (save), q (quit)");
                continue;
            }
        };
        match prompt {
            Prompt::Left => {
                session.choose_left()?;
            }
            Prompt::Right => {
                session.choose_right()?;
            }
            Prompt::Undo => match session.undo() {
                Ok(_) => println!("undone"),
                Err(SessionError::NoUndo) => println!("nothing to undo"),
                Err(err) => return Err(err),
            },
            Prompt::Save => {
                session.save()?;
                println!("saved");
            }
            Prompt::Quit => break,
        }
    }

    if session.state().phase() == Phase::Finished {
        session.save()?;
        let counters = *session.state().counters();
        println!(
            "done: {} choices, {} resolved automatically",
            counters.manually_eliminated,
            counters.automatic_total()
        );
        print_results(session, None);
    } else if !session.state().is_saved() {
        println!("quit without saving");
    }
    Ok(())
}

fn print_results<S: animesort::SnapshotStore>(session: &Session<S>, top: Option<usize>) {
    let results = session.state().results();
    let limit = top.unwrap_or(results.len());
    for entry in results.iter().take(limit) {
        let title = entry
            .title
            .clone()
            .unwrap_or_else(|| format!("#{}", entry.id));
        println!(
            "{:>4}. {:<50} {:>5}  ({}W/{}L)",
            entry.rank, title, entry.rating, entry.wins, entry.losses
        );
    }
}
