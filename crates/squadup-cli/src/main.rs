// squadup command-line entry point.
//
// Every invocation:
// 1. Initialize tracing (stderr, so stdout stays clean for output)
// 2. Load config
// 3. Open the SQLite store
// 4. Run one coordinator operation and print the result

mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use squadup_core::config;
use squadup_core::role::Role;
use squadup_core::service::{Coordinator, Settings};
use squadup_core::solver::SolveOutcome;
use squadup_core::store::SqliteStore;

/// Form 1 tank / 1 healer / 3 dps groups from a signup roster
#[derive(Parser)]
#[command(name = "squadup")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "SQUADUP_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Guild (community) the command applies to
    #[arg(long, global = true, env = "SQUADUP_GUILD", default_value = "default")]
    guild: String,

    /// Session id; defaults to the guild's current session
    #[arg(long, global = true)]
    session: Option<String>,

    /// Acting participant id
    #[arg(long, global = true, env = "SQUADUP_USER")]
    user: Option<String>,

    /// Display name of the acting participant
    #[arg(long, global = true, env = "SQUADUP_NAME", default_value = "")]
    name: String,

    /// Act with officer privileges
    #[arg(long, global = true)]
    officer: bool,

    /// Print JSON instead of text where supported
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session and make it current
    Create {
        title: String,

        #[arg(long)]
        description: Option<String>,

        /// Close signups this many minutes from now
        #[arg(long, value_name = "MINUTES")]
        lock_in: Option<i64>,
    },

    /// Toggle one of your roles on or off
    #[command(alias = "join")]
    Toggle {
        #[arg(value_parser = parse_role)]
        role: Role,
    },

    /// Choose your class for a role ("none" clears it)
    Class {
        #[arg(value_parser = parse_role)]
        role: Role,
        class: String,
    },

    /// Withdraw from the session
    Leave,

    /// Roll groups from the current roster
    Roll {
        /// Number of groups wanted; capped by the roster
        #[arg(long)]
        groups: Option<usize>,
    },

    /// Exchange two participants' slots in the draft
    Swap {
        first: String,
        second: String,

        /// Allow a player into a slot outside their roles
        #[arg(long)]
        force: bool,
    },

    /// Announce the current groups
    Publish,

    /// Set the signup deadline
    Lock {
        /// Absolute deadline (RFC 3339)
        #[arg(long, conflicts_with = "in_minutes", required_unless_present = "in_minutes")]
        at: Option<DateTime<Utc>>,

        /// Deadline relative to now
        #[arg(long = "in", value_name = "MINUTES")]
        in_minutes: Option<i64>,
    },

    /// Remove the signup deadline
    Unlock,

    /// Show a session's roster and groups
    Show,

    /// List the guild's sessions
    Sessions,

    /// Import a JSON document mapping guild ids to stored state
    Import { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing() {
        eprintln!("warning: {e:#}");
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = config::load_config(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(source = ?config.source, db = %config.db_path, "config loaded");

    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = SqliteStore::open(&config.db_path).context("failed to open database")?;
    let coordinator = Coordinator::new(store, Settings::from(&config));

    let guild = cli.guild.as_str();
    let session = cli.session.as_deref();
    let officer = cli.officer;

    match cli.command {
        Commands::Create {
            title,
            description,
            lock_in,
        } => {
            let created = coordinator.create_session(
                officer,
                guild,
                &title,
                description.as_deref(),
                lock_in.map(minutes).transpose()?,
            )?;
            println!("Created {} ({})", created.title(), created.id());
        }
        Commands::Toggle { role } => {
            let user = acting_user(cli.user.as_deref())?;
            let enabled = coordinator.toggle_role(guild, session, user, &cli.name, role)?;
            let state = if enabled { "on" } else { "off" };
            println!("{role} {state} for {user}");
        }
        Commands::Class { role, class } => {
            let user = acting_user(cli.user.as_deref())?;
            match coordinator.set_class(guild, session, user, role, &class)? {
                Some(class) => println!("{user} plays {class} as {role}"),
                None => println!("{user} cleared their {role} class"),
            }
        }
        Commands::Leave => {
            let user = acting_user(cli.user.as_deref())?;
            if coordinator.leave(guild, session, user)? {
                println!("{user} left the session");
            } else {
                println!("{user} was not signed up");
            }
        }
        Commands::Roll { groups } => match coordinator.roll(officer, guild, session, groups)? {
            SolveOutcome::Solved { draft, .. } => print!("{}", render::draft(&draft)),
            SolveOutcome::NoSolution(failure) => {
                print!("{}", render::no_solution(&failure));
                return Ok(ExitCode::from(2));
            }
        },
        Commands::Swap {
            first,
            second,
            force,
        } => {
            let outcome = coordinator.swap(officer, guild, session, &first, &second, force)?;
            println!("{first} -> {}, {second} -> {}", outcome.first, outcome.second);
            if outcome.forced_mismatch {
                println!("warning: a player now sits outside their signed-up roles");
            }
        }
        Commands::Publish => {
            let draft = coordinator.publish(officer, guild, session)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&draft)?);
            } else {
                print!("{}", render::draft(&draft));
            }
        }
        Commands::Lock { at, in_minutes } => {
            let deadline = match (at, in_minutes) {
                (Some(at), _) => at,
                (None, Some(m)) => deadline_in(Utc::now(), m)?,
                (None, None) => anyhow::bail!("either --at or --in is required"),
            };
            coordinator.set_lock(officer, guild, session, deadline)?;
            println!("Signups lock at {}", deadline.format("%Y-%m-%d %H:%M UTC"));
        }
        Commands::Unlock => {
            coordinator.unlock(officer, guild, session)?;
            println!("Signups unlocked");
        }
        Commands::Show => {
            let current = coordinator.session(guild, session)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&current)?);
            } else {
                print!("{}", render::session(&current, Utc::now()));
            }
        }
        Commands::Sessions => {
            let state = coordinator.guild(guild)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print!("{}", render::sessions(&state));
            }
        }
        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let count = coordinator.store().import_document(&json)?;
            info!(count, file = %file.display(), "state imported");
            println!("Imported {count} guild(s)");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn acting_user(user: Option<&str>) -> Result<&str> {
    user
        .context("--user (or SQUADUP_USER) is required for this command")
}

fn minutes(m: i64) -> Result<Duration> {
    Duration::try_minutes(m).with_context(|| format!("{m} minutes is out of range"))
}

fn deadline_in(now: DateTime<Utc>, m: i64) -> Result<DateTime<Utc>> {
    now.checked_add_signed(minutes(m)?)
        .with_context(|| format!("a deadline {m} minutes from now is out of range"))
}

fn parse_role(s: &str) -> std::result::Result<Role, String> {
    Role::from_str_role(s).ok_or_else(|| format!("unknown role '{s}' (expected tank, heal or dps)"))
}

/// Initialize tracing to stderr; stdout carries command output.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("squadup=info,squadup_core=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
