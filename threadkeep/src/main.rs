//! threadkeep - browse, tag, and search Cursor and Claude Code chat history
//!
//! Every command goes through [`SessionService`], so listing and lookup
//! trigger the same auto-sync a long-running front end would get.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/threadkeep/metadata.db (~/.local/share/threadkeep/metadata.db)
//! - Logs: $XDG_STATE_HOME/threadkeep/threadkeep.log (~/.local/state/threadkeep/threadkeep.log)
//! - Config: $XDG_CONFIG_HOME/threadkeep/config.toml (~/.config/threadkeep/config.toml)

mod message_format;
mod process_lock;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_sync_guard;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use threadkeep_core::format::format_relative_time_opt;
use threadkeep_core::{
    Config, ListOptions, SearchOptions, SessionMetadata, SessionService, SortOrder, Source,
    Statistics, SyncReport, Transcript,
};

#[derive(Parser)]
#[command(name = "threadkeep")]
#[command(about = "Browse, tag, and search Cursor and Claude Code chat history")]
#[command(version)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Metadata database to use instead of the XDG default
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Skip the automatic sync before reads
    #[arg(long, global = true)]
    no_sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions
    List(FilterArgs),
    /// Show a session's metadata and transcript
    Show {
        /// Nickname, composite id, or id prefix
        id: String,
        /// Include tool calls and results
        #[arg(long)]
        tools: bool,
    },
    /// Search nicknames, tags, previews and project names
    Search {
        query: String,
        #[arg(long)]
        case_sensitive: bool,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Set or clear a session's nickname
    Nick {
        id: String,
        /// New nickname (omit with --clear)
        #[arg(required_unless_present = "clear", conflicts_with = "clear")]
        name: Option<String>,
        #[arg(long)]
        clear: bool,
    },
    /// Add a tag to a session
    Tag { id: String, tag: String },
    /// Remove a tag from a session
    Untag { id: String, tag: String },
    /// List projects with session counts
    Projects,
    /// List tags with session counts
    Tags,
    /// Show store and source statistics
    Stats,
    /// Import new and changed sessions now
    Sync {
        /// Cap sessions examined per source
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Forget a session's nickname, tags and metadata
    Delete { id: String },
}

#[derive(Args)]
struct FilterArgs {
    /// Project path or name
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    /// cursor or claude
    #[arg(long)]
    source: Option<Source>,
    /// Only sessions with at least one tag
    #[arg(long, conflicts_with = "untagged")]
    tagged: bool,
    /// Only sessions without tags
    #[arg(long)]
    untagged: bool,
    /// newest, oldest or most-messages
    #[arg(long, default_value = "newest")]
    sort: SortOrder,
    #[arg(long)]
    limit: Option<usize>,
}

impl FilterArgs {
    fn to_options(&self) -> ListOptions {
        let has_tags = match (self.tagged, self.untagged) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        ListOptions {
            project: self.project.clone(),
            tag: self.tag.clone(),
            source: self.source,
            has_tags,
            sort: self.sort,
            limit: self.limit,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;
    if cli.no_sync {
        config.sync.auto_sync = false;
    }

    let _log_guard =
        threadkeep_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = cli.db.clone().unwrap_or_else(Config::database_path);
    tracing::info!(path = %db_path.display(), "threadkeep starting");

    // Explicit syncs are exclusive per database; held until the process exits.
    let _sync_guard = match cli.command {
        Command::Sync { .. } => {
            Some(acquire_sync_guard(&db_path).context("failed to acquire sync lock")?)
        }
        _ => None,
    };

    let mut service =
        SessionService::open_at(config, &db_path).context("failed to open metadata store")?;
    let result = dispatch(&mut service, &cli);
    let closed = service.close().context("failed to close metadata store");
    result.and(closed)
}

fn dispatch(service: &mut SessionService, cli: &Cli) -> Result<()> {
    let json = cli.json;
    match &cli.command {
        Command::List(filter) => {
            let sessions = service.list(&filter.to_options())?;
            emit_sessions(&sessions, json)
        }
        Command::Show { id, tools } => {
            let transcript = service.messages(id, *tools)?;
            if json {
                return print_json(&transcript);
            }
            print_transcript(&transcript);
            Ok(())
        }
        Command::Search {
            query,
            case_sensitive,
            filter,
        } => {
            let options = SearchOptions {
                list: filter.to_options(),
                case_sensitive: case_sensitive.then_some(true),
            };
            let sessions = service.search(query, &options)?;
            emit_sessions(&sessions, json)
        }
        Command::Nick { id, name, clear } => {
            let meta = match name {
                Some(name) if !*clear => service.set_nickname(id, name)?,
                _ => service.clear_nickname(id)?,
            };
            emit_one(&meta, json)
        }
        Command::Tag { id, tag } => {
            let meta = service.add_tag(id, tag)?;
            emit_one(&meta, json)
        }
        Command::Untag { id, tag } => {
            let meta = service.remove_tag(id, tag)?;
            emit_one(&meta, json)
        }
        Command::Projects => {
            let projects = service.projects()?;
            if json {
                return print_json(&projects);
            }
            for project in &projects {
                println!("{:>5}  {}  {}", project.session_count, project.name, project.path);
            }
            Ok(())
        }
        Command::Tags => {
            let tags = service.tags()?;
            if json {
                return print_json(&tags);
            }
            for tag in &tags {
                println!("{:>5}  {}", tag.session_count, tag.tag);
            }
            Ok(())
        }
        Command::Stats => {
            service.ensure_fresh(false)?;
            let stats = service.statistics()?;
            if json {
                return print_json(&stats);
            }
            print_statistics(&stats);
            Ok(())
        }
        Command::Sync { limit } => {
            let report = run_sync(service, *limit, json)?;
            if json {
                return print_json(&report);
            }
            print_sync_report(&report);
            Ok(())
        }
        Command::Delete { id } => {
            let meta = service.delete(id)?;
            if json {
                return print_json(&meta);
            }
            println!("Deleted metadata for {}", meta.id);
            Ok(())
        }
    }
}

/// Bulk sync with a progress bar on stderr.
fn run_sync(service: &mut SessionService, limit: Option<usize>, quiet: bool) -> Result<SyncReport> {
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let report = service
        .sync_with_progress(limit, |current, total, id| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
            pb.set_message(id.to_string());
        })
        .context("sync failed")?;

    pb.finish_and_clear();

    tracing::info!(
        examined = report.examined,
        synced = report.synced,
        failed = report.failed,
        "threadkeep sync complete"
    );
    Ok(report)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to encode JSON")?;
    println!("{rendered}");
    Ok(())
}

fn emit_sessions(sessions: &[SessionMetadata], json: bool) -> Result<()> {
    if json {
        return print_json(sessions);
    }
    if sessions.is_empty() {
        println!("No sessions found.");
    }
    for meta in sessions {
        println!("{}", message_format::session_row(meta));
    }
    Ok(())
}

fn emit_one(meta: &SessionMetadata, json: bool) -> Result<()> {
    if json {
        return print_json(meta);
    }
    println!("{}", message_format::session_row(meta));
    Ok(())
}

fn print_transcript(transcript: &Transcript) {
    let meta = &transcript.metadata;
    println!("Session:   {}", meta.id);
    if let Some(nickname) = &meta.nickname {
        println!("Nickname:  {nickname}");
    }
    if let Some(title) = &transcript.session.title {
        println!("Title:     {title}");
    }
    if let Some(path) = &meta.project_path {
        println!("Project:   {path}");
    }
    if meta.multi_workspace {
        println!("Workspaces: {}", meta.workspace_paths.join(", "));
    }
    if !meta.tags.is_empty() {
        let tags: Vec<&str> = meta.tags.iter().map(String::as_str).collect();
        println!("Tags:      {}", tags.join(", "));
    }
    println!("Created:   {}", format_relative_time_opt(meta.created_at));
    println!();

    for msg in &transcript.messages {
        println!("{}", message_format::role_prefix(msg));
        println!("{}", message_format::detail_content(msg));
        println!();
    }
}

fn print_statistics(stats: &Statistics) {
    let live = |count: Option<usize>| {
        count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unavailable".to_string())
    };
    let store = &stats.store;
    println!("Sessions:        {}", store.total_sessions);
    println!("  Cursor:        {}", store.cursor_sessions);
    println!("  Claude Code:   {}", store.claude_sessions);
    println!("With project:    {}", store.with_project);
    println!("With nickname:   {}", store.with_nickname);
    println!("With tags:       {}", store.with_tags);
    println!("Distinct tags:   {}", store.distinct_tags);
    println!("Projects:        {}", store.distinct_projects);
    println!("Live Cursor:     {}", live(stats.cursor_live_sessions));
    println!("Live Claude:     {}", live(stats.claude_live_sessions));
    println!(
        "Last sync:       {}",
        format_relative_time_opt(stats.last_bulk_sync)
    );
}

fn print_sync_report(report: &SyncReport) {
    println!("Sync complete:");
    println!("  Examined:      {}", report.examined);
    println!("  Created:       {}", report.created);
    println!("  Updated:       {}", report.updated);
    println!("  Up to date:    {}", report.skipped_fresh);
    println!("  Empty:         {}", report.skipped_empty);
    println!("  Failed:        {}", report.failed);
    for (id, message) in &report.errors {
        println!("    {id}: {message}");
    }
}
