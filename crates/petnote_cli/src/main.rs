//! `petnote` terminal host.
//!
//! # Responsibility
//! - Resolve storage and logging locations from flags, environment and the
//!   platform data directory.
//! - Wire `petnote_core` to a SQLite snapshot store and an in-process timer.
//! - Print alarms to the terminal when they fire.
//!
//! # Invariants
//! - Commands that enqueue alarms keep the process alive until they fire,
//!   unless `--detach` is given.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;
use petnote_core::db::open_db;
use petnote_core::{
    default_log_level, init_logging, now_epoch_ms, AlarmDelay, AlarmOutcome, AlarmScheduler,
    AlarmStatus, DelayUnit, LogNotifier, Note, NoteKind, Notifier, Pet, PetService,
    SqliteSnapshotStore, TimerExecutor, TimerExecutorConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DB_FILE_NAME: &str = "petnote.sqlite3";
const LOG_DIR_NAME: &str = "logs";

#[derive(Parser)]
#[command(name = "petnote")]
#[command(about = "Keep notes and timed reminders for your pets", version)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "PETNOTE_DB")]
    db: Option<PathBuf>,

    /// Directory for rolling log files
    #[arg(long, global = true, env = "PETNOTE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true, env = "PETNOTE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pets with their notes, newest note first
    Pets,
    /// Register a pet
    AddPet {
        name: String,

        /// Opaque photo reference (path or URI)
        #[arg(long)]
        photo: Option<String>,
    },
    /// Remove a pet and all of its notes
    RemovePet { id: Uuid },
    /// Log a plain note for a pet
    AddNote { pet_id: Uuid, text: String },
    /// Add a note that raises an alarm after a delay
    AddAlarm {
        pet_id: Uuid,
        text: String,

        /// Delay amount
        #[arg(long = "in", value_name = "AMOUNT")]
        amount: u32,

        /// minutes|hours|days
        #[arg(long)]
        unit: DelayUnit,

        /// Exit right away instead of waiting for the alarm
        #[arg(long)]
        detach: bool,
    },
    /// Remove one note from a pet
    RemoveNote { pet_id: Uuid, note_id: Uuid },
    /// Re-arm saved alarms and wait for them to fire
    Watch {
        /// Stop waiting after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = data_dir()?;
    let db_path = cli.db.unwrap_or_else(|| data_dir.join(DB_FILE_NAME));
    let log_dir = absolute(cli.log_dir.unwrap_or_else(|| data_dir.join(LOG_DIR_NAME)))?;
    let log_level = cli
        .log_level
        .unwrap_or_else(|| default_log_level().to_string());
    init_logging(&log_level, &log_dir)
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))?;

    let conn = open_db(&db_path)
        .with_context(|| format!("failed to open database `{}`", db_path.display()))?;
    let store = SqliteSnapshotStore::try_new(&conn)?;
    let executor = Arc::new(
        TimerExecutor::start(Arc::new(print_alarm), TimerExecutorConfig::default())
            .context("failed to start alarm timer")?,
    );
    let mut service = PetService::open(store, AlarmScheduler::new(Arc::clone(&executor)))?;

    if let AfterCommand::WaitForAlarms(timeout) = run(cli.command, &mut service)? {
        let pending = executor.pending();
        if pending > 0 {
            println!("waiting for {pending} alarm(s), Ctrl+C to stop");
            if !executor.wait_idle(timeout) {
                println!("stopped waiting with {} alarm(s) pending", executor.pending());
            }
        }
    }
    Ok(())
}

enum AfterCommand {
    Exit,
    /// Block until queued alarms fire, or the timeout elapses.
    WaitForAlarms(Option<Duration>),
}

fn run(
    command: Commands,
    service: &mut PetService<SqliteSnapshotStore<'_>, Arc<TimerExecutor>>,
) -> Result<AfterCommand> {
    match command {
        Commands::Pets => {
            if service.pets().is_empty() {
                println!("no pets yet");
            }
            for pet in service.pets() {
                print_pet(pet);
            }
        }
        Commands::AddPet { name, photo } => {
            let pet = service.add_pet(name, photo)?;
            println!("{}  {}", pet.id, pet.name);
        }
        Commands::RemovePet { id } => {
            if service.pet(id).is_none() {
                bail!("no pet with id {id}");
            }
            service.remove_pet(id)?;
            println!("removed pet {id}");
        }
        Commands::AddNote { pet_id, text } => {
            let added = service
                .add_note(pet_id, text, NoteKind::Plain)?
                .ok_or_else(|| anyhow!("no pet with id {pet_id}"))?;
            println!("{}  [{}]", added.note.id, added.note.label);
        }
        Commands::AddAlarm {
            pet_id,
            text,
            amount,
            unit,
            detach,
        } => {
            let delay = AlarmDelay::new(amount, unit)?;
            let added = service
                .add_note(pet_id, text, NoteKind::Alarm(delay))?
                .ok_or_else(|| anyhow!("no pet with id {pet_id}"))?;
            println!("{}  [{}]", added.note.id, added.note.label);
            match added.alarm {
                AlarmOutcome::Scheduled(_) if !detach => {
                    return Ok(AfterCommand::WaitForAlarms(None));
                }
                AlarmOutcome::NotScheduled(err) => {
                    eprintln!("alarm saved but not scheduled: {err}");
                }
                _ => {}
            }
        }
        Commands::RemoveNote { pet_id, note_id } => {
            let exists = service
                .pet(pet_id)
                .is_some_and(|pet| pet.note(note_id).is_some());
            if !exists {
                bail!("no note {note_id} on pet {pet_id}");
            }
            service.remove_note(pet_id, note_id)?;
            println!("removed note {note_id}");
        }
        Commands::Watch { timeout_secs } => {
            let report = service.rehydrate_alarms(now_epoch_ms());
            info!(
                "event=cli_watch module=cli status=ok requeued={} skipped_past_due={}",
                report.requeued, report.skipped_past_due
            );
            println!(
                "re-armed {} alarm(s), skipped {} past due, {} failed",
                report.requeued, report.skipped_past_due, report.failed
            );
            return Ok(AfterCommand::WaitForAlarms(timeout_secs.map(Duration::from_secs)));
        }
    }
    Ok(AfterCommand::Exit)
}

fn print_pet(pet: &Pet) {
    let photo = pet
        .photo_ref
        .as_deref()
        .map(|photo| format!("  photo={photo}"))
        .unwrap_or_default();
    println!("{}  {}{}", pet.id, pet.name, photo);
    for note in &pet.notes {
        println!("    {}  [{}]{}  {}", note.id, note.label, alarm_marker(note), note.text);
    }
}

fn alarm_marker(note: &Note) -> &'static str {
    match note.alarm.as_ref().map(|alarm| alarm.status) {
        Some(AlarmStatus::Scheduled) => " (scheduled)",
        Some(AlarmStatus::NotScheduled) => " (not scheduled)",
        None => "",
    }
}

fn print_alarm(pet_name: &str, note_text: &str) {
    println!("\u{23f0} {pet_name}: {note_text}");
    LogNotifier.present(pet_name, note_text);
}

fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "petnote")
        .ok_or_else(|| anyhow!("could not determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(cwd.join(path))
}
