//! Diktant application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Open the progress database (in-memory fallback)
//! 3. Wire lesson content, speech synthesis and audio output into a
//!    dictation room
//! 4. Run the terminal session, or list stored progress

mod cli;
mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use diktant_audio::{AudioOutput, MockAudioOutput, PlaybackController};
use diktant_content::{CachedSynthesizer, JsonLessonSource, UnavailableSynthesizer};
use diktant_core::config::DiktantConfig;
use diktant_core::error::DiktantError;
use diktant_dictation::{Collaborators, DictationRoom, RoomOptions};
use diktant_storage::{Database, KeyValueStore, MemoryStore, ProgressStore};

use cli::{CliArgs, Command};
use terminal::TerminalNavigator;

/// Expand a leading `~` to the user's home directory.
fn resolve_path(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

/// Open the progress store. Falls back to memory, so the session still runs
/// when the database cannot be opened; progress is then lost on exit.
fn open_progress(config: &DiktantConfig) -> Arc<ProgressStore> {
    let data_dir = resolve_path(&config.general.data_dir);
    let db_path = data_dir.join(&config.progress.db_file);
    let opened = std::fs::create_dir_all(&data_dir)
        .map_err(DiktantError::from)
        .and_then(|_| Database::new(&db_path));

    let backend: Arc<dyn KeyValueStore> = match opened {
        Ok(db) => {
            tracing::info!(path = %db_path.display(), "Progress database opened");
            Arc::new(db)
        }
        Err(e) => {
            tracing::warn!(
                path = %db_path.display(),
                error = %e,
                "Progress database unavailable, progress will not be saved"
            );
            Arc::new(MemoryStore::new())
        }
    };
    Arc::new(ProgressStore::new(backend, config.progress.storage_key.clone()))
}

async fn practice(config: &DiktantConfig, lesson_id: &str) -> Result<(), DiktantError> {
    match config.audio.backend.as_str() {
        #[cfg(feature = "cpal")]
        "cpal" => run_practice(config, lesson_id, diktant_audio::CpalAudioOutput::new()).await,
        "mock" => run_practice(config, lesson_id, MockAudioOutput::new()).await,
        other => {
            tracing::warn!(backend = other, "Audio backend not available, playing silently");
            run_practice(config, lesson_id, MockAudioOutput::new()).await
        }
    }
}

async fn run_practice<O: AudioOutput + 'static>(
    config: &DiktantConfig,
    lesson_id: &str,
    output: O,
) -> Result<(), DiktantError> {
    let lessons_path = resolve_path(&config.content.lessons_path);
    tracing::info!(path = %lessons_path.display(), "Using lesson data");

    let synthesizer = Arc::new(CachedSynthesizer::new(
        UnavailableSynthesizer,
        config.synthesis.cache_capacity,
    ));

    let mut room = DictationRoom::new(
        lesson_id,
        Collaborators {
            lessons: Arc::new(JsonLessonSource::new(lessons_path)),
            synthesizer: Arc::clone(&synthesizer),
            playback: Arc::new(PlaybackController::new(output)),
            progress: open_progress(config),
            navigator: Arc::new(TerminalNavigator),
        },
        RoomOptions::from_config(config),
    );
    tracing::info!(session_id = %room.session_id(), lesson_id, "Dictation session starting");

    let result = terminal::run_session(&mut room).await;
    let stats = synthesizer.stats();
    tracing::debug!(
        hits = stats.hits,
        misses = stats.misses,
        entries = stats.entries,
        "Synthesis cache at session end"
    );
    result
}

fn list_progress(config: &DiktantConfig) {
    let records = open_progress(config).all();
    if records.is_empty() {
        println!("No progress recorded yet.");
        return;
    }
    println!("{:<8} {:>5}  {:<6} {:<12} {}", "LESSON", "DONE", "LINE", "STATUS", "UPDATED");
    for (lesson_id, record) in records {
        let status = if record.is_completed { "completed" } else { "in progress" };
        let updated = record
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:>4}%  {:<6} {:<12} {}",
            lesson_id,
            record.percentage,
            record.current_index + 1,
            status,
            updated
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = DiktantConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(lessons) = args.resolve_lessons_path() {
        config.content.lessons_path = lessons;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing goes to stderr so it does not interleave with the prompt.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Diktant v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    match args.command {
        Command::Practice { lesson_id } => practice(&config, &lesson_id).await?,
        Command::Progress => list_progress(&config),
    }
    Ok(())
}
