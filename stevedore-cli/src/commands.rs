//! Command implementations.
//!
//! Each subcommand builds an engine, submits one job, and renders the
//! job's event stream. Payload output goes to stdout (or a file);
//! progress and warnings go to stderr so pipelines stay clean.

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use stevedore::config::EngineConfig;
use stevedore::engine::Engine;
use stevedore::error::JobError;
use stevedore::job::{JobEvent, JobHandle, Progress};
use stevedore::protocol::{DirEntry, EntryKind};

use crate::error::CliError;
use crate::{Cli, Command};

/// Name of the bundled file worker binary, expected next to our own.
const FILE_WORKER_BIN: &str = "stevedore-file-worker";

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let engine = build_engine(cli.config.as_deref())?;
    let assume_yes = cli.assume_yes;

    match cli.command {
        Command::Get {
            source,
            output,
            preview,
        } => get(&engine, &source, output, preview, assume_yes).await,
        Command::Cp { source, dest } => {
            transfer(engine.copy(&source, &dest), assume_yes, "copying").await
        }
        Command::Mv { source, dest } => {
            transfer(engine.move_to(&source, &dest), assume_yes, "moving").await
        }
        Command::Rm { target } => {
            let handle = engine.delete(&target).map_err(CliError::Job)?;
            drive(handle, assume_yes, |_| {}).await
        }
        Command::Mkdir { target } => {
            let handle = engine.mkdir(&target).map_err(CliError::Job)?;
            drive(handle, assume_yes, |_| {}).await
        }
        Command::Ls { target, long } => ls(&engine, &target, long, assume_yes).await,
        Command::Stat { target } => stat(&engine, &target, assume_yes).await,
        Command::Put {
            dest,
            input,
            overwrite,
        } => put(&engine, &dest, &input, overwrite, assume_yes).await,
    }
}

fn build_engine(config: Option<&Path>) -> Result<Engine, CliError> {
    let config = match config {
        Some(path) => EngineConfig::load(path).map_err(|e| CliError::Config(e.to_string()))?,
        None => EngineConfig::default(),
    };

    let engine = Engine::new(config);
    if !engine.protocols().supports("file") {
        engine
            .protocols()
            .register_sibling("file", FILE_WORKER_BIN)
            .map_err(|e| {
                CliError::Config(format!("cannot locate the bundled file worker: {e}"))
            })?;
    }
    tracing::debug!(protocols = ?engine.protocols().protocols(), "engine ready");
    Ok(engine)
}

/// Drains a job's events, routing warnings and the terminal outcome;
/// everything else is handed to `on_event`.
async fn drive<F>(mut handle: JobHandle, assume_yes: bool, mut on_event: F) -> Result<(), CliError>
where
    F: FnMut(JobEvent),
{
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Warning { message, reply, .. } => {
                eprintln!("warning: {message}");
                if assume_yes {
                    reply.proceed();
                } else {
                    eprintln!("aborting; pass --assume-yes to continue past warnings");
                    reply.abort();
                }
            }
            JobEvent::Finished { .. } => return Ok(()),
            JobEvent::Failed { error, .. } => return Err(CliError::Job(error)),
            JobEvent::Canceled { .. } => return Err(CliError::Canceled),
            other => on_event(other),
        }
    }
    Err(CliError::Job(JobError::Internal(
        "event stream ended without a terminal notification".into(),
    )))
}

async fn get(
    engine: &Engine,
    source: &str,
    output: Option<PathBuf>,
    preview: Option<usize>,
    assume_yes: bool,
) -> Result<(), CliError> {
    let handle = match preview {
        Some(bytes) => engine.get_with_preview(source, bytes),
        None => engine.get(source),
    }
    .map_err(CliError::Job)?;

    let mut sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(std::fs::File::create(path).map_err(|error| {
            CliError::FileWrite {
                path: path.display().to_string(),
                error,
            }
        })?),
        None => Box::new(std::io::stdout()),
    };
    let show_progress = output.is_some();

    let mut write_error = None;
    let result = drive(handle, assume_yes, |event| match event {
        JobEvent::Data { chunk, .. } => {
            if write_error.is_none() {
                write_error = sink.write_all(&chunk).err();
            }
        }
        JobEvent::Preview {
            data, content_type, ..
        } => {
            if let Some(content_type) = content_type {
                eprintln!("content type: {content_type}");
            }
            if write_error.is_none() {
                write_error = sink.write_all(&data).err();
            }
        }
        JobEvent::ContentType { content_type, .. } => {
            eprintln!("content type: {content_type}");
        }
        JobEvent::Progress { progress, .. } => {
            if show_progress {
                render_progress(&progress);
            }
        }
        JobEvent::Redirected { target, .. } => eprintln!("redirected to {target}"),
        _ => {}
    })
    .await;

    if show_progress {
        eprintln!();
    }
    if let Some(error) = write_error {
        return Err(CliError::FileWrite {
            path: output
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<stdout>".into()),
            error,
        });
    }
    result
}

async fn transfer(
    handle: Result<JobHandle, JobError>,
    assume_yes: bool,
    verb: &str,
) -> Result<(), CliError> {
    let handle = handle.map_err(CliError::Job)?;
    eprintln!("{verb}...");

    let result = drive(handle, assume_yes, |event| {
        if let JobEvent::Progress { progress, .. } = event {
            render_progress(&progress);
        }
    })
    .await;
    eprintln!();
    result
}

async fn put(
    engine: &Engine,
    dest: &str,
    input: &Path,
    overwrite: bool,
    assume_yes: bool,
) -> Result<(), CliError> {
    let payload = std::fs::read(input).map_err(|error| CliError::FileRead {
        path: input.display().to_string(),
        error,
    })?;

    let handle = engine
        .put(dest, Bytes::from(payload), overwrite)
        .map_err(CliError::Job)?;

    let result = drive(handle, assume_yes, |event| {
        if let JobEvent::Progress { progress, .. } = event {
            render_progress(&progress);
        }
    })
    .await;
    eprintln!();
    result
}

async fn ls(engine: &Engine, target: &str, long: bool, assume_yes: bool) -> Result<(), CliError> {
    let handle = engine.list(target).map_err(CliError::Job)?;

    let mut entries = Vec::new();
    drive(handle, assume_yes, |event| {
        if let JobEvent::ListEntry { entry, .. } = event {
            entries.push(entry);
        }
    })
    .await?;

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let mut stdout = std::io::stdout().lock();
    for entry in &entries {
        let line = if long {
            long_format(entry)
        } else {
            entry.name.clone()
        };
        writeln!(stdout, "{line}").map_err(|error| CliError::FileWrite {
            path: "<stdout>".into(),
            error,
        })?;
    }
    Ok(())
}

async fn stat(engine: &Engine, target: &str, assume_yes: bool) -> Result<(), CliError> {
    let handle = engine.stat(target).map_err(CliError::Job)?;

    let mut entry = None;
    drive(handle, assume_yes, |event| {
        if let JobEvent::StatEntry { entry: e, .. } = event {
            entry = Some(e);
        }
    })
    .await?;

    match entry {
        Some(entry) => {
            println!("{}", long_format(&entry));
            Ok(())
        }
        None => Err(CliError::Job(JobError::Internal(
            "worker sent no stat entry".into(),
        ))),
    }
}

fn render_progress(progress: &Progress) {
    if progress.total_bytes > 0 {
        eprint!(
            "\r{:>3}%  {} / {}  {}/s   ",
            progress.percent,
            format_size(progress.processed_bytes),
            format_size(progress.total_bytes),
            format_size(progress.bytes_per_second),
        );
    } else {
        eprint!(
            "\r{} files, {} processed   ",
            progress.processed_files,
            format_size(progress.processed_bytes),
        );
    }
}

fn long_format(entry: &DirEntry) -> String {
    let kind = match entry.kind {
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::File => '-',
        EntryKind::Other => '?',
    };
    let permissions = entry
        .permissions
        .map(|mode| format!("{mode:04o}"))
        .unwrap_or_else(|| "----".into());
    let modified = entry
        .modified
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into());

    format!(
        "{kind}{permissions}  {:>10}  {modified}  {}",
        format_size(entry.size),
        entry.name
    )
}

fn format_size(size: u64) -> String {
    if size >= 1_048_576 {
        format!("{:.1} MB", size as f64 / 1_048_576.0)
    } else if size >= 1024 {
        format!("{:.1} kB", size as f64 / 1024.0)
    } else {
        format!("{size} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_picks_sensible_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(999), "999 B");
        assert_eq!(format_size(2048), "2.0 kB");
        assert_eq!(format_size(3_145_728), "3.0 MB");
    }

    #[test]
    fn long_format_renders_kind_and_permissions() {
        let entry = DirEntry {
            name: "notes.txt".into(),
            kind: EntryKind::File,
            size: 2048,
            modified: Some(1_700_000_000),
            permissions: Some(0o644),
        };
        let line = long_format(&entry);
        assert!(line.starts_with("-0644"));
        assert!(line.contains("2.0 kB"));
        assert!(line.ends_with("notes.txt"));
    }

    #[test]
    fn long_format_handles_missing_metadata() {
        let entry = DirEntry {
            name: "mystery".into(),
            kind: EntryKind::Other,
            size: 0,
            modified: None,
            permissions: None,
        };
        let line = long_format(&entry);
        assert!(line.starts_with("?----"));
        assert!(line.contains('-'));
    }
}
