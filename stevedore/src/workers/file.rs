//! The built-in `file` protocol worker.
//!
//! Serves local filesystem operations over the worker wire contract.
//! Ships as the `stevedore-file-worker` binary and doubles as the
//! reference implementation for worker authors.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, UNIX_EPOCH};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as SystemCommand;

use super::{ProtocolWorker, WorkerIo};
use crate::locator::{Locator, FILE_PROTOCOL};
use crate::protocol::{Command, DirEntry, EntryKind, WireError, WorkerMessage, DATA_CHUNK_SIZE};

/// Minimum interval between speed reports during a transfer.
const SPEED_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Local filesystem worker.
#[derive(Debug, Default)]
pub struct FileWorker;

impl FileWorker {
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolWorker for FileWorker {
    async fn handle(&mut self, command: Command, io: &mut WorkerIo) -> Result<(), WireError> {
        match command {
            Command::Get { target } => get(&target, io).await,
            Command::Put {
                target,
                size,
                overwrite,
            } => put(&target, size, overwrite, io).await,
            Command::Copy { source, dest } => transfer(&source, &dest, false, io).await,
            Command::Move { source, dest } => transfer(&source, &dest, true, io).await,
            Command::Delete { target } => delete(&target, io).await,
            Command::Mkdir { target } => mkdir(&target, io).await,
            Command::List { target } => list(&target, io).await,
            Command::Stat { target } => stat(&target, io).await,
            Command::Mount {
                read_only,
                fstype,
                device,
                point,
            } => mount(read_only, fstype.as_deref(), &device, &point, io).await,
            Command::Unmount { point } => unmount(&point, io).await,
            Command::Special { .. } => {
                io.error("file worker does not implement special commands", false)
                    .await
            }
            // Upload frames are consumed inside put(); seeing one here
            // means the two sides lost sync.
            Command::Data(_) | Command::DataEnd | Command::WarningAnswer { .. } => {
                io.error("unexpected upload frame outside an upload", true)
                    .await
            }
        }
    }
}

fn local_path(target: &str) -> Result<PathBuf, String> {
    let locator = Locator::parse(target).map_err(|e| e.to_string())?;
    if locator.protocol() != FILE_PROTOCOL {
        return Err(format!(
            "file worker cannot serve '{}' targets",
            locator.protocol()
        ));
    }
    Ok(PathBuf::from(locator.path()))
}

async fn get(target: &str, io: &mut WorkerIo) -> Result<(), WireError> {
    let path = match local_path(target) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };

    let mut file = match fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            return io
                .error(&format!("cannot open {}: {e}", path.display()), false)
                .await
        }
    };
    let metadata = match file.metadata().await {
        Ok(metadata) => metadata,
        Err(e) => {
            return io
                .error(&format!("cannot stat {}: {e}", path.display()), false)
                .await
        }
    };

    io.total_size(metadata.len()).await?;
    if let Some(content_type) = content_type_for(&path) {
        io.content_type(content_type).await?;
    }

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut processed = 0u64;
    let mut buf = vec![0u8; DATA_CHUNK_SIZE];
    loop {
        let read = match file.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                return io
                    .error(&format!("read failed on {}: {e}", path.display()), false)
                    .await
            }
        };
        if read == 0 {
            break;
        }
        processed += read as u64;
        io.data(buf[..read].to_vec()).await?;
        io.processed_size(processed).await?;

        if last_report.elapsed() >= SPEED_REPORT_INTERVAL {
            let elapsed = started.elapsed().as_secs().max(1);
            io.speed(processed / elapsed).await?;
            last_report = Instant::now();
        }
    }

    io.finished().await
}

async fn put(target: &str, size: u64, overwrite: bool, io: &mut WorkerIo) -> Result<(), WireError> {
    let path = match local_path(target) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };

    if !overwrite && fs::try_exists(&path).await.unwrap_or(false) {
        let proceed = io
            .warn(&format!("{} exists, overwrite?", path.display()))
            .await?;
        if !proceed {
            // The engine aborts the job; nothing was touched.
            return Ok(());
        }
    }

    let mut file = match fs::File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            return io
                .error(&format!("cannot create {}: {e}", path.display()), false)
                .await
        }
    };

    io.total_size(size).await?;
    io.send(&WorkerMessage::CanResume(false)).await?;

    let mut written = 0u64;
    io.send(&WorkerMessage::DataRequest).await?;
    loop {
        match io.next_command().await? {
            Command::Data(chunk) => {
                if let Err(e) = file.write_all(&chunk).await {
                    // Upload frames may still be in flight; this worker's
                    // stream is no longer in a defined state.
                    return io
                        .error(&format!("write failed on {}: {e}", path.display()), true)
                        .await;
                }
                written += chunk.len() as u64;
                io.processed_size(written).await?;
                io.send(&WorkerMessage::DataRequest).await?;
            }
            Command::DataEnd => {
                if let Err(e) = file.flush().await {
                    return io
                        .error(&format!("flush failed on {}: {e}", path.display()), false)
                        .await;
                }
                break;
            }
            other => {
                return io
                    .error(
                        &format!("unexpected {} during upload", other.name()),
                        true,
                    )
                    .await
            }
        }
    }

    io.finished().await
}

async fn transfer(
    source: &str,
    dest: &str,
    remove_source: bool,
    io: &mut WorkerIo,
) -> Result<(), WireError> {
    let src_path = match local_path(source) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };
    let dst_path = match local_path(dest) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };

    // A move within one filesystem is a rename; cross-device moves fall
    // back to copy + delete.
    if remove_source && fs::rename(&src_path, &dst_path).await.is_ok() {
        io.total_files(1).await?;
        io.processed_files(1).await?;
        return io.finished().await;
    }

    let mut src = match fs::File::open(&src_path).await {
        Ok(file) => file,
        Err(e) => {
            return io
                .error(&format!("cannot open {}: {e}", src_path.display()), false)
                .await
        }
    };
    let total = match src.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            return io
                .error(&format!("cannot stat {}: {e}", src_path.display()), false)
                .await
        }
    };
    let mut dst = match fs::File::create(&dst_path).await {
        Ok(file) => file,
        Err(e) => {
            return io
                .error(&format!("cannot create {}: {e}", dst_path.display()), false)
                .await
        }
    };

    io.total_size(total).await?;
    io.total_files(1).await?;

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut processed = 0u64;
    let mut buf = vec![0u8; DATA_CHUNK_SIZE];
    loop {
        let read = match src.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                return io
                    .error(&format!("read failed on {}: {e}", src_path.display()), false)
                    .await
            }
        };
        if read == 0 {
            break;
        }
        if let Err(e) = dst.write_all(&buf[..read]).await {
            return io
                .error(
                    &format!("write failed on {}: {e}", dst_path.display()),
                    false,
                )
                .await;
        }
        processed += read as u64;
        io.processed_size(processed).await?;

        if last_report.elapsed() >= SPEED_REPORT_INTERVAL {
            let elapsed = started.elapsed().as_secs().max(1);
            io.speed(processed / elapsed).await?;
            last_report = Instant::now();
        }
    }
    if let Err(e) = dst.flush().await {
        return io
            .error(&format!("flush failed on {}: {e}", dst_path.display()), false)
            .await;
    }

    if remove_source {
        if let Err(e) = fs::remove_file(&src_path).await {
            return io
                .error(
                    &format!("copied, but removing {} failed: {e}", src_path.display()),
                    false,
                )
                .await;
        }
    }

    io.processed_files(1).await?;
    io.finished().await
}

async fn delete(target: &str, io: &mut WorkerIo) -> Result<(), WireError> {
    let path = match local_path(target) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };

    let metadata = match fs::symlink_metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            return io
                .error(&format!("cannot stat {}: {e}", path.display()), false)
                .await
        }
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir(&path).await
    } else {
        fs::remove_file(&path).await
    };
    if let Err(e) = removed {
        return io
            .error(&format!("cannot delete {}: {e}", path.display()), false)
            .await;
    }

    io.processed_files(1).await?;
    io.finished().await
}

async fn mkdir(target: &str, io: &mut WorkerIo) -> Result<(), WireError> {
    let path = match local_path(target) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };

    if let Err(e) = fs::create_dir(&path).await {
        return io
            .error(
                &format!("cannot create directory {}: {e}", path.display()),
                false,
            )
            .await;
    }
    io.finished().await
}

async fn list(target: &str, io: &mut WorkerIo) -> Result<(), WireError> {
    let path = match local_path(target) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };

    let mut dir = match fs::read_dir(&path).await {
        Ok(dir) => dir,
        Err(e) => {
            return io
                .error(&format!("cannot list {}: {e}", path.display()), false)
                .await
        }
    };

    let mut count = 0u64;
    loop {
        let entry = match dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                return io
                    .error(&format!("listing {} failed: {e}", path.display()), false)
                    .await
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        match entry.metadata().await {
            Ok(metadata) => {
                io.list_entry(entry_from_metadata(name, &metadata)).await?;
                count += 1;
            }
            // An entry vanishing mid-listing is not worth failing over.
            Err(e) => tracing::debug!(entry = %name, error = %e, "skipping unreadable entry"),
        }
    }

    io.total_files(count).await?;
    io.finished().await
}

async fn stat(target: &str, io: &mut WorkerIo) -> Result<(), WireError> {
    let path = match local_path(target) {
        Ok(path) => path,
        Err(message) => return io.error(&message, false).await,
    };

    let metadata = match fs::symlink_metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            return io
                .error(&format!("cannot stat {}: {e}", path.display()), false)
                .await
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    io.stat_entry(entry_from_metadata(name, &metadata)).await?;
    io.finished().await
}

async fn mount(
    read_only: bool,
    fstype: Option<&str>,
    device: &str,
    point: &str,
    io: &mut WorkerIo,
) -> Result<(), WireError> {
    let mut command = SystemCommand::new("mount");
    if read_only {
        command.arg("-r");
    }
    if let Some(fstype) = fstype {
        command.args(["-t", fstype]);
    }
    command.arg(device).arg(point);

    run_system(command, io).await
}

async fn unmount(point: &str, io: &mut WorkerIo) -> Result<(), WireError> {
    let mut command = SystemCommand::new("umount");
    command.arg(point);
    run_system(command, io).await
}

async fn run_system(mut command: SystemCommand, io: &mut WorkerIo) -> Result<(), WireError> {
    match command.output().await {
        Ok(output) if output.status.success() => io.finished().await,
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            io.error(stderr.trim(), false).await
        }
        Err(e) => io.error(&format!("cannot run mount tool: {e}"), false).await,
    }
}

fn entry_from_metadata(name: String, metadata: &std::fs::Metadata) -> DirEntry {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());

    #[cfg(unix)]
    let permissions = {
        use std::os::unix::fs::PermissionsExt;
        Some(metadata.permissions().mode() & 0o7777)
    };
    #[cfg(not(unix))]
    let permissions = None;

    DirEntry {
        name,
        kind,
        size: metadata.len(),
        modified,
        permissions,
    }
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "html" | "htm" => "text/html",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(content_type)
}
