use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::fxforge_dir;
use super::generate::GenerationObserver;
use crate::stream::GeneratedFile;

const MAX_SESSIONS: usize = 10;

/// `~/.fxforge/logs`
pub fn logs_dir() -> Option<PathBuf> {
    fxforge_dir().map(|d| d.join("logs"))
}

/// Writes a timestamped transcript of a generation to `latest.log`.
///
/// Lines are pushed onto a channel; a background task owns the file.
/// The previous `latest.log` is rotated to `session-<timestamp>.log` and at
/// most ten rotated sessions are kept.
pub struct TranscriptLogger {
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
    path: PathBuf,
}

impl TranscriptLogger {
    pub async fn new(logs_dir: &Path) -> Option<Self> {
        if let Err(e) = tokio::fs::create_dir_all(logs_dir).await {
            warn!(dir = %logs_dir.display(), error = %e, "cannot create logs directory");
            return None;
        }

        let latest = logs_dir.join("latest.log");
        if latest.exists() {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
            let rotated = logs_dir.join(format!("session-{stamp}.log"));
            let _ = tokio::fs::rename(&latest, &rotated).await;
        }
        cleanup_old_sessions(logs_dir).await;

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&latest)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %latest.display(), error = %e, "cannot open transcript");
                return None;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(writer_task(file, rx));
        let _ = tx.send(format!("=== fxforge session {} ===\n\n", now()));

        debug!(path = %latest.display(), "transcript started");
        Some(Self {
            tx,
            writer,
            path: latest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wraps an observer so every event it sees is also written here.
    pub fn observe<O: GenerationObserver>(&self, inner: O) -> Transcript<O> {
        Transcript {
            tx: self.tx.clone(),
            pending: String::new(),
            inner,
        }
    }

    /// Closes the transcript once every [`Transcript`] has been dropped and
    /// waits for the footer to reach disk.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            warn!(error = %e, "transcript writer did not finish cleanly");
        }
    }
}

fn send_log(tx: &mpsc::UnboundedSender<String>, prefix: &str, line: &str) {
    let _ = tx.send(format!("[{}] [{prefix}] {line}\n", now()));
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn writer_task(file: tokio::fs::File, mut rx: mpsc::UnboundedReceiver<String>) {
    let mut writer = tokio::io::BufWriter::new(file);

    while let Some(line) = rx.recv().await {
        let _ = writer.write_all(line.as_bytes()).await;
        let _ = writer.flush().await;
    }

    let footer = format!("\n=== session ended {} ===\n", now());
    let _ = writer.write_all(footer.as_bytes()).await;
    let _ = writer.flush().await;
}

async fn cleanup_old_sessions(logs_dir: &Path) {
    let mut entries = match tokio::fs::read_dir(logs_dir).await {
        Ok(rd) => rd,
        Err(_) => return,
    };

    let mut sessions: Vec<PathBuf> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("session-") && name.ends_with(".log") {
            sessions.push(entry.path());
        }
    }

    // Timestamps sort lexicographically.
    sessions.sort();
    let excess = sessions.len().saturating_sub(MAX_SESSIONS);
    for old in sessions.drain(..excess) {
        let _ = tokio::fs::remove_file(&old).await;
    }
}

/// Observer decorator that records model output line by line, every file
/// and the outcome, then forwards the event unchanged.
pub struct Transcript<O> {
    tx: mpsc::UnboundedSender<String>,
    pending: String,
    inner: O,
}

impl<O> Transcript<O> {
    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            send_log(&self.tx, "model", &line);
        }
    }
}

impl<O: GenerationObserver> GenerationObserver for Transcript<O> {
    fn on_chunk(&mut self, text: &str) {
        self.pending.push_str(text);
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            send_log(&self.tx, "model", line.trim_end_matches(['\n', '\r']));
        }
        self.inner.on_chunk(text);
    }

    fn on_file(&mut self, file: GeneratedFile) {
        send_log(
            &self.tx,
            "file",
            &format!(
                "{} ({:?}, {} bytes)",
                file.path,
                file.category,
                file.content.len()
            ),
        );
        self.inner.on_file(file);
    }

    fn on_complete(&mut self) {
        self.flush_pending();
        send_log(&self.tx, "done", "generation complete");
        self.inner.on_complete();
    }

    fn on_error(&mut self, message: &str) {
        self.flush_pending();
        send_log(&self.tx, "error", message);
        self.inner.on_error(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::generate::GenerationEvent;

    #[tokio::test]
    async fn test_transcript_records_and_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TranscriptLogger::new(dir.path()).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut transcript = logger.observe(tx);
        transcript.on_chunk("Sure.\n### FILE: a.l");
        transcript.on_chunk("ua\nprint(1)\n### END FILE");
        transcript.on_file(GeneratedFile::new("a.lua", "print(1)"));
        transcript.on_complete();
        drop(transcript);

        let path = logger.path().to_path_buf();
        logger.close().await;

        let log = std::fs::read_to_string(path).unwrap();
        assert!(log.starts_with("=== fxforge session "));
        assert!(log.contains("[model] Sure.\n"));
        assert!(log.contains("[model] ### FILE: a.lua\n"));
        assert!(log.contains("[model] ### END FILE\n"));
        assert!(log.contains("[file] a.lua (Script, 8 bytes)"));
        assert!(log.contains("[done] generation complete"));
        assert!(log.contains("=== session ended "));

        let mut forwarded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            forwarded.push(event);
        }
        assert_eq!(forwarded.len(), 4);
        assert_eq!(forwarded.last(), Some(&GenerationEvent::Complete));
    }

    #[tokio::test]
    async fn test_error_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TranscriptLogger::new(dir.path()).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut transcript = logger.observe(tx);
        transcript.on_chunk("partial");
        transcript.on_error("Failed to start generation");
        drop(transcript);

        let path = logger.path().to_path_buf();
        logger.close().await;

        let log = std::fs::read_to_string(path).unwrap();
        assert!(log.contains("[model] partial\n"));
        assert!(log.contains("[error] Failed to start generation"));
    }

    #[tokio::test]
    async fn test_rotates_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("latest.log"), "old run").unwrap();

        let logger = TranscriptLogger::new(dir.path()).await.unwrap();
        logger.close().await;

        let rotated: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("session-"))
            .collect();
        assert_eq!(rotated.len(), 1);
        let old = std::fs::read_to_string(dir.path().join(&rotated[0])).unwrap();
        assert_eq!(old, "old run");
    }

    #[tokio::test]
    async fn test_keeps_ten_sessions() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            let name = format!("session-20260101T0000{i:02}.000Z.log");
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        cleanup_old_sessions(dir.path()).await;

        let mut left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left.len(), 11);
        assert!(left.contains(&"notes.txt".to_string()));
        assert!(!left.contains(&"session-20260101T000000.000Z.log".to_string()));
        assert!(!left.contains(&"session-20260101T000001.000Z.log".to_string()));
        assert!(left.contains(&"session-20260101T000002.000Z.log".to_string()));
    }
}
