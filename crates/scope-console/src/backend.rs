//! Local fallback source: tails the swarm runner's output log and feeds
//! input back through a companion file. Used when the push socket is down
//! or was never enabled.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use scope_sync::{PollBatch, PollError, PollSource};
use tokio::io::AsyncWriteExt;

/// Reads incrementally from `<state_dir>/<session>.out`. Input lines are
/// appended to `<state_dir>/<session>.in`, which the runner watches. The
/// runner keeps a `<session>.pid` marker alive while its process runs.
pub struct FileTailSource {
    output_path: PathBuf,
    input_path: PathBuf,
    pid_path: PathBuf,
}

impl FileTailSource {
    pub fn new(state_dir: &Path, session_id: &str) -> Self {
        Self {
            output_path: state_dir.join(format!("{session_id}.out")),
            input_path: state_dir.join(format!("{session_id}.in")),
            pid_path: state_dir.join(format!("{session_id}.pid")),
        }
    }
}

impl PollSource for FileTailSource {
    fn poll(&mut self, offset: u64) -> BoxFuture<'_, Result<PollBatch, PollError>> {
        async move {
            let data = match tokio::fs::read(&self.output_path).await {
                Ok(data) => data,
                // No output yet is a quiet poll, not a failure.
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Ok(PollBatch {
                        lines: Vec::new(),
                        next_offset: offset,
                    });
                }
                Err(err) => return Err(PollError::Io(err)),
            };
            // A shorter file means the runner rotated or truncated it.
            // Start over rather than serving a garbage slice.
            let offset = if (data.len() as u64) < offset { 0 } else { offset };
            let tail = &data[offset as usize..];

            // Only hand out whole lines. A trailing partial line stays
            // unconsumed and is re-read once its newline lands.
            let consumed = match tail.iter().rposition(|b| *b == b'\n') {
                Some(pos) => pos + 1,
                None => {
                    return Ok(PollBatch {
                        lines: Vec::new(),
                        next_offset: offset,
                    });
                }
            };
            let lines = String::from_utf8_lossy(&tail[..consumed])
                .lines()
                .map(|line| line.trim_end_matches('\r').to_string())
                .collect();
            Ok(PollBatch {
                lines,
                next_offset: offset + consumed as u64,
            })
        }
        .boxed()
    }

    fn send(&mut self, text: &str) -> BoxFuture<'_, Result<(), PollError>> {
        let line = format!("{text}\n");
        async move {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.input_path)
                .await
                .map_err(PollError::Io)?;
            file.write_all(line.as_bytes()).await.map_err(PollError::Io)?;
            file.flush().await.map_err(PollError::Io)?;
            Ok(())
        }
        .boxed()
    }

    fn process_alive(&self) -> bool {
        self.pid_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, FileTailSource) {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FileTailSource::new(dir.path(), "swarm-1");
        (dir, source)
    }

    #[tokio::test]
    async fn missing_output_file_is_a_quiet_poll() {
        let (_dir, mut source) = fixture();
        let batch = source.poll(0).await.expect("poll");
        assert!(batch.lines.is_empty());
        assert_eq!(batch.next_offset, 0);
    }

    #[tokio::test]
    async fn reads_whole_lines_and_advances_offset() {
        let (dir, mut source) = fixture();
        std::fs::write(dir.path().join("swarm-1.out"), b"one\ntwo\npartial").expect("write");

        let batch = source.poll(0).await.expect("poll");
        assert_eq!(batch.lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(batch.next_offset, 8);

        // Partial line stays put until terminated.
        let batch = source.poll(8).await.expect("poll");
        assert!(batch.lines.is_empty());
        assert_eq!(batch.next_offset, 8);

        std::fs::write(dir.path().join("swarm-1.out"), b"one\ntwo\npartial done\n")
            .expect("write");
        let batch = source.poll(8).await.expect("poll");
        assert_eq!(batch.lines, vec!["partial done".to_string()]);
        assert_eq!(batch.next_offset, 21);
    }

    #[tokio::test]
    async fn truncated_file_restarts_from_zero() {
        let (dir, mut source) = fixture();
        std::fs::write(dir.path().join("swarm-1.out"), b"fresh\n").expect("write");

        let batch = source.poll(100).await.expect("poll");
        assert_eq!(batch.lines, vec!["fresh".to_string()]);
        assert_eq!(batch.next_offset, 6);
    }

    #[tokio::test]
    async fn send_appends_to_input_file() {
        let (dir, mut source) = fixture();
        assert!(!source.process_alive());
        std::fs::write(dir.path().join("swarm-1.pid"), b"1234").expect("write");
        assert!(source.process_alive());

        source.send("status").await.expect("send");
        source.send("pause coder").await.expect("send");
        let input = std::fs::read_to_string(dir.path().join("swarm-1.in")).expect("read");
        assert_eq!(input, "status\npause coder\n");
    }
}
