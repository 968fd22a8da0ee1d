//! Spawning the measurement utility.
//!
//! A [`Launcher`] turns an [`Invocation`] into a [`LaunchedProcess`]: two text
//! chunk streams and a future for the exit code. The coordinator only sees
//! this seam, so tests substitute [`crate::fakes::ScriptedLauncher`].

use std::io;
use std::process::Stdio;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::error::LaunchError;
use crate::invocation::Invocation;

/// Decoded text in arrival order. Chunk boundaries carry no meaning.
pub type ChunkStream = BoxStream<'static, io::Result<String>>;

/// Resolves once the process has exited.
pub type ExitFuture = BoxFuture<'static, io::Result<i32>>;

const READ_CHUNK: usize = 4096;

pub struct LaunchedProcess {
    pub pid: Option<u32>,
    pub stdout: ChunkStream,
    pub stderr: ChunkStream,
    pub exit: ExitFuture,
}

impl std::fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Starts the measurement utility.
///
/// `launch` is synchronous so that a spawn failure is known before any
/// session exists. It must be called from within a Tokio runtime.
pub trait Launcher: Send + Sync {
    fn launch(&self, invocation: &Invocation) -> Result<LaunchedProcess, LaunchError>;
}

/// Launches a real child process without a shell.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, invocation: &Invocation) -> Result<LaunchedProcess, LaunchError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_spawn(invocation.program.clone(), e))?;

        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;
        let pid = child.id();
        debug!(pid = ?pid, program = %invocation.program.display(), "spawned measurement utility");

        let exit = async move {
            let status = child.wait().await?;
            // Killed by a signal: no code, report -1.
            Ok(status.code().unwrap_or(-1))
        }
        .boxed();

        Ok(LaunchedProcess {
            pid,
            stdout: text_chunks(stdout),
            stderr: text_chunks(stderr),
            exit,
        })
    }
}

/// Read `reader` to EOF as UTF-8 text chunks.
///
/// Multi-byte sequences split across reads are joined; invalid bytes become
/// U+FFFD. The stream ends after EOF or the first read error.
pub fn text_chunks<R>(reader: R) -> ChunkStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some((reader, Utf8Assembler::default())), |state| async move {
        let Some((mut reader, mut utf8)) = state else {
            return None;
        };
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let rest = utf8.flush();
                    return (!rest.is_empty()).then(|| (Ok(rest), None));
                }
                Ok(n) => {
                    let text = utf8.push(&buf[..n]);
                    if !text.is_empty() {
                        return Some((Ok(text), Some((reader, utf8))));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

/// Incremental UTF-8 decoder that holds back an incomplete trailing sequence.
#[derive(Debug, Default)]
pub(crate) struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Whatever is still held back, decoded lossily.
    pub(crate) fn flush(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_sequence_split_across_reads() {
        let bytes = "Zürich".as_bytes();
        let mut utf8 = Utf8Assembler::default();
        let mut text = utf8.push(&bytes[..2]);
        text.push_str(&utf8.push(&bytes[2..]));
        assert_eq!(text, "Zürich");
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut utf8 = Utf8Assembler::default();
        assert_eq!(utf8.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_flushed_lossily() {
        let mut utf8 = Utf8Assembler::default();
        assert_eq!(utf8.push(&[b'x', 0xC3]), "x");
        assert_eq!(utf8.flush(), "\u{FFFD}");
        assert_eq!(utf8.flush(), "");
    }

    #[tokio::test]
    async fn test_text_chunks_reads_to_eof() {
        let reader: &'static [u8] = b"Download: 1 Mbps\nUpload: 2 Mbps\n";
        let chunks: Vec<String> = text_chunks(reader)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), "Download: 1 Mbps\nUpload: 2 Mbps\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let inv = Invocation::ookla("/nonexistent/speedpulse-test/speedtest");
        let err = ProcessLauncher::new().launch(&inv).unwrap_err();
        assert!(matches!(err, LaunchError::NotFound { .. }));
    }
}
