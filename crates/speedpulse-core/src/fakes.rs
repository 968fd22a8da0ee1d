//! Scripted launcher for tests (no real process).
//!
//! A [`Script`] fixes the chunks a fake utility writes and its exit code.
//! [`ScriptedLauncher::held`] keeps every launched run from producing output
//! until [`ScriptedLauncher::release`] is called, which lets tests observe a
//! run while it is still active.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::sync::Semaphore;

use crate::error::LaunchError;
use crate::invocation::Invocation;
use crate::launcher::{LaunchedProcess, Launcher};

/// What one fake run does.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
    /// Fail `launch` with `LaunchError::NotFound` instead of running.
    pub fail_launch: bool,
}

impl Script {
    /// Write `chunks` to stdout, then exit 0.
    pub fn stdout(chunks: &[&str]) -> Self {
        Self {
            stdout: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn launch_failure() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, chunks: &[&str]) -> Self {
        self.stderr = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }
}

/// Launcher that replays scripts in order and repeats the last one.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    last: Mutex<Script>,
    hold: Option<Arc<Semaphore>>,
    launches: AtomicUsize,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self::sequence(vec![script])
    }

    pub fn sequence(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    /// Like `new`, but each run waits for one `release` before writing.
    pub fn held(script: Script) -> Self {
        Self {
            hold: Some(Arc::new(Semaphore::new(0))),
            ..Self::new(script)
        }
    }

    /// Let one held run proceed.
    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(1);
        }
    }

    /// Number of successful and failed `launch` calls.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    fn next_script(&self) -> Script {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.scripts.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, invocation: &Invocation) -> Result<LaunchedProcess, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(invocation.clone());

        let script = self.next_script();
        if script.fail_launch {
            return Err(LaunchError::NotFound {
                program: PathBuf::from(&invocation.program),
            });
        }

        let hold = self.hold.clone();
        let wait = async move {
            if let Some(hold) = hold {
                if let Ok(permit) = hold.acquire().await {
                    permit.forget();
                }
            }
        };
        let chunks = script.stdout;
        let stdout = stream::once(wait)
            .map(move |()| stream::iter(chunks.clone().into_iter().map(Ok::<String, io::Error>)))
            .flatten()
            .boxed();
        let stderr = stream::iter(script.stderr.into_iter().map(Ok::<String, io::Error>)).boxed();
        let code = script.exit_code;
        let exit = async move { Ok::<i32, io::Error>(code) }.boxed();

        Ok(LaunchedProcess {
            pid: None,
            stdout,
            stderr,
            exit,
        })
    }
}
