// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log source reader.
//!
//! Runs a log-capture subprocess (`logcat` by default), reads its stdout line
//! by line and hands every line that passes the [`MarkerFilter`] to a
//! [`LineSink`]. The loop ends when the subprocess closes its output, a read
//! fails, or the [`CaptureHandle`] is cancelled; it is never restarted.

use crate::config::ShipperConfig;
use crate::error::CaptureError;
use crate::filter::MarkerFilter;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives accepted lines. Must not block: submission is fire-and-forget.
pub trait LineSink: Send + Sync {
    fn submit(&self, line: String);
}

impl<F> LineSink for F
where
    F: Fn(String) + Send + Sync,
{
    fn submit(&self, line: String) {
        self(line);
    }
}

/// The subprocess producing the diagnostic log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSource {
    pub program: String,
    pub args: Vec<String>,
}

impl CaptureSource {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    #[must_use]
    pub fn from_config(config: &ShipperConfig) -> Self {
        Self::new(config.capture_program.clone(), config.capture_args.clone())
    }
}

/// How the capture loop ended.
#[derive(Debug)]
pub enum CaptureExit {
    /// The source closed its output.
    EndOfStream,
    /// The handle was cancelled.
    Cancelled,
    Failed(CaptureError),
}

#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    filter: MarkerFilter,
}

impl LogCapture {
    #[must_use]
    pub fn new(filter: MarkerFilter) -> Self {
        Self { filter }
    }

    /// Reads `reader` until it ends, fails, or `cancel` fires.
    ///
    /// Accepted lines are submitted in read order, each exactly once.
    /// Invalid UTF-8 is replaced rather than ending the loop.
    pub async fn run<R>(&self, reader: R, sink: &dyn LineSink, cancel: &CancellationToken) -> CaptureExit
    where
        R: AsyncBufRead + Unpin,
    {
        let mut segments = reader.split(b'\n');
        let mut forwarded: u64 = 0;
        let mut filtered: u64 = 0;

        let exit = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break CaptureExit::Cancelled,
                next = segments.next_segment() => match next {
                    Ok(Some(bytes)) => {
                        let raw = String::from_utf8_lossy(&bytes);
                        let line = raw.strip_suffix('\r').unwrap_or(&raw);
                        if self.filter.accepts(line) {
                            forwarded += 1;
                            sink.submit(line.to_string());
                        } else {
                            filtered += 1;
                        }
                    }
                    Ok(None) => break CaptureExit::EndOfStream,
                    Err(e) => break CaptureExit::Failed(CaptureError::Read(e)),
                },
            }
        };

        debug!("Capture loop finished: {forwarded} lines forwarded, {filtered} filtered");
        exit
    }

    /// Starts `source` and runs the loop on a background task.
    pub fn spawn(self, source: CaptureSource, sink: Arc<dyn LineSink>) -> CaptureHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let exit = self.run_process(&source, sink.as_ref(), &task_cancel).await;
            match &exit {
                CaptureExit::EndOfStream => warn!("Capture process '{}' ended", source.program),
                CaptureExit::Cancelled => debug!("Capture of '{}' cancelled", source.program),
                CaptureExit::Failed(e) => error!("Error intercepting logs: {e}"),
            }
            exit
        });

        CaptureHandle { cancel, task }
    }

    async fn run_process(
        &self,
        source: &CaptureSource,
        sink: &dyn LineSink,
        cancel: &CancellationToken,
    ) -> CaptureExit {
        info!("Starting log interception from '{}'", source.program);
        let mut child = match Command::new(&source.program)
            .args(&source.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source_err) => {
                return CaptureExit::Failed(CaptureError::Spawn {
                    program: source.program.clone(),
                    source: source_err,
                })
            }
        };

        let Some(stdout) = child.stdout.take() else {
            return CaptureExit::Failed(CaptureError::MissingStdout);
        };

        let exit = self.run(BufReader::new(stdout), sink, cancel).await;

        match exit {
            CaptureExit::EndOfStream => match child.wait().await {
                Ok(status) => debug!("Capture process exited with {status}"),
                Err(e) => debug!("Failed to reap capture process: {e}"),
            },
            CaptureExit::Cancelled | CaptureExit::Failed(_) => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to stop capture process: {e}");
                }
            }
        }
        exit
    }
}

/// Controls a running capture loop.
#[derive(Debug)]
pub struct CaptureHandle {
    cancel: CancellationToken,
    task: JoinHandle<CaptureExit>,
}

impl CaptureHandle {
    /// Stops the loop and the subprocess.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the loop to end.
    pub async fn join(self) -> CaptureExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => CaptureExit::Failed(CaptureError::Read(std::io::Error::other(format!(
                "capture task failed: {e}"
            )))),
        }
    }
}
