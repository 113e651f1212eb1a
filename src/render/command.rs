//! External-program renderer.
//!
//! Runs a configured command with the prompt appended as the last argument
//! and reads the encoded image from its stdout. The request size and
//! keyword are passed through the environment:
//!
//! | Variable | Value |
//! |---|---|
//! | `TREND_STOCK_WIDTH` | requested width in pixels |
//! | `TREND_STOCK_HEIGHT` | requested height in pixels |
//! | `TREND_STOCK_KEYWORD` | normalized keyword |
//! | `TREND_STOCK_CATEGORY` | keyword category |
//!
//! A process that outlives the timeout is killed and reported as
//! [`GenerationError::Timeout`].

use super::backend::{GenerationError, RenderRequest, Renderer};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    /// Build from an argv list (`["imagen-cli", "--model", "4.0"]`).
    /// Returns `None` for an empty list.
    pub fn from_argv(argv: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

impl Renderer for CommandRenderer {
    fn name(&self) -> &str {
        &self.program
    }

    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, GenerationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&request.prompt)
            .env("TREND_STOCK_WIDTH", request.width.to_string())
            .env("TREND_STOCK_HEIGHT", request.height.to_string())
            .env("TREND_STOCK_KEYWORD", request.keyword.as_str())
            .env("TREND_STOCK_CATEGORY", &request.category)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GenerationError::Failed(format!("cannot start {}: {e}", self.program)))?;

        // Drain pipes on their own threads so a chatty child cannot block
        // on a full pipe while we wait for it.
        let stdout = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                out.read_to_end(&mut buf).map(|_| buf)
            })
        });
        let stderr = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf);
                buf
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GenerationError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stdout = match stdout.map(|h| h.join()) {
            Some(Ok(read)) => read?,
            _ => Vec::new(),
        };

        if !status.success() {
            let detail = stderr.lines().last().unwrap_or("").trim();
            return Err(GenerationError::Failed(format!(
                "{} exited with {status}{}{detail}",
                self.program,
                if detail.is_empty() { "" } else { ": " }
            )));
        }
        if stdout.is_empty() {
            return Err(GenerationError::Failed(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(stdout)
    }
}
