//! Renderer workspace preparation and the render retry loop.
//!
//! The renderer is judged only by its exit status and by how many outputs
//! it leaves behind: one `output_count_suffix` file per render-ready input.
//! The loop stops at the first attempt whose counts match, or when the
//! attempt budget runs out, in which case whatever was produced is assembled.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::config::RenderConfig;
use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::tool::{ToolCommand, ToolOutput, ToolRunner};

/// Renderer settings shared by every chunk.
pub const RENDERER_DEFAULTS: &str = include_str!("../assets/renderer.ini");

/// Pipe-delimited rules mapping vector features to map symbols.
pub const VECTOR_RULES: &str = include_str!("../assets/vector_rules.txt");

/// Renderer configuration for one chunk.
pub fn renderer_config(
    threads: usize,
    input_dir: &Path,
    output_dir: &Path,
    vector_rules_file: &str,
) -> String {
    let mut config = String::from(RENDERER_DEFAULTS);
    if !config.ends_with('\n') {
        config.push('\n');
    }
    config.push_str(&format!("processes={}\n", threads));
    config.push_str(&format!("batchoutfolder={}\n", slash_path(output_dir)));
    config.push_str(&format!("lazfolder={}\n", slash_path(input_dir)));
    config.push_str(&format!("vectorconf={}\n", vector_rules_file));
    config
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Clear what a previous run left in the renderer's working directory and
/// write this chunk's configuration files there.
pub async fn prepare_renderer_dir(
    config: &RenderConfig,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<()> {
    let dir = &config.working_dir;
    tokio::fs::create_dir_all(dir).await?;

    for n in 1..=config.threads {
        let temp = dir.join(format!("temp{}", n));
        match tokio::fs::remove_dir_all(&temp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::Io(e)),
        }
    }

    let ini = renderer_config(config.threads, input_dir, output_dir, &config.vector_rules_file);
    tokio::fs::write(dir.join(&config.config_file), ini).await?;
    tokio::fs::write(dir.join(&config.vector_rules_file), VECTOR_RULES).await?;
    Ok(())
}

/// Bounds on the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause before retrying an attempt that crashed
    pub crash_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            crash_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            crash_backoff: Duration::from_secs(config.crash_backoff_secs),
        }
    }
}

/// How one render attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// One output per input
    Converged,
    /// Clean exit with outputs missing
    Undercounted { produced: usize, expected: usize },
    /// Failed exit or no process at all, with outputs missing
    Crashed { exit_code: Option<i32> },
}

impl RenderOutcome {
    /// Classify an attempt from the tool result and the output count.
    ///
    /// Matching counts win over the exit status.
    pub fn classify(result: &Result<ToolOutput>, produced: usize, expected: usize) -> Self {
        if produced == expected {
            return RenderOutcome::Converged;
        }
        match result {
            Ok(output) if output.success() => RenderOutcome::Undercounted { produced, expected },
            Ok(output) => RenderOutcome::Crashed {
                exit_code: output.exit_code,
            },
            Err(_) => RenderOutcome::Crashed { exit_code: None },
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, RenderOutcome::Converged)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RenderOutcome::Converged => "converged",
            RenderOutcome::Undercounted { .. } => "undercounted",
            RenderOutcome::Crashed { .. } => "crashed",
        }
    }
}

/// Summary of a render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderReport {
    pub attempts: u32,
    /// Outcome of the last attempt
    pub outcome: RenderOutcome,
    pub inputs: usize,
    pub outputs: usize,
}

impl RenderReport {
    pub fn converged(&self) -> bool {
        self.outcome.is_converged()
    }
}

/// Where the renderer reads and writes for one chunk.
#[derive(Debug, Clone, Copy)]
pub struct RenderJob<'a> {
    pub command: &'a ToolCommand,
    pub working_dir: &'a Path,
    pub input_dir: &'a Path,
    pub input_suffix: &'a str,
    pub output_dir: &'a Path,
    pub output_suffix: &'a str,
}

/// Run the renderer until its outputs match its inputs or the policy's
/// attempt budget is spent. Never fails: a render that does not converge
/// is reported, and the caller assembles the partial output.
#[instrument(skip_all, fields(command = %job.command))]
pub async fn render_with_retry(
    runner: &dyn ToolRunner,
    job: &RenderJob<'_>,
    policy: &RetryPolicy,
) -> RenderReport {
    let inputs = count_with_suffix(job.input_dir, job.input_suffix).await;
    let max_attempts = policy.max_attempts.max(1);

    let mut report = RenderReport {
        attempts: 0,
        outcome: RenderOutcome::Crashed { exit_code: None },
        inputs,
        outputs: 0,
    };

    while report.attempts < max_attempts {
        report.attempts += 1;
        let attempt = report.attempts;

        let result = runner.run(job.command, job.working_dir).await;
        report.outputs = count_with_suffix(job.output_dir, job.output_suffix).await;
        report.outcome = RenderOutcome::classify(&result, report.outputs, inputs);
        metrics::record_render_attempt(report.outcome.label());

        match (&report.outcome, &result) {
            (RenderOutcome::Converged, Ok(output)) if !output.success() => {
                warn!(attempt, exit_code = ?output.exit_code, outputs = report.outputs, "Renderer exited with failure but produced every output");
                break;
            }
            (RenderOutcome::Converged, _) => {
                info!(attempt, outputs = report.outputs, "Render converged");
                break;
            }
            (RenderOutcome::Undercounted { produced, expected }, _) => {
                warn!(attempt, max_attempts, produced, expected, "Renderer produced too few outputs");
            }
            (RenderOutcome::Crashed { exit_code }, Ok(output)) => {
                warn!(
                    attempt,
                    max_attempts,
                    exit_code = ?exit_code,
                    stderr = %output.stderr_tail(5),
                    "Renderer crashed"
                );
            }
            (RenderOutcome::Crashed { .. }, Err(e)) => {
                error!(attempt, max_attempts, error = %e, "Renderer could not be started");
            }
        }

        if matches!(report.outcome, RenderOutcome::Crashed { .. })
            && attempt < max_attempts
            && !policy.crash_backoff.is_zero()
        {
            tokio::time::sleep(policy.crash_backoff).await;
        }
    }

    metrics::record_render_loop(report.attempts);
    if !report.converged() {
        warn!(
            attempts = report.attempts,
            outputs = report.outputs,
            inputs = report.inputs,
            outcome = report.outcome.label(),
            "Render did not converge, continuing with partial output"
        );
    }
    report
}

/// Files in `dir` whose name ends with `suffix`; a missing directory counts
/// as empty.
pub async fn count_with_suffix(dir: &Path, suffix: &str) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut names = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => names.push(Ok(entry.file_name().to_string_lossy().into_owned())),
            Ok(None) => break,
            Err(e) => {
                names.push(Err(e));
                break;
            }
        }
    }
    tally_suffix(dir, names, suffix)
}

/// Count names ending with `suffix`, stopping at the first listing error.
fn tally_suffix<I>(dir: &Path, names: I, suffix: &str) -> usize
where
    I: IntoIterator<Item = std::io::Result<String>>,
{
    let mut count = 0;
    for name in names {
        match name {
            Ok(name) if name.ends_with(suffix) => count += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(dir = %dir.display(), suffix, counted = count, error = %e, "Directory listing interrupted");
                break;
            }
        }
    }
    count
}
