//! Render retry loop against a scripted renderer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    render_with_retry, PipelineError, RenderJob, RenderOutcome, RetryPolicy, ToolCommand,
    ToolOutput, ToolRunner,
};
use test_utils::{count_files_with_suffix, touch_files};

/// What the fake renderer does on one attempt.
#[derive(Clone, Copy)]
enum Attempt {
    /// Exit with `code` after writing outputs for the first `n` inputs
    Exit { code: i32, outputs: usize },
    /// Fail to start
    Missing,
}

/// Renderer whose behaviour is scripted per attempt; the last entry
/// repeats.
struct ScriptedRenderer {
    output_dir: PathBuf,
    script: Vec<Attempt>,
    calls: AtomicU32,
}

impl ScriptedRenderer {
    fn new(output_dir: &Path, script: Vec<Attempt>) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            script,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolRunner for ScriptedRenderer {
    async fn run(&self, command: &ToolCommand, _working_dir: &Path) -> pipeline::Result<ToolOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let step = self.script[call.min(self.script.len() - 1)];

        match step {
            Attempt::Exit { code, outputs } => {
                // Same names every attempt, so outputs never accumulate past `outputs`
                for i in 0..outputs {
                    std::fs::write(self.output_dir.join(format!("in_{}.laz.png", i)), b"").unwrap();
                }
                Ok(ToolOutput {
                    exit_code: Some(code),
                    stderr: if code == 0 { String::new() } else { "segfault\n".into() },
                    ..Default::default()
                })
            }
            Attempt::Missing => Err(PipelineError::Spawn {
                command: command.to_string(),
                message: "No such file or directory".into(),
            }),
        }
    }
}

struct Dirs {
    _root: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
}

fn dirs_with_inputs(inputs: usize) -> Dirs {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("downloaded_files");
    let output = root.path().join("output");
    std::fs::create_dir_all(&output).unwrap();
    touch_files(&input, "in_", ".laz", inputs);
    Dirs {
        _root: root,
        input,
        output,
    }
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        crash_backoff: Duration::ZERO,
    }
}

async fn run(renderer: &ScriptedRenderer, dirs: &Dirs, policy: RetryPolicy) -> pipeline::RenderReport {
    let command = ToolCommand::parse("rusty-pullauta").unwrap();
    let job = RenderJob {
        command: &command,
        working_dir: dirs.input.parent().unwrap(),
        input_dir: &dirs.input,
        input_suffix: ".laz",
        output_dir: &dirs.output,
        output_suffix: ".laz.png",
    };
    render_with_retry(renderer, &job, &policy).await
}

#[tokio::test]
async fn test_converges_on_last_attempt_not_before() {
    let dirs = dirs_with_inputs(20);
    let mut script = vec![Attempt::Exit { code: 0, outputs: 18 }; 19];
    script.push(Attempt::Exit { code: 0, outputs: 20 });
    let renderer = ScriptedRenderer::new(&dirs.output, script);

    let report = run(&renderer, &dirs, policy(20)).await;

    assert_eq!(report.attempts, 20);
    assert_eq!(renderer.calls(), 20);
    assert_eq!(report.outcome, RenderOutcome::Converged);
    assert_eq!(report.inputs, 20);
    assert_eq!(report.outputs, 20);
}

#[tokio::test]
async fn test_gives_up_with_partial_output() {
    let dirs = dirs_with_inputs(20);
    let renderer = ScriptedRenderer::new(&dirs.output, vec![Attempt::Exit { code: 0, outputs: 18 }]);

    let report = run(&renderer, &dirs, policy(20)).await;

    assert_eq!(report.attempts, 20);
    assert_eq!(renderer.calls(), 20);
    assert!(!report.converged());
    assert_eq!(
        report.outcome,
        RenderOutcome::Undercounted { produced: 18, expected: 20 }
    );
    // Partial output stays in place for assembly
    assert_eq!(count_files_with_suffix(&dirs.output, ".laz.png"), 18);
}

#[tokio::test]
async fn test_stops_at_first_converged_attempt() {
    let dirs = dirs_with_inputs(5);
    let renderer = ScriptedRenderer::new(
        &dirs.output,
        vec![
            Attempt::Exit { code: 0, outputs: 2 },
            Attempt::Exit { code: 0, outputs: 5 },
            Attempt::Exit { code: 0, outputs: 0 },
        ],
    );

    let report = run(&renderer, &dirs, policy(20)).await;
    assert_eq!(report.attempts, 2);
    assert_eq!(renderer.calls(), 2);
    assert!(report.converged());
}

#[tokio::test]
async fn test_crashes_terminate_within_budget() {
    let dirs = dirs_with_inputs(4);
    let renderer = ScriptedRenderer::new(&dirs.output, vec![Attempt::Exit { code: 139, outputs: 1 }]);

    let report = run(&renderer, &dirs, policy(7)).await;
    assert_eq!(report.attempts, 7);
    assert_eq!(renderer.calls(), 7);
    assert_eq!(report.outcome, RenderOutcome::Crashed { exit_code: Some(139) });
    assert_eq!(report.outputs, 1);
}

#[tokio::test]
async fn test_missing_renderer_is_a_crash_not_an_error() {
    let dirs = dirs_with_inputs(3);
    let renderer = ScriptedRenderer::new(&dirs.output, vec![Attempt::Missing]);

    let report = run(&renderer, &dirs, policy(3)).await;
    assert_eq!(report.attempts, 3);
    assert_eq!(report.outcome, RenderOutcome::Crashed { exit_code: None });
    assert_eq!(report.outputs, 0);
}

#[tokio::test]
async fn test_crash_then_recovery() {
    let dirs = dirs_with_inputs(3);
    let renderer = ScriptedRenderer::new(
        &dirs.output,
        vec![Attempt::Missing, Attempt::Exit { code: 1, outputs: 1 }, Attempt::Exit { code: 0, outputs: 3 }],
    );

    let report = run(&renderer, &dirs, policy(20)).await;
    assert_eq!(report.attempts, 3);
    assert!(report.converged());
}

#[tokio::test]
async fn test_complete_output_with_failed_exit_is_accepted() {
    let dirs = dirs_with_inputs(2);
    let renderer = ScriptedRenderer::new(&dirs.output, vec![Attempt::Exit { code: 1, outputs: 2 }]);

    let report = run(&renderer, &dirs, policy(20)).await;
    assert_eq!(report.attempts, 1);
    assert!(report.converged());
}

#[tokio::test]
async fn test_zero_budget_still_runs_once() {
    let dirs = dirs_with_inputs(1);
    let renderer = ScriptedRenderer::new(&dirs.output, vec![Attempt::Exit { code: 0, outputs: 0 }]);

    let report = run(&renderer, &dirs, policy(0)).await;
    assert_eq!(report.attempts, 1);
    assert_eq!(renderer.calls(), 1);
}
