// ABOUTME: Sequential workflow step runner with per-step failure policy and status reporting
// ABOUTME: Step failures become records in the run result; they never abort the process

use crate::definition::{StepType, Workflow, WorkflowStep};
use crate::output::extract_outputs;
use crate::template::{render, StepOutputs};
use crate::{Result, WorkflowError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use taskbox_agents::{AgentTool, CommandExecutor};
use taskbox_core::constants::CONTAINER_WORKSPACE;
use taskbox_executions::{ExecutionStatus, IterationStatusManager};
use tracing::{debug, error, info, warn};

/// Runs the shell text of `command` steps
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run_command(&self, command: &str) -> Result<String>;
}

/// Runs command steps with `sh -c` through an agent command executor, normally the
/// task container
pub struct ShellStepExecutor {
    executor: Arc<dyn CommandExecutor>,
    workdir: String,
}

impl ShellStepExecutor {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            workdir: CONTAINER_WORKSPACE.to_string(),
        }
    }
}

#[async_trait]
impl StepExecutor for ShellStepExecutor {
    async fn run_command(&self, command: &str) -> Result<String> {
        let argv = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        let output = self.executor.run(argv, &self.workdir).await?;
        if !output.success() {
            return Err(WorkflowError::Command(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub name: String,
    pub outcome: StepOutcome,
    pub outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl StepResult {
    fn skipped(step: &WorkflowStep) -> Self {
        Self {
            step_id: step.id.clone(),
            name: step.name.clone(),
            outcome: StepOutcome::Skipped,
            outputs: BTreeMap::new(),
            error: None,
            duration_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub workflow: String,
    pub step_results: Vec<StepResult>,
    pub overall_success: bool,
    pub total_duration_secs: f64,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    /// Failure that prevented any step from running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn total_steps(&self) -> usize {
        self.step_results.len()
    }

    /// Run-level error, else the first failed step's error
    pub fn first_error(&self) -> Option<&str> {
        self.error.as_deref().or_else(|| {
            self.step_results
                .iter()
                .find(|r| r.outcome == StepOutcome::Failed)
                .and_then(|r| r.error.as_deref())
        })
    }

    /// The run-level error, or `<step name>: <error>` for the first failed step
    pub fn failure_summary(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        self.step_results
            .iter()
            .find(|r| r.outcome == StepOutcome::Failed)
            .map(|r| format!("{}: {}", r.name, r.error.as_deref().unwrap_or("failed")))
    }
}

fn progress_after(completed: usize, total: usize) -> i64 {
    if total == 0 {
        return 100;
    }
    (100.0 * completed as f64 / total as f64).round() as i64
}

fn write_best_effort(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Failed to create {}: {}", parent.display(), e);
            return;
        }
    }
    if let Err(e) = fs::write(path, content) {
        warn!("Failed to write {}: {}", path.display(), e);
    }
}

pub struct WorkflowRunner {
    agent: Arc<dyn AgentTool>,
    commands: Option<Arc<dyn StepExecutor>>,
    output_dir: Option<PathBuf>,
    status: Option<IterationStatusManager>,
}

impl WorkflowRunner {
    pub fn new(agent: Arc<dyn AgentTool>) -> Self {
        Self {
            agent,
            commands: None,
            output_dir: None,
            status: None,
        }
    }

    pub fn with_commands(mut self, commands: Arc<dyn StepExecutor>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Directory receiving `<stepId>.raw.md` and `<stepId>.<output>.txt`
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_status(mut self, status: IterationStatusManager) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status(&self) -> Option<&IterationStatusManager> {
        self.status.as_ref()
    }

    pub fn into_status(self) -> Option<IterationStatusManager> {
        self.status
    }

    /// Run every step in declared order.
    ///
    /// `failed_steps` is always `attempted - successful` and `skipped_steps` is
    /// `total - attempted`, so the three counts add up to the number of steps.
    pub async fn run(
        &mut self,
        workflow: &Workflow,
        inputs: &BTreeMap<String, String>,
    ) -> RunResult {
        let total = workflow.steps.len();
        let continue_on_error = workflow.continue_on_error();
        info!(
            "Running workflow {} ({} steps, continueOnError={})",
            workflow.name, total, continue_on_error
        );

        let inputs = match workflow.resolve_inputs(inputs) {
            Ok(resolved) => resolved,
            Err(e) => return self.reject_inputs(workflow, e),
        };

        if let (Some(status), Some(first)) = (self.status.as_mut(), workflow.steps.first()) {
            status.update(ExecutionStatus::Running, &first.name, 0, None);
        }

        let mut outputs: StepOutputs = BTreeMap::new();
        let mut results = Vec::with_capacity(total);
        let mut attempted = 0;
        let mut successful = 0;
        let mut total_duration = 0.0;
        let mut aborted = false;
        let mut last_error: Option<String> = None;

        for (index, step) in workflow.steps.iter().enumerate() {
            if aborted {
                results.push(StepResult::skipped(step));
                continue;
            }

            info!("Step {}/{}: {}", index + 1, total, step.name);
            attempted += 1;
            let started = Instant::now();
            let outcome = self.execute_step(step, &inputs, &outputs).await;
            let duration_secs = started.elapsed().as_secs_f64();
            total_duration += duration_secs;

            match outcome {
                Ok(step_outputs) => {
                    successful += 1;
                    outputs.insert(step.id.clone(), step_outputs.clone());
                    results.push(StepResult {
                        step_id: step.id.clone(),
                        name: step.name.clone(),
                        outcome: StepOutcome::Succeeded,
                        outputs: step_outputs,
                        error: None,
                        duration_secs,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    error!("Step {} failed: {}", step.id, message);
                    outputs.insert(step.id.clone(), BTreeMap::new());
                    results.push(StepResult {
                        step_id: step.id.clone(),
                        name: step.name.clone(),
                        outcome: StepOutcome::Failed,
                        outputs: BTreeMap::new(),
                        error: Some(message.clone()),
                        duration_secs,
                    });
                    last_error = Some(format!("{}: {}", step.name, message));
                    if !continue_on_error {
                        aborted = true;
                    }
                }
            }

            self.report_step(
                &step.name,
                index + 1,
                total,
                aborted,
                successful == attempted,
                &last_error,
            );
        }

        if total == 0 {
            if let Some(status) = self.status.as_mut() {
                status.complete(&workflow.name);
            }
        }

        let failed = attempted - successful;
        let result = RunResult {
            workflow: workflow.name.clone(),
            step_results: results,
            overall_success: failed == 0,
            total_duration_secs: total_duration,
            successful_steps: successful,
            failed_steps: failed,
            skipped_steps: total - attempted,
            error: None,
        };

        info!(
            "Workflow {} finished: {} succeeded, {} failed, {} skipped in {:.1}s",
            workflow.name,
            result.successful_steps,
            result.failed_steps,
            result.skipped_steps,
            result.total_duration_secs
        );
        result
    }

    /// Nothing runs when the inputs cannot be resolved; every step counts as skipped
    fn reject_inputs(&mut self, workflow: &Workflow, e: WorkflowError) -> RunResult {
        let message = e.to_string();
        error!("Workflow {} not started: {}", workflow.name, message);

        if let Some(status) = self.status.as_mut() {
            let step = workflow
                .steps
                .first()
                .map_or(workflow.name.as_str(), |step| step.name.as_str());
            status.fail(step, message.clone());
        }

        RunResult {
            workflow: workflow.name.clone(),
            step_results: workflow.steps.iter().map(StepResult::skipped).collect(),
            overall_success: false,
            total_duration_secs: 0.0,
            successful_steps: 0,
            failed_steps: 0,
            skipped_steps: workflow.steps.len(),
            error: Some(message),
        }
    }

    fn report_step(
        &mut self,
        step_name: &str,
        completed: usize,
        total: usize,
        aborted: bool,
        all_succeeded: bool,
        last_error: &Option<String>,
    ) {
        let Some(status) = self.status.as_mut() else {
            return;
        };
        let error = || last_error.clone().unwrap_or_else(|| "workflow failed".to_string());

        if aborted {
            status.fail(step_name, error());
        } else if completed == total {
            if all_succeeded {
                status.complete(step_name);
            } else {
                status.fail(step_name, error());
            }
        } else {
            status.update(
                ExecutionStatus::Running,
                step_name,
                progress_after(completed, total),
                None,
            );
        }
    }

    async fn execute_step(
        &self,
        step: &WorkflowStep,
        inputs: &BTreeMap<String, String>,
        outputs: &StepOutputs,
    ) -> Result<BTreeMap<String, String>> {
        let response = match step.step_type {
            StepType::Agent => {
                let prompt = render(step.prompt.as_deref().unwrap_or_default(), inputs, outputs);
                debug!("Step {} prompt:\n{}", step.id, prompt);
                self.agent.invoke(&prompt).await?
            }
            StepType::Command => {
                let commands = self
                    .commands
                    .as_ref()
                    .ok_or_else(|| WorkflowError::NoCommandExecutor(step.id.clone()))?;
                let command = render(step.command.as_deref().unwrap_or_default(), inputs, outputs);
                debug!("Step {} command: {}", step.id, command);
                commands.run_command(&command).await?
            }
        };

        if let Some(dir) = &self.output_dir {
            write_best_effort(&dir.join(format!("{}.raw.md", step.id)), &response);
        }

        let extracted = extract_outputs(&step.id, &response, &step.outputs)?;
        if let Some(dir) = &self.output_dir {
            for (name, value) in &extracted {
                write_best_effort(&dir.join(format!("{}.{}.txt", step.id, name)), value);
            }
        }

        Ok(extracted)
    }
}
