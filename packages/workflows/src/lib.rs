// ABOUTME: Workflow definitions, prompt rendering and the sequential step runner
// ABOUTME: Workflows are YAML files; the built-in `swe` workflow ships embedded in the binary

pub mod definition;
pub mod output;
pub mod runner;
pub mod template;

pub use definition::{StepOutput, StepType, Workflow, WorkflowConfig, WorkflowInput, WorkflowStep};
pub use output::{extract_json_object, extract_outputs};
pub use runner::{
    RunResult, ShellStepExecutor, StepExecutor, StepOutcome, StepResult, WorkflowRunner,
};
pub use template::render;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Failed to parse workflow {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Missing required workflow input: {0}")]
    MissingInput(String),

    #[error("Step {step} did not produce required output '{output}'")]
    MissingOutput { step: String, output: String },

    #[error("Step {0} is a command step but no command executor is configured")]
    NoCommandExecutor(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error(transparent)]
    Agent(#[from] taskbox_agents::AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
