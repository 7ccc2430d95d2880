// ABOUTME: Workflow definition types loaded from YAML
// ABOUTME: Resolves a workflow by file path or built-in name and validates step structure

use crate::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::debug;

const BUILTIN_WORKFLOWS: &[(&str, &str)] = &[("swe", include_str!("../config/workflows/swe.yml"))];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Agent,
    Command,
}

fn default_true() -> bool {
    true
}

fn default_step_type() -> StepType {
    StepType::Agent
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StepOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: WorkflowConfig,
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Parse and validate YAML; `source_name` only appears in error messages
    pub fn from_yaml(yaml: &str, source_name: &str) -> Result<Self> {
        let workflow: Workflow =
            serde_yaml::from_str(yaml).map_err(|e| WorkflowError::Parse {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WorkflowError::NotFound(path.display().to_string())
            } else {
                WorkflowError::Io(e)
            }
        })?;
        Self::from_yaml(&content, &path.display().to_string())
    }

    pub fn builtin(name: &str) -> Result<Self> {
        let (_, yaml) = BUILTIN_WORKFLOWS
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .ok_or_else(|| WorkflowError::NotFound(name.to_string()))?;
        Self::from_yaml(yaml, name)
    }

    pub fn builtin_names() -> Vec<&'static str> {
        BUILTIN_WORKFLOWS.iter().map(|(name, _)| *name).collect()
    }

    /// A reference that looks like a file (`.yml`/`.yaml` or containing a path
    /// separator) is loaded relative to `project_root`; anything else is a built-in name.
    pub fn resolve(reference: &str, project_root: &Path) -> Result<Self> {
        let looks_like_path = reference.ends_with(".yml")
            || reference.ends_with(".yaml")
            || reference.contains('/');

        if looks_like_path {
            let path = project_root.join(reference);
            debug!("Loading workflow from {}", path.display());
            Self::load(&path)
        } else {
            Self::builtin(reference)
        }
    }

    pub fn continue_on_error(&self) -> bool {
        self.config.continue_on_error
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| WorkflowError::Parse {
            source_name: self.name.clone(),
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::Invalid("workflow name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(WorkflowError::Invalid(format!(
                    "step '{}' has an empty id",
                    step.name
                )));
            }
            if step.id.contains('.') {
                return Err(WorkflowError::Invalid(format!(
                    "step id '{}' must not contain '.'",
                    step.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(WorkflowError::Invalid(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }

            let body = match step.step_type {
                StepType::Agent => &step.prompt,
                StepType::Command => &step.command,
            };
            if body.as_deref().map_or(true, |b| b.trim().is_empty()) {
                return Err(WorkflowError::Invalid(format!(
                    "{:?} step '{}' has nothing to run",
                    step.step_type, step.id
                )));
            }
        }

        Ok(())
    }

    /// Merge provided values with declared defaults. Undeclared inputs pass through.
    ///
    /// Every default is applied before required inputs are checked; the error names
    /// all required inputs that are still missing.
    pub fn resolve_inputs(
        &self,
        provided: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut resolved = provided.clone();
        for input in &self.inputs {
            if let Some(default) = &input.default {
                resolved
                    .entry(input.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }

        let missing: Vec<&str> = self
            .inputs
            .iter()
            .filter(|input| input.required && !resolved.contains_key(&input.name))
            .map(|input| input.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(WorkflowError::MissingInput(missing.join(", ")));
        }
        Ok(resolved)
    }
}
