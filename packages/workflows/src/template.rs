// ABOUTME: Renders `{{ ... }}` references in step prompts and commands
// ABOUTME: Supports workflow inputs and outputs of earlier steps; unknown references render empty

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use tracing::debug;

lazy_static! {
    static ref REFERENCE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}").unwrap();
}

/// Outputs recorded so far, keyed by step id then output name
pub type StepOutputs = BTreeMap<String, BTreeMap<String, String>>;

fn lookup<'a>(
    reference: &str,
    inputs: &'a BTreeMap<String, String>,
    outputs: &'a StepOutputs,
) -> Option<&'a String> {
    let parts: Vec<&str> = reference.split('.').collect();
    match parts.as_slice() {
        ["inputs", name] => inputs.get(*name),
        [step, "outputs", name] => outputs.get(*step).and_then(|o| o.get(*name)),
        [name] => inputs.get(*name),
        _ => None,
    }
}

/// Substitute `{{ inputs.name }}`, `{{ name }}` and `{{ stepId.outputs.name }}`
pub fn render(
    template: &str,
    inputs: &BTreeMap<String, String>,
    outputs: &StepOutputs,
) -> String {
    REFERENCE
        .replace_all(template, |caps: &Captures| {
            let reference = &caps[1];
            match lookup(reference, inputs, outputs) {
                Some(value) => value.clone(),
                None => {
                    debug!("Unresolved template reference '{}'", reference);
                    String::new()
                }
            }
        })
        .into_owned()
}
