// ABOUTME: Extracts declared step outputs from an agent's free-form response
// ABOUTME: Uses the last JSON object in the text, whether inside a fenced block or bare

use crate::definition::StepOutput;
use crate::{Result, WorkflowError};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n(.*?)```").unwrap();
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    serde_json::from_str::<Map<String, Value>>(text.trim())
        .ok()
        .filter(|object| !object.is_empty())
}

/// Non-empty JSON objects inside fenced code blocks, in order
fn fenced_objects(text: &str) -> Vec<Map<String, Value>> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| parse_object(&caps[1]))
        .collect()
}

/// Non-empty top-level JSON objects appearing anywhere in `text`, in order
fn bare_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut found = Vec::new();
    let mut index = 0;

    while let Some(offset) = text[index..].find('{') {
        let start = index + offset;
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<Map<String, Value>>();
        match stream.next() {
            Some(Ok(object)) => {
                if !object.is_empty() {
                    found.push(object);
                }
                index = start + stream.byte_offset();
            }
            _ => index = start + 1,
        }
    }

    found
}

/// The last JSON object in a response. Fenced blocks win over bare objects and
/// empty objects are ignored.
pub fn extract_json_object(response: &str) -> Option<Map<String, Value>> {
    fenced_objects(response)
        .pop()
        .or_else(|| bare_objects(response).pop())
}

/// The last object naming at least one declared output, fenced blocks first
fn object_for_outputs(response: &str, declared: &[StepOutput]) -> Option<Map<String, Value>> {
    let names_an_output =
        |object: &Map<String, Value>| declared.iter().any(|o| object.contains_key(&o.name));

    fenced_objects(response)
        .into_iter()
        .rev()
        .find(|object| names_an_output(object))
        .or_else(|| {
            bare_objects(response)
                .into_iter()
                .rev()
                .find(|object| names_an_output(object))
        })
        .or_else(|| extract_json_object(response))
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Map each declared output to its value; a missing required output is an error
pub fn extract_outputs(
    step_id: &str,
    response: &str,
    declared: &[StepOutput],
) -> Result<BTreeMap<String, String>> {
    let mut outputs = BTreeMap::new();
    if declared.is_empty() {
        return Ok(outputs);
    }

    let object = object_for_outputs(response, declared).unwrap_or_default();
    for output in declared {
        match object.get(&output.name).and_then(value_text) {
            Some(value) => {
                outputs.insert(output.name.clone(), value);
            }
            None if output.required => {
                return Err(WorkflowError::MissingOutput {
                    step: step_id.to_string(),
                    output: output.name.clone(),
                })
            }
            None => {}
        }
    }

    Ok(outputs)
}
