use crate::config::{Catalog, ParamKind, ParamSpec, TaskSpec};
use braid_core::{BraidError, BraidResult, TaskFrame};
use serde_json::Value;
use std::collections::BTreeMap;

/// Validates `args` against the task's declared parameters.
///
/// Missing optional parameters take their default. String values are
/// coerced to the declared kind when they parse; anything else of the
/// wrong shape is rejected, as are undeclared names.
pub fn bind_parameters(
    spec: &TaskSpec,
    args: &BTreeMap<String, Value>,
) -> BraidResult<BTreeMap<String, Value>> {
    if let Some(unknown) = args
        .keys()
        .find(|k| !spec.parameters.iter().any(|p| &p.name == *k))
    {
        return Err(BraidError::Validation(format!(
            "task '{}' has no parameter '{unknown}'",
            spec.name
        )));
    }

    let mut bound = BTreeMap::new();
    for param in &spec.parameters {
        match args.get(&param.name) {
            Some(value) => {
                bound.insert(param.name.clone(), coerce(spec, param, value)?);
            }
            None => match &param.default {
                Some(default) => {
                    bound.insert(param.name.clone(), default.clone());
                }
                None if param.required => {
                    return Err(BraidError::Validation(format!(
                        "task '{}' is missing required parameter '{}'",
                        spec.name, param.name
                    )));
                }
                None => {}
            },
        }
    }
    Ok(bound)
}

fn coerce(spec: &TaskSpec, param: &ParamSpec, value: &Value) -> BraidResult<Value> {
    let coerced = match (param.kind, value) {
        (ParamKind::Json, v) => Some(v.clone()),
        (ParamKind::String, Value::String(_)) => Some(value.clone()),
        (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (ParamKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (ParamKind::Number, Value::Number(_)) => Some(value.clone()),
        (ParamKind::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
        (ParamKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamKind::Boolean, Value::String(s)) => s.trim().parse::<bool>().ok().map(Value::from),
        _ => None,
    };
    coerced.ok_or_else(|| {
        BraidError::Validation(format!(
            "task '{}': parameter '{}' expects {:?}, got {value}",
            spec.name, param.name, param.kind
        ))
    })
}

/// Builds the frame for running `task` under `config`.
pub fn frame_for(
    catalog: &Catalog,
    config: &str,
    task: &str,
    args: &BTreeMap<String, Value>,
) -> BraidResult<TaskFrame> {
    catalog.config(config)?;
    let spec = catalog.task(task)?;
    catalog.template(&spec.prompt_template)?;
    Ok(TaskFrame {
        task_name: spec.name.clone(),
        config: config.to_string(),
        prompt_template: spec.prompt_template.clone(),
        parameters: bind_parameters(spec, args)?,
        remaining_sequence: spec.task_sequence.clone(),
        pass_result_as: spec.pass_result_as.clone(),
        chain_config: spec.chain_config.clone(),
    })
}

/// The frame following `current` once it produced `result`, if any.
///
/// The result is bound under `pass_result_as`. If the next task declares
/// that parameter it is validated like any argument, otherwise it is passed
/// through as a string.
pub fn next_frame(
    catalog: &Catalog,
    current: &TaskFrame,
    result: &str,
) -> BraidResult<Option<TaskFrame>> {
    let Some((next_name, rest)) = current.remaining_sequence.split_first() else {
        return Ok(None);
    };
    let spec = catalog.task(next_name)?;
    let config = current
        .chain_config
        .clone()
        .unwrap_or_else(|| current.config.clone());

    let mut args = BTreeMap::new();
    let mut passthrough = None;
    if let Some(key) = &current.pass_result_as {
        let value = Value::String(result.to_string());
        if spec.parameters.iter().any(|p| &p.name == key) {
            args.insert(key.clone(), value);
        } else {
            passthrough = Some((key.clone(), value));
        }
    }

    let mut frame = frame_for(catalog, &config, next_name, &args)?;
    if let Some((key, value)) = passthrough {
        frame.parameters.insert(key, value);
    }
    frame.remaining_sequence.extend(rest.iter().cloned());
    if frame.pass_result_as.is_none() {
        frame.pass_result_as = current.pass_result_as.clone();
    }
    if frame.chain_config.is_none() {
        frame.chain_config = current.chain_config.clone();
    }
    Ok(Some(frame))
}
