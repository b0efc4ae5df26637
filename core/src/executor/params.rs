//! Schema checks for named script parameters.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde_json::Value;

use crate::error::ExecutionError;

use super::types::ParameterDef;

fn invalid(name: &str, reason: impl Into<String>) -> ExecutionError {
    ExecutionError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Check `params` against `schema`. Parameters the schema does not declare
/// are rejected.
pub fn validate_parameters(
    schema: &[ParameterDef],
    params: &BTreeMap<String, Value>,
) -> Result<(), ExecutionError> {
    let declared: HashSet<&str> = schema.iter().map(|d| d.name.as_str()).collect();
    if let Some(unknown) = params.keys().find(|k| !declared.contains(k.as_str())) {
        return Err(invalid(unknown, "parameter is not declared by the script"));
    }

    for def in schema {
        match params.get(&def.name) {
            None | Some(Value::Null) if def.required => {
                return Err(invalid(&def.name, "required parameter is missing"));
            }
            None | Some(Value::Null) => {}
            Some(value) => check_value(def, value)?,
        }
    }
    Ok(())
}

fn check_value(def: &ParameterDef, value: &Value) -> Result<(), ExecutionError> {
    let name = def.name.as_str();
    if !def.kind.matches(value) {
        return Err(invalid(name, format!("expected {}", def.kind.as_str())));
    }

    if let Some(allowed) = &def.allowed {
        if !allowed.contains(value) {
            return Err(invalid(name, format!("value {value} is not one of the allowed values")));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = def.min {
            if n < min {
                return Err(invalid(name, format!("{n} is below the minimum {min}")));
            }
        }
        if let Some(max) = def.max {
            if n > max {
                return Err(invalid(name, format!("{n} is above the maximum {max}")));
            }
        }
    }

    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = def.min_length {
            if len < min {
                return Err(invalid(name, format!("length {len} is shorter than {min}")));
            }
        }
        if let Some(max) = def.max_length {
            if len > max {
                return Err(invalid(name, format!("length {len} is longer than {max}")));
            }
        }
    }

    if let (Some(pattern), Some(s)) = (&def.pattern, value.as_str()) {
        let re = Regex::new(pattern)
            .map_err(|e| invalid(name, format!("invalid pattern '{pattern}': {e}")))?;
        if !re.is_match(s) {
            return Err(invalid(name, format!("value does not match pattern '{pattern}'")));
        }
    }

    Ok(())
}
