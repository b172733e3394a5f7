//! Loads the worker configuration file.
//!
//! The YAML may reference environment variables as `${VAR}` or
//! `${VAR:-default}`; they are expanded before parsing.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use pipeline::WorkerConfig;

/// Read, expand and parse a worker configuration file.
pub fn load_worker_config<P: AsRef<Path>>(path: P) -> Result<WorkerConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read worker config from {:?}", path.as_ref()))?;

    parse_worker_config(&content)
}

/// Expand and parse configuration text.
pub fn parse_worker_config(content: &str) -> Result<WorkerConfig> {
    let expanded = expand_env_vars(content)?;

    let config: WorkerConfig =
        serde_yaml::from_str(&expanded).with_context(|| "Failed to parse worker config YAML")?;

    Ok(config)
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => anyhow::bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }

            result.push_str(&resolve_var_expr(&var_expr)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}
