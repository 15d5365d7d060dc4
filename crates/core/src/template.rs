//! Query template rendering.
//!
//! Templates use `{{ name }}` placeholders. Supported names:
//! - `project_id` - the run's warehouse project
//! - `env` - the run's environment tag
//! - `var.NAME` - any resolved run variable

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::ConfigError;
use crate::run::RunContext;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Render `template` against a run context.
pub fn render(template: &str, ctx: &RunContext) -> Result<String, ConfigError> {
    let mut missing = None;

    let rendered = placeholder_re().replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name, ctx) {
            Some(value) => value.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(placeholder) => Err(ConfigError::Unresolved { placeholder }),
        None => Ok(rendered.into_owned()),
    }
}

/// Names of all placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn lookup<'a>(name: &str, ctx: &'a RunContext) -> Option<&'a str> {
    match name {
        "project_id" => ctx.project_id.as_deref(),
        "env" => Some(ctx.environment.as_str()),
        _ => name
            .strip_prefix("var.")
            .and_then(|key| ctx.variables.get(key))
            .map(String::as_str),
    }
}
