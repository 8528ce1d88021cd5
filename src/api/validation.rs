use thiserror::Error;

use super::models::{TaskQuery, TurnstileQuery};
use crate::tasks::{TaskId, TurnstileInput};

const MAX_URL_LEN: usize = 2048;
const MAX_FIELD_LEN: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryValidationError {
    #[error("missing required parameter '{0}'")]
    Missing(&'static str),
    #[error("parameter '{0}' exceeds {1} characters")]
    TooLong(&'static str, usize),
    #[error("'{0}' is not a task id")]
    MalformedId(String),
}

fn required(value: Option<String>, name: &'static str, limit: usize) -> Result<String, QueryValidationError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(QueryValidationError::Missing(name))?;
    if value.len() > limit {
        return Err(QueryValidationError::TooLong(name, limit));
    }
    Ok(value)
}

fn optional(value: Option<String>, name: &'static str) -> Result<Option<String>, QueryValidationError> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) if v.len() > MAX_FIELD_LEN => Err(QueryValidationError::TooLong(name, MAX_FIELD_LEN)),
        other => Ok(other),
    }
}

/// Shape a `/turnstile` query into challenge input. Syntax of the URL,
/// site key and proxy is checked by the solver.
pub fn turnstile_input(query: TurnstileQuery) -> Result<TurnstileInput, QueryValidationError> {
    Ok(TurnstileInput {
        url: required(query.url, "url", MAX_URL_LEN)?,
        sitekey: required(query.sitekey, "sitekey", MAX_FIELD_LEN)?,
        action: optional(query.action, "action")?,
        cdata: optional(query.cdata, "cdata")?,
        pagedata: optional(query.pagedata, "pagedata")?,
        proxy: optional(query.proxy, "proxy")?,
    })
}

pub fn task_id(query: TaskQuery) -> Result<TaskId, QueryValidationError> {
    let raw = required(query.id, "id", 64)?;
    TaskId::parse(&raw).ok_or(QueryValidationError::MalformedId(raw))
}
