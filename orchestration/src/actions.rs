//! Mapping raw agent output to typed mechanism actions
//!
//! Parsing is two-stage: first a JSON object is recovered from the raw output
//! (structured payload, fenced code block or the outermost `{...}` span), then
//! the object is mapped onto the mechanism's action type. Any failure is an
//! [`ActionParseError`]; callers substitute a safe default for that agent.

use crate::reasoning::RawOutput;
use environments::{
    MarketBet, Outcome, PredictionMarketAction, ResearchAction, ResearchSummary, SummaryContent,
    SummaryFormat,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
    static ref BARE_JSON: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

#[derive(Debug, Error)]
pub enum ActionParseError {
    #[error("agent produced no output")]
    MissingOutput,

    #[error("no JSON object found in output")]
    NoJson,

    #[error("invalid JSON in output: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Stage one: recover a JSON object from raw output
pub fn extract_json(raw: &RawOutput) -> Result<Map<String, Value>, ActionParseError> {
    if let Some(Value::Object(map)) = &raw.json {
        return Ok(map.clone());
    }

    let candidate = FENCED_JSON
        .captures(&raw.text)
        .and_then(|c| c.get(1))
        .or_else(|| BARE_JSON.find(&raw.text))
        .map(|m| m.as_str())
        .ok_or(ActionParseError::NoJson)?;

    match serde_json::from_str(candidate)? {
        Value::Object(map) => Ok(map),
        _ => Err(ActionParseError::NoJson),
    }
}

/// Map output onto a market action; `default_event` is used when no event id is given
pub fn parse_market_action(
    raw: Option<&RawOutput>,
    default_event: &str,
) -> Result<PredictionMarketAction, ActionParseError> {
    let raw = raw.ok_or(ActionParseError::MissingOutput)?;
    let json = extract_json(raw)?;

    let action_type = json
        .get("action_type")
        .and_then(Value::as_str)
        .ok_or(ActionParseError::MissingField("action_type"))?;

    if action_type.eq_ignore_ascii_case("hold") {
        return Ok(PredictionMarketAction::Hold);
    }
    if !action_type.eq_ignore_ascii_case("bet") {
        return Err(ActionParseError::InvalidField {
            field: "action_type",
            value: action_type.to_string(),
        });
    }

    let event_id = json
        .get("event_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_event)
        .to_string();

    let outcome = match json.get("outcome") {
        Some(Value::String(s)) => Outcome::option(s.trim()),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Outcome::Value)
            .ok_or(ActionParseError::InvalidField {
                field: "outcome",
                value: n.to_string(),
            })?,
        Some(Value::Bool(b)) => Outcome::option(if *b { "Yes" } else { "No" }),
        Some(other) => {
            return Err(ActionParseError::InvalidField {
                field: "outcome",
                value: other.to_string(),
            })
        }
        None => return Err(ActionParseError::MissingField("outcome")),
    };

    let stake = number_field(&json, "stake")?.ok_or(ActionParseError::MissingField("stake"))?;
    let price = number_field(&json, "price")?;

    Ok(PredictionMarketAction::Bet(MarketBet {
        event_id,
        outcome,
        stake,
        price,
    }))
}

/// Map output onto a search action
pub fn parse_search_action(
    raw: Option<&RawOutput>,
    default_num_results: usize,
) -> Result<ResearchAction, ActionParseError> {
    let raw = raw.ok_or(ActionParseError::MissingOutput)?;
    let json = extract_json(raw)?;

    let query = json
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or(ActionParseError::MissingField("query"))?;

    let num_results = match number_field(&json, "num_results")? {
        Some(n) if n >= 1.0 => n as usize,
        Some(n) => {
            return Err(ActionParseError::InvalidField {
                field: "num_results",
                value: n.to_string(),
            })
        }
        None => default_num_results,
    };

    Ok(ResearchAction::search(query, num_results))
}

/// Map output onto a summary action in the configured format.
///
/// Text summaries accept any non-empty output; structured summaries need a JSON
/// object, optionally nested under `content`.
pub fn parse_summary_action(
    raw: Option<&RawOutput>,
    format: SummaryFormat,
) -> Result<ResearchAction, ActionParseError> {
    let raw = raw.ok_or(ActionParseError::MissingOutput)?;

    let content = match format {
        SummaryFormat::Text => {
            let text = match extract_json(raw) {
                Ok(json) => json
                    .get("content")
                    .or_else(|| json.get("summary"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.text.clone()),
                Err(_) => raw.text.clone(),
            };
            if text.trim().is_empty() {
                return Err(ActionParseError::MissingOutput);
            }
            SummaryContent::Text(text)
        }
        SummaryFormat::Structured => {
            let mut json = extract_json(raw)?;
            let body = match json.remove("content") {
                Some(Value::Object(inner)) => inner,
                _ => json,
            };
            let summary: ResearchSummary = serde_json::from_value(Value::Object(body))?;
            SummaryContent::Structured(summary)
        }
    };

    Ok(ResearchAction::summary(content))
}

/// Summary used when an agent's output cannot be parsed
pub fn empty_summary(format: SummaryFormat) -> ResearchAction {
    match format {
        SummaryFormat::Structured => {
            ResearchAction::summary(SummaryContent::Structured(ResearchSummary::default()))
        }
        SummaryFormat::Text => ResearchAction::summary(SummaryContent::Text(String::new())),
    }
}

/// A number, or a string holding one
fn number_field(json: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, ActionParseError> {
    match json.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ActionParseError::InvalidField {
                field,
                value: s.clone(),
            }),
        Some(other) => Err(ActionParseError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}
