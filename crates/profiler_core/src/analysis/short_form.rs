//! Strict parsing of the short-form JSON a provider returns.
//!
//! There is no partial recovery: a missing or mistyped field fails the whole
//! parse with an error naming the field.

use serde_json::{Map, Value};

use crate::domain::CognitiveAnalysis;
use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("response JSON is not an object")]
    NotAnObject,
    #[error("response is missing the '{0}' field")]
    MissingField(&'static str),
    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl From<NormalizeError> for PortError {
    fn from(e: NormalizeError) -> Self {
        PortError::InvalidResponse(e.to_string())
    }
}

/// Removes a surrounding markdown code fence (```` ```json ... ``` ````), if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn field<'a>(object: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, NormalizeError> {
    object.get(name).ok_or(NormalizeError::MissingField(name))
}

fn string_list(object: &Map<String, Value>, name: &'static str) -> Result<Vec<String>, NormalizeError> {
    let wrong_type = NormalizeError::WrongType {
        field: name,
        expected: "an array of strings",
    };
    let items = field(object, name)?.as_array().ok_or_else(|| wrong_type.clone())?;
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(|| wrong_type.clone()))
        .collect()
}

/// Parses and validates `{score, characteristics, analysis, strengths, tendencies}`.
pub fn parse_cognitive_analysis(raw: &str) -> Result<CognitiveAnalysis, NormalizeError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| NormalizeError::InvalidJson(e.to_string()))?;
    let object = value.as_object().ok_or(NormalizeError::NotAnObject)?;

    let score = field(object, "score")?
        .as_f64()
        .ok_or(NormalizeError::WrongType {
            field: "score",
            expected: "a number",
        })?;
    let analysis = field(object, "analysis")?
        .as_str()
        .ok_or(NormalizeError::WrongType {
            field: "analysis",
            expected: "a string",
        })?
        .to_string();

    Ok(CognitiveAnalysis {
        score,
        characteristics: string_list(object, "characteristics")?,
        analysis,
        strengths: string_list(object, "strengths")?,
        tendencies: string_list(object, "tendencies")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "score": 118,
        "characteristics": ["Comfortable with tension"],
        "analysis": "Dense and careful.",
        "strengths": ["Precise distinctions"],
        "tendencies": ["Argues from first principles"]
    }"#;

    #[test]
    fn parses_a_well_formed_response() {
        let parsed = parse_cognitive_analysis(VALID).unwrap();
        assert_eq!(parsed.score, 118.0);
        assert_eq!(parsed.characteristics, vec!["Comfortable with tension"]);
        assert_eq!(parsed.analysis, "Dense and careful.");
    }

    #[test]
    fn accepts_a_fenced_response() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert!(parse_cognitive_analysis(&fenced).is_ok());
    }

    #[test]
    fn rejects_prose() {
        let err = parse_cognitive_analysis("The author is very clever.").unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidJson(_)));
    }

    #[test]
    fn rejects_non_objects() {
        assert_eq!(parse_cognitive_analysis("[1, 2]").unwrap_err(), NormalizeError::NotAnObject);
    }

    #[test]
    fn names_the_missing_field() {
        let err = parse_cognitive_analysis(
            r#"{"score": 100, "characteristics": [], "analysis": "x", "strengths": []}"#,
        )
        .unwrap_err();
        assert_eq!(err, NormalizeError::MissingField("tendencies"));
    }

    #[test]
    fn rejects_mistyped_fields() {
        let err = parse_cognitive_analysis(
            r#"{"score": "high", "characteristics": [], "analysis": "x", "strengths": [], "tendencies": []}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::WrongType {
                field: "score",
                expected: "a number"
            }
        );

        let err = parse_cognitive_analysis(
            r#"{"score": 90, "characteristics": ["a", 3], "analysis": "x", "strengths": [], "tendencies": []}"#,
        )
        .unwrap_err();
        assert!(matches!(err, NormalizeError::WrongType { field: "characteristics", .. }));
    }

    #[test]
    fn converts_into_an_invalid_response_port_error() {
        let err: PortError = NormalizeError::MissingField("score").into();
        assert!(matches!(err, PortError::InvalidResponse(msg) if msg.contains("score")));
    }
}
