//! Structured scoping output: the only channel through which the agent
//! communicates what it intends to do and what it needs clarified.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Agent's self-reported certainty: green is ready to fix, yellow needs
/// clarification, red is unclear or out of scope.
pub enum Confidence {
    Green,
    Yellow,
    Red,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }

    fn from_raw(raw: Option<&Value>) -> Self {
        let Some(Value::String(text)) = raw else {
            return Self::Yellow;
        };
        match text.trim().to_ascii_lowercase().as_str() {
            "green" => Self::Green,
            "red" => Self::Red,
            // Absent, unrecognized, or non-string confidence defaults to
            // yellow: the dashboard must assume clarification is needed.
            _ => Self::Yellow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
/// Parsed scoping analysis produced by a scoping session.
pub struct ScopingResult {
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub confidence_reason: String,
    #[serde(default)]
    pub current_behavior: String,
    #[serde(default)]
    pub requested_fix: String,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub tests_needed: String,
    #[serde(default)]
    pub action_plan: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
}

impl ScopingResult {
    pub fn confidence_or_default(&self) -> Confidence {
        self.confidence.unwrap_or(Confidence::Yellow)
    }
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        _ => String::new(),
    }
}

fn coerce_string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.clone()),
                _ => None,
            })
            .collect(),
        // A bare string for a list field wraps to a single-element list.
        Some(Value::String(text)) => vec![text.clone()],
        _ => Vec::new(),
    }
}

/// Total coercion of a raw structured-output value into a `ScopingResult`.
/// Never fails: any malformed field degrades to its default, and non-object
/// input yields an all-default result with yellow confidence.
pub fn parse_scoping_result(raw: &Value) -> ScopingResult {
    let object = raw.as_object();
    let field = |name: &str| object.and_then(|map| map.get(name));
    ScopingResult {
        confidence: Some(Confidence::from_raw(field("confidence"))),
        confidence_reason: coerce_string(field("confidence_reason")),
        current_behavior: coerce_string(field("current_behavior")),
        requested_fix: coerce_string(field("requested_fix")),
        files_to_modify: coerce_string_list(field("files_to_modify")),
        tests_needed: coerce_string(field("tests_needed")),
        action_plan: coerce_string_list(field("action_plan")),
        risks: coerce_string_list(field("risks")),
        open_questions: coerce_string_list(field("open_questions")),
    }
}

/// Derives the dashboard step checklist from a scoping action plan.
pub fn steps_from_plan(result: &ScopingResult) -> Vec<crate::issue::StepItem> {
    result
        .action_plan
        .iter()
        .enumerate()
        .map(|(index, label)| crate::issue::StepItem {
            index,
            label: label.clone(),
            completed: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_scoping_result, steps_from_plan, Confidence};
    use serde_json::{json, Value};

    #[test]
    fn unit_parse_scoping_result_reads_well_formed_output() {
        let parsed = parse_scoping_result(&json!({
            "confidence": "green",
            "confidence_reason": "clear repro",
            "requested_fix": "guard the nil case",
            "files_to_modify": ["src/parser.rs"],
            "action_plan": ["add guard", "add test"],
            "open_questions": [],
        }));
        assert_eq!(parsed.confidence, Some(Confidence::Green));
        assert_eq!(parsed.confidence_reason, "clear repro");
        assert_eq!(parsed.files_to_modify, vec!["src/parser.rs"]);
        assert_eq!(parsed.action_plan.len(), 2);
        assert!(parsed.open_questions.is_empty());
    }

    #[test]
    fn unit_parse_scoping_result_is_total_on_degenerate_input() {
        for raw in [
            Value::Null,
            json!("just a string"),
            json!([1, 2, 3]),
            json!({"confidence": 7, "action_plan": {"a": 1}, "requested_fix": []}),
        ] {
            let parsed = parse_scoping_result(&raw);
            assert_eq!(parsed.confidence, Some(Confidence::Yellow));
            assert!(parsed.requested_fix.is_empty());
            assert!(parsed.action_plan.is_empty());
        }
    }

    #[test]
    fn unit_parse_scoping_result_defaults_unrecognized_confidence_to_yellow() {
        let parsed = parse_scoping_result(&json!({"confidence": "chartreuse"}));
        assert_eq!(parsed.confidence, Some(Confidence::Yellow));
        let uppercase = parse_scoping_result(&json!({"confidence": "GREEN"}));
        assert_eq!(uppercase.confidence, Some(Confidence::Green));
    }

    #[test]
    fn unit_parse_scoping_result_wraps_bare_string_list_fields() {
        let parsed = parse_scoping_result(&json!({"open_questions": "which env?"}));
        assert_eq!(parsed.open_questions, vec!["which env?"]);
    }

    #[test]
    fn functional_parse_scoping_result_is_idempotent_on_valid_input() {
        let raw = json!({
            "confidence": "red",
            "confidence_reason": "no repro",
            "risks": ["data migration"],
        });
        let first = parse_scoping_result(&raw);
        let reencoded = serde_json::to_value(&first).expect("result should reserialize");
        let second = parse_scoping_result(&reencoded);
        assert_eq!(first, second);
    }

    #[test]
    fn unit_steps_from_plan_preserves_order_and_marks_incomplete() {
        let parsed = parse_scoping_result(&json!({"action_plan": ["one", "two"]}));
        let steps = steps_from_plan(&parsed);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].index, 0);
        assert_eq!(steps[1].label, "two");
        assert!(steps.iter().all(|step| !step.completed));
    }
}
