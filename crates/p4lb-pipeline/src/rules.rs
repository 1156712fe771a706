//! Rule decoding.
//!
//! Rule batches are JSON documents in the runtime-file format used by the
//! P4 tutorials:
//!
//! ```json
//! {
//!   "target": "bmv2",
//!   "p4info": "build/load_balance.p4.p4info.txt",
//!   "bmv2_json": "build/load_balance.json",
//!   "table_entries": [
//!     {
//!       "table": "MyIngress.ecmp_group",
//!       "match": { "hdr.ipv4.dstAddr": ["10.0.0.1", 32] },
//!       "action_name": "MyIngress.set_ecmp_select",
//!       "action_params": { "ecmp_base": 0, "ecmp_count": 2 }
//!     }
//!   ]
//! }
//! ```
//!
//! Decoding only checks shape; names are resolved later against a schema.

use crate::error::{PipelineError, PipelineResult};
use crate::value::Literal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// A match value as written in a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchValue {
    /// A single value (exact and optional fields).
    Scalar(Literal),
    /// A two-element value. LPM: value and prefix length. Ternary: value and
    /// mask. Range: low and high.
    Pair(Literal, Literal),
}

/// A validated, schema-independent rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    /// Position of the record in its batch.
    pub index: usize,
    pub table: String,
    pub match_fields: BTreeMap<String, MatchValue>,
    pub is_default_action: bool,
    pub action: String,
    pub action_params: BTreeMap<String, Literal>,
    pub priority: Option<i32>,
}

impl RuleRecord {
    /// Returns true if the rule sets the default flag together with a
    /// non-empty match.
    pub fn is_ambiguous(&self) -> bool {
        self.is_default_action && !self.match_fields.is_empty()
    }
}

/// Decodes every record, failing on the first malformed one.
pub fn decode(raw_records: &[Value]) -> PipelineResult<Vec<RuleRecord>> {
    raw_records
        .iter()
        .enumerate()
        .map(|(index, raw)| decode_record(index, raw))
        .collect()
}

/// Decodes every record independently, one result per input record.
pub fn decode_each(raw_records: &[Value]) -> Vec<PipelineResult<RuleRecord>> {
    raw_records
        .iter()
        .enumerate()
        .map(|(index, raw)| decode_record(index, raw))
        .collect()
}

/// Decodes a single record at position `index`.
pub fn decode_record(index: usize, raw: &Value) -> PipelineResult<RuleRecord> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PipelineError::malformed(index, None, "rule must be a JSON object"))?;

    let table = required_str(index, obj, "table")?;
    let action = required_str(index, obj, "action_name")?;

    let is_default_action = match obj.get("default_action").or_else(|| obj.get("isDefaultAction")) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(PipelineError::malformed(
                index,
                Some("default_action"),
                "field 'default_action' must be a boolean",
            ))
        }
    };

    let mut match_fields = BTreeMap::new();
    match obj.get("match") {
        None | Some(Value::Null) => {}
        Some(Value::Object(fields)) => {
            for (name, value) in fields {
                match_fields.insert(name.clone(), decode_match_value(index, name, value)?);
            }
        }
        Some(_) => {
            return Err(PipelineError::malformed(
                index,
                Some("match"),
                "field 'match' must be an object",
            ))
        }
    }

    let mut action_params = BTreeMap::new();
    match obj.get("action_params") {
        None | Some(Value::Null) => {}
        Some(Value::Object(params)) => {
            for (name, value) in params {
                let literal = Literal::from_json(value).ok_or_else(|| {
                    PipelineError::malformed(
                        index,
                        Some("action_params"),
                        format!(
                            "action parameter '{}' must be a non-negative integer or a string",
                            name
                        ),
                    )
                })?;
                action_params.insert(name.clone(), literal);
            }
        }
        Some(_) => {
            return Err(PipelineError::malformed(
                index,
                Some("action_params"),
                "field 'action_params' must be an object",
            ))
        }
    }

    let priority = match obj.get("priority") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(
            n.as_i64()
                .and_then(|p| i32::try_from(p).ok())
                .ok_or_else(|| {
                    PipelineError::malformed(
                        index,
                        Some("priority"),
                        format!("priority {} is not a 32-bit integer", n),
                    )
                })?,
        ),
        Some(_) => {
            return Err(PipelineError::malformed(
                index,
                Some("priority"),
                "field 'priority' must be an integer",
            ))
        }
    };

    Ok(RuleRecord {
        index,
        table,
        match_fields,
        is_default_action,
        action,
        action_params,
        priority,
    })
}

fn required_str(index: usize, obj: &Map<String, Value>, key: &str) -> PipelineResult<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(PipelineError::malformed(
            index,
            Some(key),
            format!("field '{}' must not be empty", key),
        )),
        None | Some(Value::Null) => Err(PipelineError::malformed(
            index,
            Some(key),
            format!("missing required field '{}'", key),
        )),
        Some(_) => Err(PipelineError::malformed(
            index,
            Some(key),
            format!("field '{}' must be a string", key),
        )),
    }
}

fn decode_match_value(index: usize, field: &str, value: &Value) -> PipelineResult<MatchValue> {
    let literal = |v: &Value| {
        Literal::from_json(v).ok_or_else(|| {
            PipelineError::malformed(
                index,
                Some("match"),
                format!(
                    "match field '{}' must hold non-negative integers or strings",
                    field
                ),
            )
        })
    };
    match value {
        Value::Array(items) if items.len() == 2 => {
            Ok(MatchValue::Pair(literal(&items[0])?, literal(&items[1])?))
        }
        Value::Array(items) => Err(PipelineError::malformed(
            index,
            Some("match"),
            format!(
                "match field '{}' must be a scalar or a two-element list, got {} elements",
                field,
                items.len()
            ),
        )),
        other => Ok(MatchValue::Scalar(literal(other)?)),
    }
}

/// A parsed rule batch document.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleBatch {
    /// Where the batch came from, for reporting.
    pub source: String,
    pub target: Option<String>,
    pub p4info: Option<String>,
    pub bmv2_json: Option<String>,
    /// Raw, undecoded records.
    pub entries: Vec<Value>,
}

impl RuleBatch {
    /// Decodes every record independently.
    pub fn decode_each(&self) -> Vec<PipelineResult<RuleRecord>> {
        decode_each(&self.entries)
    }
}

/// Parses a rule batch from an already-loaded JSON document.
pub fn parse_rule_batch(document: &Value, source: &str) -> PipelineResult<RuleBatch> {
    let obj = document
        .as_object()
        .ok_or_else(|| PipelineError::batch_file(source, "document must be a JSON object"))?;

    let header = |key: &str| -> PipelineResult<Option<String>> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(PipelineError::batch_file(
                source,
                format!("'{}' must be a string", key),
            )),
        }
    };

    let entries = match obj.get("table_entries") {
        None | Some(Value::Null) => {
            debug!(source = %source, "Rule batch has no table_entries");
            Vec::new()
        }
        Some(Value::Array(entries)) => entries.clone(),
        Some(_) => {
            return Err(PipelineError::batch_file(
                source,
                "'table_entries' must be a list",
            ))
        }
    };

    Ok(RuleBatch {
        source: source.to_string(),
        target: header("target")?,
        p4info: header("p4info")?,
        bmv2_json: header("bmv2_json")?,
        entries,
    })
}

/// Parses a rule batch from JSON text.
pub fn parse_rule_batch_str(text: &str, source: &str) -> PipelineResult<RuleBatch> {
    let document: Value = serde_json::from_str(text)
        .map_err(|e| PipelineError::batch_file(source, format!("invalid JSON: {}", e)))?;
    parse_rule_batch(&document, source)
}

/// Reads and parses a rule batch file.
pub fn load_rule_batch_file(path: impl AsRef<Path>) -> PipelineResult<RuleBatch> {
    let path = path.as_ref();
    let source = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::batch_file(&source, e.to_string()))?;
    parse_rule_batch_str(&text, &source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_decode_keyed_rule() {
        let records = decode(&[json!({
            "table": "MyIngress.ecmp_group",
            "match": { "hdr.ipv4.dstAddr": ["10.0.0.1", 32] },
            "action_name": "MyIngress.set_ecmp_select",
            "action_params": { "ecmp_base": 0, "ecmp_count": 2 }
        })])
        .unwrap();

        assert_eq!(records.len(), 1);
        let rule = &records[0];
        assert_eq!(rule.index, 0);
        assert_eq!(rule.table, "MyIngress.ecmp_group");
        assert!(!rule.is_default_action);
        assert_eq!(
            rule.match_fields["hdr.ipv4.dstAddr"],
            MatchValue::Pair(Literal::from("10.0.0.1"), Literal::Int(32))
        );
        assert_eq!(rule.action_params["ecmp_count"], Literal::Int(2));
        assert_eq!(rule.priority, None);
    }

    #[test]
    fn test_decode_default_rule_both_spellings() {
        for key in ["default_action", "isDefaultAction"] {
            let mut raw = json!({
                "table": "MyIngress.ecmp_group",
                "action_name": "MyIngress.drop",
                "action_params": {}
            });
            raw[key] = json!(true);
            let records = decode(&[raw]).unwrap();
            assert!(records[0].is_default_action, "{}", key);
            assert!(records[0].match_fields.is_empty());
        }
    }

    #[test]
    fn test_missing_required_fields() {
        let err = decode(&[
            json!({"table": "t", "action_name": "a"}),
            json!({"action_name": "a"}),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            PipelineError::malformed(1, Some("table"), "missing required field 'table'")
        );

        let err = decode_record(5, &json!({"table": "t"})).unwrap_err();
        assert_eq!(err.to_string(), "Malformed rule #5: missing required field 'action_name'");
    }

    #[test]
    fn test_wrong_types_are_malformed() {
        let cases = [
            json!({"table": 1, "action_name": "a"}),
            json!({"table": "t", "action_name": "a", "match": [1, 2]}),
            json!({"table": "t", "action_name": "a", "match": {"f": [1, 2, 3]}}),
            json!({"table": "t", "action_name": "a", "match": {"f": -1}}),
            json!({"table": "t", "action_name": "a", "action_params": {"p": true}}),
            json!({"table": "t", "action_name": "a", "priority": "high"}),
            json!({"table": "t", "action_name": "a", "priority": 1u64 << 40}),
            json!({"table": "t", "action_name": "a", "default_action": "yes"}),
            json!("not an object"),
        ];
        for case in cases {
            assert!(
                matches!(decode_record(0, &case), Err(PipelineError::MalformedRule { .. })),
                "{}",
                case
            );
        }
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let rule = decode_record(
            0,
            &json!({"table": "t", "action_name": "a", "comment": "x", "priority": 10}),
        )
        .unwrap();
        assert_eq!(rule.priority, Some(10));
    }

    #[test]
    fn test_decode_each_keeps_order_and_isolates_failures() {
        let results = decode_each(&[
            json!({"table": "t", "action_name": "a"}),
            json!({"table": "t"}),
            json!({"table": "u", "action_name": "b"}),
        ]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().index, 2);
    }

    #[test]
    fn test_parse_batch_header_and_entries() {
        let batch = parse_rule_batch(
            &json!({
                "target": "bmv2",
                "p4info": "build/load_balance.p4.p4info.txt",
                "bmv2_json": "build/load_balance.json",
                "table_entries": [{"table": "t", "action_name": "a"}]
            }),
            "s1-runtime.json",
        )
        .unwrap();
        assert_eq!(batch.target.as_deref(), Some("bmv2"));
        assert_eq!(batch.bmv2_json.as_deref(), Some("build/load_balance.json"));
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.decode_each().len(), 1);
    }

    #[test]
    fn test_absent_table_entries_is_empty() {
        let batch = parse_rule_batch(&json!({"target": "bmv2"}), "empty.json").unwrap();
        assert!(batch.entries.is_empty());
    }

    #[test]
    fn test_invalid_batch_documents() {
        assert!(matches!(
            parse_rule_batch(&json!([1, 2]), "list.json"),
            Err(PipelineError::BatchFile { .. })
        ));
        assert!(matches!(
            parse_rule_batch(&json!({"table_entries": {}}), "obj.json"),
            Err(PipelineError::BatchFile { .. })
        ));
        assert!(parse_rule_batch_str("{", "broken.json").is_err());
    }

    #[test]
    fn test_load_rule_batch_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"table_entries": [{{"table": "t", "action_name": "a"}}]}}"#
        )
        .unwrap();
        let batch = load_rule_batch_file(file.path()).unwrap();
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.source, file.path().display().to_string());

        let missing = load_rule_batch_file("/nonexistent/rules.json").unwrap_err();
        assert!(matches!(missing, PipelineError::BatchFile { .. }));
    }
}
