//! Wire-ready table entries.
//!
//! A [`TableEntry`] carries only numeric IDs and encoded byte strings; it is
//! what a device session hands to its transport. Entries are plain values:
//! building one twice from the same rule yields equal entries.

use crate::types::{ActionId, FieldId, MatchKind, ParamId, TableId};
use serde::{Serialize, Serializer};
use std::fmt;

fn hex_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex(bytes))
}

/// Formats bytes as `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Encoded value of one match field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldMatchValue {
    Exact {
        #[serde(serialize_with = "hex_bytes")]
        value: Vec<u8>,
    },
    Lpm {
        #[serde(serialize_with = "hex_bytes")]
        value: Vec<u8>,
        prefix_len: u32,
    },
    Ternary {
        #[serde(serialize_with = "hex_bytes")]
        value: Vec<u8>,
        #[serde(serialize_with = "hex_bytes")]
        mask: Vec<u8>,
    },
    Range {
        #[serde(serialize_with = "hex_bytes")]
        low: Vec<u8>,
        #[serde(serialize_with = "hex_bytes")]
        high: Vec<u8>,
    },
    Optional {
        #[serde(serialize_with = "hex_bytes")]
        value: Vec<u8>,
    },
}

impl FieldMatchValue {
    pub fn kind(&self) -> MatchKind {
        match self {
            FieldMatchValue::Exact { .. } => MatchKind::Exact,
            FieldMatchValue::Lpm { .. } => MatchKind::Lpm,
            FieldMatchValue::Ternary { .. } => MatchKind::Ternary,
            FieldMatchValue::Range { .. } => MatchKind::Range,
            FieldMatchValue::Optional { .. } => MatchKind::Optional,
        }
    }
}

impl fmt::Display for FieldMatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldMatchValue::Exact { value } | FieldMatchValue::Optional { value } => {
                write!(f, "{}", to_hex(value))
            }
            FieldMatchValue::Lpm { value, prefix_len } => {
                write!(f, "{}/{}", to_hex(value), prefix_len)
            }
            FieldMatchValue::Ternary { value, mask } => {
                write!(f, "{}&&&{}", to_hex(value), to_hex(mask))
            }
            FieldMatchValue::Range { low, high } => {
                write!(f, "{}..{}", to_hex(low), to_hex(high))
            }
        }
    }
}

/// One match field of an entry's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldMatch {
    pub field_id: FieldId,
    #[serde(flatten)]
    pub value: FieldMatchValue,
}

/// One encoded action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ActionParam {
    pub param_id: ParamId,
    #[serde(serialize_with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// A fully encoded table entry.
///
/// Default entries have an empty match key and no priority. The match key
/// follows the table's field declaration order and action parameters follow
/// the action's parameter order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableEntry {
    pub table_id: TableId,
    pub match_key: Vec<FieldMatch>,
    pub is_default: bool,
    pub action_id: ActionId,
    pub action_params: Vec<ActionParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {} ", self.table_id)?;
        if self.is_default {
            f.write_str("default")?;
        } else {
            let key: Vec<String> = self
                .match_key
                .iter()
                .map(|m| format!("{}={}", m.field_id, m.value))
                .collect();
            write!(f, "[{}]", key.join(", "))?;
        }
        write!(f, " -> action {}", self.action_id)?;
        if let Some(priority) = self.priority {
            write!(f, " priority {}", priority)?;
        }
        Ok(())
    }
}
