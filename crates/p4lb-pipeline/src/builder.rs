//! Entry building: [`RuleRecord`] + [`PipelineSchema`] → [`TableEntry`].

use crate::entry::{ActionParam, FieldMatch, FieldMatchValue, TableEntry};
use crate::error::{Namespace, PipelineError, PipelineResult};
use crate::rules::{MatchValue, RuleRecord};
use crate::schema::{ActionSchema, FieldSchema, PipelineSchema, TableSchema};
use crate::types::MatchKind;
use crate::value::{self, Literal};
use tracing::debug;

/// Builds table entries against one schema.
#[derive(Debug, Clone, Copy)]
pub struct EntryBuilder<'a> {
    schema: &'a PipelineSchema,
}

impl<'a> EntryBuilder<'a> {
    pub fn new(schema: &'a PipelineSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &'a PipelineSchema {
        self.schema
    }

    /// Resolves every name in `rule` and encodes every value.
    pub fn build(&self, rule: &RuleRecord) -> PipelineResult<TableEntry> {
        if rule.is_ambiguous() {
            return Err(PipelineError::ambiguous(&rule.table));
        }

        let table = self.schema.table(&rule.table)?;
        let action = table.action(&rule.action)?;
        let action_params = encode_params(rule, action)?;

        if rule.is_default_action {
            if let Some(priority) = rule.priority {
                debug!(table = %table.name, priority, "Ignoring priority on default entry");
            }
            return Ok(TableEntry {
                table_id: table.id,
                match_key: Vec::new(),
                is_default: true,
                action_id: action.id,
                action_params,
                priority: None,
            });
        }

        // Reject names the table does not declare before encoding anything.
        for name in rule.match_fields.keys() {
            table.field(name)?;
        }

        let mut match_key = Vec::with_capacity(table.match_fields.len());
        for field in &table.match_fields {
            match rule.match_fields.get(&field.name) {
                Some(value) => match_key.push(FieldMatch {
                    field_id: field.id,
                    value: encode_match(field, value)?,
                }),
                None if field.match_kind == MatchKind::Exact => {
                    return Err(PipelineError::encoding(
                        format!("match field '{}'", field.name),
                        "exact match fields require a value",
                    ))
                }
                None => {}
            }
        }

        let priority = resolve_priority(rule, table)?;

        Ok(TableEntry {
            table_id: table.id,
            match_key,
            is_default: false,
            action_id: action.id,
            action_params,
            priority,
        })
    }
}

/// Builds one entry; shorthand for [`EntryBuilder::build`].
pub fn build(rule: &RuleRecord, schema: &PipelineSchema) -> PipelineResult<TableEntry> {
    EntryBuilder::new(schema).build(rule)
}

fn encode_params(rule: &RuleRecord, action: &ActionSchema) -> PipelineResult<Vec<ActionParam>> {
    for name in rule.action_params.keys() {
        if action.param(name).is_none() {
            return Err(PipelineError::unknown_scoped(
                Namespace::ActionParam,
                name,
                &action.name,
            ));
        }
    }

    action
        .params
        .iter()
        .map(|param| {
            let target = format!("action parameter '{}' of '{}'", param.name, action.name);
            let literal = rule
                .action_params
                .get(&param.name)
                .ok_or_else(|| PipelineError::encoding(&target, "no value given"))?;
            let value = value::encode(literal, param.bitwidth)
                .map_err(|e| PipelineError::encoding(&target, e))?;
            Ok(ActionParam {
                param_id: param.id,
                value,
            })
        })
        .collect()
}

fn encode_match(field: &FieldSchema, value: &MatchValue) -> PipelineResult<FieldMatchValue> {
    let target = || format!("match field '{}'", field.name);
    let encode = |literal: &Literal| {
        value::encode(literal, field.bitwidth).map_err(|e| PipelineError::encoding(target(), e))
    };

    match (field.match_kind, value) {
        (MatchKind::Exact, MatchValue::Scalar(v)) => Ok(FieldMatchValue::Exact { value: encode(v)? }),
        (MatchKind::Optional, MatchValue::Scalar(v)) => {
            Ok(FieldMatchValue::Optional { value: encode(v)? })
        }
        (MatchKind::Lpm, MatchValue::Pair(v, prefix)) => {
            let prefix_len = prefix
                .as_uint()
                .filter(|len| *len <= u128::from(field.bitwidth))
                .ok_or_else(|| {
                    PipelineError::encoding(
                        target(),
                        format!(
                            "prefix length {} exceeds the {}-bit field",
                            prefix, field.bitwidth
                        ),
                    )
                })? as u32;
            Ok(FieldMatchValue::Lpm {
                value: encode(v)?,
                prefix_len,
            })
        }
        (MatchKind::Ternary, MatchValue::Pair(v, mask)) => Ok(FieldMatchValue::Ternary {
            value: encode(v)?,
            mask: encode(mask)?,
        }),
        (MatchKind::Range, MatchValue::Pair(low, high)) => {
            let low = encode(low)?;
            let high = encode(high)?;
            // Same width, big-endian: byte order is numeric order.
            if low > high {
                return Err(PipelineError::encoding(
                    target(),
                    "range low bound is above its high bound",
                ));
            }
            Ok(FieldMatchValue::Range { low, high })
        }
        (kind, MatchValue::Scalar(_)) => Err(PipelineError::encoding(
            target(),
            format!("{} match expects a two-element value", kind),
        )),
        (kind, MatchValue::Pair(..)) => Err(PipelineError::encoding(
            target(),
            format!("{} match expects a single value", kind),
        )),
    }
}

fn resolve_priority(rule: &RuleRecord, table: &TableSchema) -> PipelineResult<Option<i32>> {
    if table.requires_priority() {
        match rule.priority {
            Some(priority) if priority > 0 => Ok(Some(priority)),
            Some(priority) => Err(PipelineError::encoding(
                format!("priority of table '{}'", table.name),
                format!("priority must be positive, got {}", priority),
            )),
            None => Err(PipelineError::encoding(
                format!("priority of table '{}'", table.name),
                "tables with ternary, range or optional fields require a priority",
            )),
        }
    } else {
        if let Some(priority) = rule.priority {
            debug!(table = %table.name, priority, "Ignoring priority on exact/LPM table");
        }
        Ok(None)
    }
}
