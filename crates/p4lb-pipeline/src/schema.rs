//! Pipeline schema resolution.
//!
//! Loads the P4Info descriptor (JSON form, as written by
//! `p4c --p4runtime-files foo.p4info.json`) and answers name → ID and
//! value-encoding questions for the entry builder. Every lookup fails closed:
//! an unknown name is an error, never a zero or default ID.
//!
//! Descriptor shape (trimmed):
//!
//! ```json
//! {
//!   "tables": [{
//!     "preamble": { "id": 33574068, "name": "MyIngress.ecmp_group", "alias": "ecmp_group" },
//!     "matchFields": [{ "id": 1, "name": "hdr.ipv4.dstAddr", "bitwidth": 32, "matchType": "LPM" }],
//!     "actionRefs": [{ "id": 16799317 }]
//!   }],
//!   "actions": [{
//!     "preamble": { "id": 16799317, "name": "MyIngress.set_ecmp_select", "alias": "set_ecmp_select" },
//!     "params": [{ "id": 1, "name": "ecmp_base", "bitwidth": 14 }]
//!   }],
//!   "counters": [{
//!     "preamble": { "id": 302003196, "name": "MyIngress.egress_counter", "alias": "egress_counter" },
//!     "size": "1024"
//!   }]
//! }
//! ```

use crate::error::{Namespace, PipelineError, PipelineResult};
use crate::types::{ActionId, CounterId, FieldId, MatchKind, ParamId, RawP4Id, TableId};
use crate::value::{self, Literal};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawP4Info {
    #[serde(default)]
    tables: Vec<RawTable>,
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    counters: Vec<RawCounter>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPreamble {
    #[serde(default)]
    id: RawP4Id,
    #[serde(default)]
    name: String,
    #[serde(default)]
    alias: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTable {
    #[serde(default)]
    preamble: RawPreamble,
    #[serde(default)]
    match_fields: Vec<RawMatchField>,
    #[serde(default)]
    action_refs: Vec<RawActionRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMatchField {
    #[serde(default)]
    id: RawP4Id,
    #[serde(default)]
    name: String,
    #[serde(default)]
    bitwidth: u32,
    #[serde(default)]
    match_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawActionRef {
    #[serde(default)]
    id: RawP4Id,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    preamble: RawPreamble,
    #[serde(default)]
    params: Vec<RawParam>,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    #[serde(default)]
    id: RawP4Id,
    #[serde(default)]
    name: String,
    #[serde(default)]
    bitwidth: u32,
}

#[derive(Debug, Deserialize)]
struct RawCounter {
    #[serde(default)]
    preamble: RawPreamble,
    /// int64 fields are strings in protobuf JSON, but hand-written
    /// descriptors often use plain numbers.
    #[serde(default)]
    size: Option<Value>,
}

/// A match field of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub id: FieldId,
    pub name: String,
    pub bitwidth: u32,
    pub match_kind: MatchKind,
}

/// A parameter of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSchema {
    pub id: ParamId,
    pub name: String,
    pub bitwidth: u32,
}

/// An action a table may bind entries to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSchema {
    pub id: ActionId,
    pub name: String,
    pub alias: Option<String>,
    /// Parameters in declaration order.
    pub params: Vec<ParamSchema>,
}

impl ActionSchema {
    /// Looks up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSchema> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// A match-action table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub id: TableId,
    pub name: String,
    pub alias: Option<String>,
    /// Match fields in declaration order. Entry match keys follow this order.
    pub match_fields: Vec<FieldSchema>,
    actions: BTreeMap<String, ActionSchema>,
    action_aliases: HashMap<String, String>,
}

impl TableSchema {
    /// Looks up a match field by name.
    pub fn field(&self, name: &str) -> PipelineResult<&FieldSchema> {
        self.match_fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| PipelineError::unknown_scoped(Namespace::MatchField, name, &self.name))
    }

    /// Looks up an action by full name or alias.
    pub fn action(&self, name: &str) -> PipelineResult<&ActionSchema> {
        self.actions
            .get(name)
            .or_else(|| {
                self.action_aliases
                    .get(name)
                    .and_then(|full| self.actions.get(full))
            })
            .ok_or_else(|| PipelineError::unknown_scoped(Namespace::Action, name, &self.name))
    }

    /// Returns the actions this table accepts, ordered by name.
    pub fn actions(&self) -> impl Iterator<Item = &ActionSchema> {
        self.actions.values()
    }

    /// Returns true if entries of this table must carry a priority.
    pub fn requires_priority(&self) -> bool {
        self.match_fields
            .iter()
            .any(|f| f.match_kind.requires_priority())
    }
}

/// A packet/byte counter array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSchema {
    pub id: CounterId,
    pub name: String,
    pub alias: Option<String>,
    /// Number of cells, when the descriptor declares it.
    pub size: Option<u64>,
}

/// Immutable pipeline schema, loaded once and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSchema {
    tables: BTreeMap<String, TableSchema>,
    table_aliases: HashMap<String, String>,
    counters: BTreeMap<String, CounterSchema>,
    counter_aliases: HashMap<String, String>,
}

impl PipelineSchema {
    /// Parses a P4Info JSON descriptor.
    pub fn load(descriptor: &[u8]) -> PipelineResult<Self> {
        let raw: RawP4Info = serde_json::from_slice(descriptor)
            .map_err(|e| PipelineError::schema_parse(format!("invalid P4Info JSON: {}", e)))?;
        Self::from_raw(raw)
    }

    /// Reads and parses a P4Info JSON descriptor from disk.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::schema_parse(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::load(&bytes)
    }

    fn from_raw(raw: RawP4Info) -> PipelineResult<Self> {
        let mut actions_by_id: HashMap<RawP4Id, ActionSchema> = HashMap::new();
        let mut action_names: BTreeMap<String, RawP4Id> = BTreeMap::new();
        for action in raw.actions {
            let schema = parse_action(action)?;
            let raw_id = schema.id.as_raw();
            if actions_by_id.contains_key(&raw_id) {
                return Err(PipelineError::schema_parse(format!(
                    "duplicate action id {}",
                    raw_id
                )));
            }
            if let Some(other) = action_names.insert(schema.name.clone(), raw_id) {
                return Err(PipelineError::schema_parse(format!(
                    "duplicate action name '{}' (ids {} and {})",
                    schema.name, other, raw_id
                )));
            }
            actions_by_id.insert(raw_id, schema);
        }

        let mut tables = BTreeMap::new();
        let mut table_aliases = HashMap::new();
        let mut table_ids = HashMap::new();
        for table in raw.tables {
            let schema = parse_table(table, &actions_by_id)?;
            register_id("table", schema.id.as_raw(), &schema.name, &mut table_ids)?;
            register_name(
                "table",
                &schema.name,
                schema.alias.as_deref(),
                &tables,
                &mut table_aliases,
            )?;
            tables.insert(schema.name.clone(), schema);
        }

        let mut counters = BTreeMap::new();
        let mut counter_aliases = HashMap::new();
        let mut counter_ids = HashMap::new();
        for counter in raw.counters {
            let schema = parse_counter(counter)?;
            register_id("counter", schema.id.as_raw(), &schema.name, &mut counter_ids)?;
            register_name(
                "counter",
                &schema.name,
                schema.alias.as_deref(),
                &counters,
                &mut counter_aliases,
            )?;
            counters.insert(schema.name.clone(), schema);
        }

        Ok(Self {
            tables,
            table_aliases,
            counters,
            counter_aliases,
        })
    }

    /// Looks up a table by full name or alias.
    pub fn table(&self, name: &str) -> PipelineResult<&TableSchema> {
        lookup(&self.tables, &self.table_aliases, name)
            .ok_or_else(|| PipelineError::unknown_name(Namespace::Table, name))
    }

    /// Looks up a counter by full name or alias.
    pub fn counter(&self, name: &str) -> PipelineResult<&CounterSchema> {
        lookup(&self.counters, &self.counter_aliases, name)
            .ok_or_else(|| PipelineError::unknown_name(Namespace::Counter, name))
    }

    /// Returns all tables, ordered by full name.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Returns all counters, ordered by full name.
    pub fn counters(&self) -> impl Iterator<Item = &CounterSchema> {
        self.counters.values()
    }

    pub fn resolve_table_id(&self, name: &str) -> PipelineResult<TableId> {
        Ok(self.table(name)?.id)
    }

    pub fn resolve_action_id(&self, table: &str, action: &str) -> PipelineResult<ActionId> {
        Ok(self.table(table)?.action(action)?.id)
    }

    pub fn resolve_counter_id(&self, name: &str) -> PipelineResult<CounterId> {
        Ok(self.counter(name)?.id)
    }

    /// Encodes `raw` for a match field of `table` at the field's bit-width.
    pub fn resolve_field_encoding(
        &self,
        table: &str,
        field: &str,
        raw: &Literal,
    ) -> PipelineResult<Vec<u8>> {
        let field = self.table(table)?.field(field)?;
        value::encode(raw, field.bitwidth)
            .map_err(|e| PipelineError::encoding(format!("match field '{}'", field.name), e))
    }
}

fn lookup<'a, T>(
    by_name: &'a BTreeMap<String, T>,
    aliases: &HashMap<String, String>,
    name: &str,
) -> Option<&'a T> {
    by_name
        .get(name)
        .or_else(|| aliases.get(name).and_then(|full| by_name.get(full)))
}

fn register_id(
    kind: &str,
    id: RawP4Id,
    name: &str,
    ids: &mut HashMap<RawP4Id, String>,
) -> PipelineResult<()> {
    match ids.insert(id, name.to_string()) {
        Some(previous) => Err(PipelineError::schema_parse(format!(
            "{} id {} is used by both '{}' and '{}'",
            kind, id, previous, name
        ))),
        None => Ok(()),
    }
}

fn register_name<T>(
    kind: &str,
    name: &str,
    alias: Option<&str>,
    existing: &BTreeMap<String, T>,
    aliases: &mut HashMap<String, String>,
) -> PipelineResult<()> {
    if existing.contains_key(name) {
        return Err(PipelineError::schema_parse(format!(
            "duplicate {} name '{}'",
            kind, name
        )));
    }
    if let Some(alias) = alias {
        if alias != name {
            if let Some(previous) = aliases.insert(alias.to_string(), name.to_string()) {
                return Err(PipelineError::schema_parse(format!(
                    "{} alias '{}' is used by both '{}' and '{}'",
                    kind, alias, previous, name
                )));
            }
        }
    }
    Ok(())
}

fn preamble_id<T: crate::types::P4EntityKind>(
    kind: &str,
    preamble: &RawPreamble,
) -> PipelineResult<crate::types::P4Id<T>> {
    if preamble.name.is_empty() {
        return Err(PipelineError::schema_parse(format!(
            "{} with id {} has no name",
            kind, preamble.id
        )));
    }
    crate::types::P4Id::from_raw(preamble.id).ok_or_else(|| {
        PipelineError::schema_parse(format!("{} '{}' has no id", kind, preamble.name))
    })
}

fn parse_action(raw: RawAction) -> PipelineResult<ActionSchema> {
    let id = preamble_id("action", &raw.preamble)?;
    let mut params: Vec<ParamSchema> = Vec::with_capacity(raw.params.len());
    for param in raw.params {
        let pid = ParamId::from_raw(param.id).ok_or_else(|| {
            PipelineError::schema_parse(format!(
                "param '{}' of action '{}' has no id",
                param.name, raw.preamble.name
            ))
        })?;
        if param.name.is_empty() || param.bitwidth == 0 {
            return Err(PipelineError::schema_parse(format!(
                "param {} of action '{}' needs a name and a non-zero bitwidth",
                param.id, raw.preamble.name
            )));
        }
        if params.iter().any(|p| p.name == param.name || p.id == pid) {
            return Err(PipelineError::schema_parse(format!(
                "duplicate param '{}' in action '{}'",
                param.name, raw.preamble.name
            )));
        }
        params.push(ParamSchema {
            id: pid,
            name: param.name,
            bitwidth: param.bitwidth,
        });
    }
    Ok(ActionSchema {
        id,
        name: raw.preamble.name,
        alias: raw.preamble.alias,
        params,
    })
}

fn parse_table(
    raw: RawTable,
    actions_by_id: &HashMap<RawP4Id, ActionSchema>,
) -> PipelineResult<TableSchema> {
    let id = preamble_id("table", &raw.preamble)?;
    let table_name = raw.preamble.name;

    let mut match_fields: Vec<FieldSchema> = Vec::with_capacity(raw.match_fields.len());
    for field in raw.match_fields {
        let fid = FieldId::from_raw(field.id).ok_or_else(|| {
            PipelineError::schema_parse(format!(
                "match field '{}' of table '{}' has no id",
                field.name, table_name
            ))
        })?;
        if field.name.is_empty() || field.bitwidth == 0 {
            return Err(PipelineError::schema_parse(format!(
                "match field {} of table '{}' needs a name and a non-zero bitwidth",
                field.id, table_name
            )));
        }
        let match_kind = field
            .match_type
            .as_deref()
            .ok_or_else(|| {
                PipelineError::schema_parse(format!(
                    "match field '{}' of table '{}' has no matchType",
                    field.name, table_name
                ))
            })?
            .parse::<MatchKind>()
            .map_err(PipelineError::schema_parse)?;
        if match_fields.iter().any(|f| f.name == field.name || f.id == fid) {
            return Err(PipelineError::schema_parse(format!(
                "duplicate match field '{}' in table '{}'",
                field.name, table_name
            )));
        }
        match_fields.push(FieldSchema {
            id: fid,
            name: field.name,
            bitwidth: field.bitwidth,
            match_kind,
        });
    }

    let mut actions = BTreeMap::new();
    let mut action_aliases = HashMap::new();
    for action_ref in raw.action_refs {
        let action = actions_by_id.get(&action_ref.id).ok_or_else(|| {
            PipelineError::schema_parse(format!(
                "table '{}' references undeclared action id {}",
                table_name, action_ref.id
            ))
        })?;
        // Action names are unique across the descriptor, so this is a repeated ref.
        if actions.contains_key(&action.name) {
            continue;
        }
        if let Some(alias) = action.alias.as_deref() {
            if alias != action.name {
                if let Some(previous) = action_aliases.insert(alias.to_string(), action.name.clone())
                {
                    return Err(PipelineError::schema_parse(format!(
                        "action alias '{}' in table '{}' is used by both '{}' and '{}'",
                        alias, table_name, previous, action.name
                    )));
                }
            }
        }
        actions.insert(action.name.clone(), action.clone());
    }

    Ok(TableSchema {
        id,
        name: table_name,
        alias: raw.preamble.alias,
        match_fields,
        actions,
        action_aliases,
    })
}

fn parse_counter(raw: RawCounter) -> PipelineResult<CounterSchema> {
    let id = preamble_id("counter", &raw.preamble)?;
    let size = match raw.size {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.as_u64().ok_or_else(|| {
            PipelineError::schema_parse(format!(
                "counter '{}' has invalid size {}",
                raw.preamble.name, n
            ))
        })?),
        Some(Value::String(s)) => Some(s.parse::<u64>().map_err(|_| {
            PipelineError::schema_parse(format!(
                "counter '{}' has invalid size '{}'",
                raw.preamble.name, s
            ))
        })?),
        Some(other) => {
            return Err(PipelineError::schema_parse(format!(
                "counter '{}' has invalid size {}",
                raw.preamble.name, other
            )))
        }
    };
    Ok(CounterSchema {
        id,
        name: raw.preamble.name,
        alias: raw.preamble.alias,
        size,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A trimmed-down version of the load-balancing switch's P4Info.
    pub(crate) const LOAD_BALANCE_P4INFO: &str = r#"{
      "pkgInfo": { "arch": "v1model" },
      "tables": [
        {
          "preamble": { "id": 33574068, "name": "MyIngress.ecmp_group", "alias": "ecmp_group" },
          "matchFields": [
            { "id": 1, "name": "hdr.ipv4.dstAddr", "bitwidth": 32, "matchType": "LPM" }
          ],
          "actionRefs": [ { "id": 16805608 }, { "id": 16799317 } ],
          "size": "1024"
        },
        {
          "preamble": { "id": 33593431, "name": "MyIngress.ecmp_nhop", "alias": "ecmp_nhop" },
          "matchFields": [
            { "id": 1, "name": "meta.ecmp_select", "bitwidth": 14, "matchType": "EXACT" }
          ],
          "actionRefs": [ { "id": 16805608 }, { "id": 16812204 } ]
        },
        {
          "preamble": { "id": 33612258, "name": "MyIngress.acl", "alias": "acl" },
          "matchFields": [
            { "id": 1, "name": "hdr.ipv4.srcAddr", "bitwidth": 32, "matchType": "TERNARY" },
            { "id": 2, "name": "hdr.tcp.dstPort", "bitwidth": 16, "matchType": "RANGE" }
          ],
          "actionRefs": [ { "id": 16805608 } ]
        }
      ],
      "actions": [
        { "preamble": { "id": 16805608, "name": "MyIngress.drop", "alias": "drop" } },
        {
          "preamble": { "id": 16799317, "name": "MyIngress.set_ecmp_select", "alias": "set_ecmp_select" },
          "params": [
            { "id": 1, "name": "ecmp_base", "bitwidth": 14 },
            { "id": 2, "name": "ecmp_count", "bitwidth": 14 }
          ]
        },
        {
          "preamble": { "id": 16812204, "name": "MyIngress.set_nhop", "alias": "set_nhop" },
          "params": [
            { "id": 1, "name": "nhop_dmac", "bitwidth": 48 },
            { "id": 2, "name": "nhop_ipv4", "bitwidth": 32 },
            { "id": 3, "name": "port", "bitwidth": 9 }
          ]
        }
      ],
      "counters": [
        {
          "preamble": { "id": 302003196, "name": "MyIngress.egress_counter", "alias": "egress_counter" },
          "spec": { "unit": "BOTH" },
          "size": "16"
        }
      ]
    }"#;

    pub(crate) fn load_balance_schema() -> PipelineSchema {
        PipelineSchema::load(LOAD_BALANCE_P4INFO.as_bytes()).unwrap()
    }

    #[test]
    fn test_load_resolves_ids() {
        let schema = load_balance_schema();
        assert_eq!(
            schema.resolve_table_id("MyIngress.ecmp_group").unwrap().as_raw(),
            33574068
        );
        assert_eq!(schema.resolve_table_id("ecmp_group").unwrap().as_raw(), 33574068);
        assert_eq!(
            schema
                .resolve_action_id("ecmp_nhop", "MyIngress.set_nhop")
                .unwrap()
                .as_raw(),
            16812204
        );
        assert_eq!(
            schema.resolve_action_id("ecmp_nhop", "set_nhop").unwrap().as_raw(),
            16812204
        );
        assert_eq!(
            schema.resolve_counter_id("egress_counter").unwrap().as_raw(),
            302003196
        );
        assert_eq!(schema.counter("egress_counter").unwrap().size, Some(16));
    }

    #[test]
    fn test_unknown_names_fail_closed() {
        let schema = load_balance_schema();
        assert!(schema
            .resolve_table_id("MyIngress.nope")
            .unwrap_err()
            .is_unknown(Namespace::Table));
        // set_nhop exists, but ecmp_group does not reference it.
        assert!(schema
            .resolve_action_id("ecmp_group", "set_nhop")
            .unwrap_err()
            .is_unknown(Namespace::Action));
        assert!(schema
            .resolve_counter_id("ingress_counter")
            .unwrap_err()
            .is_unknown(Namespace::Counter));
        assert!(schema
            .resolve_field_encoding("ecmp_group", "hdr.ipv4.srcAddr", &Literal::Int(1))
            .unwrap_err()
            .is_unknown(Namespace::MatchField));
    }

    #[test]
    fn test_field_encoding() {
        let schema = load_balance_schema();
        assert_eq!(
            schema
                .resolve_field_encoding("ecmp_group", "hdr.ipv4.dstAddr", &Literal::from("10.0.0.1"))
                .unwrap(),
            vec![10, 0, 0, 1]
        );
        let err = schema
            .resolve_field_encoding("ecmp_nhop", "meta.ecmp_select", &Literal::Int(1 << 14))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Encoding { .. }));
    }

    #[test]
    fn test_field_order_and_priority() {
        let schema = load_balance_schema();
        let acl = schema.table("acl").unwrap();
        let names: Vec<&str> = acl.match_fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["hdr.ipv4.srcAddr", "hdr.tcp.dstPort"]);
        assert!(acl.requires_priority());
        assert!(!schema.table("ecmp_group").unwrap().requires_priority());
    }

    #[test]
    fn test_malformed_descriptors() {
        assert!(matches!(
            PipelineSchema::load(b"{not json"),
            Err(PipelineError::SchemaParse { .. })
        ));

        let missing_id = r#"{"tables": [{"preamble": {"name": "t"}}]}"#;
        let err = PipelineSchema::load(missing_id.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("has no id"), "{}", err);

        let missing_match_type = r#"{"tables": [{"preamble": {"id": 1, "name": "t"},
            "matchFields": [{"id": 1, "name": "f", "bitwidth": 8}]}]}"#;
        assert!(PipelineSchema::load(missing_match_type.as_bytes()).is_err());

        let dangling_action = r#"{"tables": [{"preamble": {"id": 1, "name": "t"},
            "actionRefs": [{"id": 99}]}]}"#;
        let err = PipelineSchema::load(dangling_action.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("undeclared action"), "{}", err);

        let zero_width = r#"{"actions": [{"preamble": {"id": 5, "name": "a"},
            "params": [{"id": 1, "name": "p", "bitwidth": 0}]}]}"#;
        assert!(PipelineSchema::load(zero_width.as_bytes()).is_err());

        let duplicate_table = r#"{"tables": [
            {"preamble": {"id": 1, "name": "t"}},
            {"preamble": {"id": 2, "name": "t"}}]}"#;
        let err = PipelineSchema::load(duplicate_table.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate table"), "{}", err);
    }

    #[test]
    fn test_duplicate_action_name_with_other_id() {
        let descriptor = r#"{
            "tables": [{"preamble": {"id": 1, "name": "t"},
                "actionRefs": [{"id": 10}, {"id": 11}]}],
            "actions": [
                {"preamble": {"id": 10, "name": "MyIngress.drop"}},
                {"preamble": {"id": 11, "name": "MyIngress.drop"}}]}"#;
        let err = PipelineSchema::load(descriptor.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaParse { .. }));
        assert!(err.to_string().contains("duplicate action name"), "{}", err);
    }

    #[test]
    fn test_repeated_action_ref_is_tolerated() {
        let descriptor = r#"{
            "tables": [{"preamble": {"id": 1, "name": "t"},
                "actionRefs": [{"id": 10}, {"id": 10}]}],
            "actions": [{"preamble": {"id": 10, "name": "MyIngress.drop", "alias": "drop"}}]}"#;
        let schema = PipelineSchema::load(descriptor.as_bytes()).unwrap();
        assert_eq!(schema.table("t").unwrap().actions().count(), 1);
        assert_eq!(schema.resolve_action_id("t", "drop").unwrap().as_raw(), 10);
    }

    #[test]
    fn test_colliding_action_aliases() {
        let descriptor = r#"{
            "tables": [{"preamble": {"id": 1, "name": "t"},
                "actionRefs": [{"id": 10}, {"id": 11}]}],
            "actions": [
                {"preamble": {"id": 10, "name": "MyIngress.drop", "alias": "drop"}},
                {"preamble": {"id": 11, "name": "MyEgress.drop", "alias": "drop"}}]}"#;
        let err = PipelineSchema::load(descriptor.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaParse { .. }));
        assert!(err.to_string().contains("alias 'drop'"), "{}", err);
    }

    #[test]
    fn test_duplicate_table_id() {
        let descriptor = r#"{"tables": [
            {"preamble": {"id": 7, "name": "MyIngress.a"}},
            {"preamble": {"id": 7, "name": "MyIngress.b"}}]}"#;
        let err = PipelineSchema::load(descriptor.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaParse { .. }));
        assert!(err.to_string().contains("table id 7"), "{}", err);
    }

    #[test]
    fn test_duplicate_counter_id() {
        let descriptor = r#"{"counters": [
            {"preamble": {"id": 9, "name": "MyIngress.c1"}, "size": "4"},
            {"preamble": {"id": 9, "name": "MyIngress.c2"}, "size": "4"}]}"#;
        let err = PipelineSchema::load(descriptor.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaParse { .. }));
        assert!(err.to_string().contains("counter id 9"), "{}", err);
    }

    #[test]
    fn test_counter_size_must_be_unsigned() {
        for size in ["-1", "2.5", "\"-3\"", "\"lots\"", "true"] {
            let descriptor = format!(
                r#"{{"counters": [{{"preamble": {{"id": 9, "name": "c"}}, "size": {}}}]}}"#,
                size
            );
            let err = PipelineSchema::load(descriptor.as_bytes()).unwrap_err();
            assert!(
                matches!(err, PipelineError::SchemaParse { .. }),
                "size {}: {:?}",
                size,
                err
            );
        }

        let plain = r#"{"counters": [{"preamble": {"id": 9, "name": "c"}, "size": 8}]}"#;
        let schema = PipelineSchema::load(plain.as_bytes()).unwrap();
        assert_eq!(schema.counter("c").unwrap().size, Some(8));
    }

    #[test]
    fn test_empty_descriptor_is_valid() {
        let schema = PipelineSchema::load(b"{}").unwrap();
        assert_eq!(schema.tables().count(), 0);
        assert_eq!(schema.counters().count(), 0);
    }
}
