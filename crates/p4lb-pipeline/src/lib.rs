//! Pipeline schema resolution and table-entry building for P4 switches.
//!
//! This crate turns declarative rule files into wire-ready table entries
//! without talking to any device:
//!
//! - [`schema`]: loads a P4Info descriptor and resolves names to IDs
//! - [`rules`]: decodes rule batch documents into [`RuleRecord`]s
//! - [`builder`]: combines a rule and a schema into a [`TableEntry`]
//! - [`value`]: literal parsing and bit-width encoding
//! - [`profile`]: a schema bundled with the blobs pushed to devices
//!
//! # Example
//!
//! ```ignore
//! use p4lb_pipeline::{build, load_rule_batch_file, PipelineSchema};
//!
//! let schema = PipelineSchema::from_file("build/load_balance.p4info.json")?;
//! let batch = load_rule_batch_file("s1-runtime.json")?;
//! for record in batch.decode_each() {
//!     let entry = build(&record?, &schema)?;
//!     println!("{}", entry);
//! }
//! ```

pub mod builder;
pub mod entry;
pub mod error;
pub mod profile;
pub mod rules;
pub mod schema;
pub mod types;
pub mod value;

pub use builder::{build, EntryBuilder};
pub use entry::{ActionParam, FieldMatch, FieldMatchValue, TableEntry};
pub use error::{Namespace, PipelineError, PipelineResult};
pub use profile::PipelineProfile;
pub use rules::{
    decode, decode_each, load_rule_batch_file, parse_rule_batch, parse_rule_batch_str,
    MatchValue, RuleBatch, RuleRecord,
};
pub use schema::{ActionSchema, CounterSchema, FieldSchema, ParamSchema, PipelineSchema, TableSchema};
pub use types::{
    ActionId, ActionKind, CounterId, CounterKind, FieldId, MatchFieldKind, MatchKind, P4EntityKind,
    P4Id, ParamId, ParamKind, RawP4Id, TableId, TableKind,
};
pub use value::Literal;
