//! Pipeline error types.
//!
//! Everything that can go wrong between reading a schema descriptor or rule
//! batch and producing a wire-ready [`TableEntry`](crate::TableEntry) is a
//! [`PipelineError`]. None of these errors involve a device; they are all
//! detected locally before anything is sent.

use std::fmt;
use thiserror::Error;

/// The namespace a name was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Table,
    Action,
    MatchField,
    ActionParam,
    Counter,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Namespace::Table => "table",
            Namespace::Action => "action",
            Namespace::MatchField => "match field",
            Namespace::ActionParam => "action parameter",
            Namespace::Counter => "counter",
        };
        f.write_str(s)
    }
}

fn scope_suffix(scope: &Option<String>) -> String {
    match scope {
        Some(scope) => format!(" in '{}'", scope),
        None => String::new(),
    }
}

/// Error type for schema, rule and entry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The pipeline schema descriptor is malformed.
    #[error("Schema parse error: {message}")]
    SchemaParse { message: String },

    /// A name is not declared by the pipeline schema.
    #[error("Unknown {namespace} '{name}'{}", scope_suffix(.scope))]
    UnknownName {
        namespace: Namespace,
        name: String,
        /// Enclosing table or action, when the namespace is nested.
        scope: Option<String>,
    },

    /// A rule record is missing a required field or has a field of the
    /// wrong type.
    #[error("Malformed rule #{index}: {message}")]
    MalformedRule {
        /// Position of the record in its batch.
        index: usize,
        /// The offending field, if the problem is tied to one.
        field: Option<String>,
        message: String,
    },

    /// A rule sets both `default_action` and a non-empty `match`.
    #[error("Ambiguous rule for table '{table}': default_action is set together with a non-empty match")]
    AmbiguousRule { table: String },

    /// A value cannot be encoded for its field.
    #[error("Cannot encode {target}: {message}")]
    Encoding { target: String, message: String },

    /// A rule batch file cannot be read or is not a JSON object.
    #[error("Invalid rule batch {source_name}: {message}")]
    BatchFile { source_name: String, message: String },
}

impl PipelineError {
    /// Creates a schema parse error.
    pub fn schema_parse(message: impl Into<String>) -> Self {
        PipelineError::SchemaParse {
            message: message.into(),
        }
    }

    /// Creates an unknown name error for a top-level namespace.
    pub fn unknown_name(namespace: Namespace, name: impl Into<String>) -> Self {
        PipelineError::UnknownName {
            namespace,
            name: name.into(),
            scope: None,
        }
    }

    /// Creates an unknown name error for a name nested in `scope`.
    pub fn unknown_scoped(
        namespace: Namespace,
        name: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        PipelineError::UnknownName {
            namespace,
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    /// Creates a malformed rule error.
    pub fn malformed(index: usize, field: Option<&str>, message: impl Into<String>) -> Self {
        PipelineError::MalformedRule {
            index,
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    /// Creates an ambiguous rule error.
    pub fn ambiguous(table: impl Into<String>) -> Self {
        PipelineError::AmbiguousRule {
            table: table.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding(target: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Encoding {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a batch file error.
    pub fn batch_file(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::BatchFile {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is an unknown name in the given namespace.
    pub fn is_unknown(&self, namespace: Namespace) -> bool {
        matches!(self, PipelineError::UnknownName { namespace: ns, .. } if *ns == namespace)
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
