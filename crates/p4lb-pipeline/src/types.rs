//! Type-safe P4 entity ID wrappers.
//!
//! P4Info assigns every table, action, match field, action parameter and
//! counter a numeric ID. These wrappers keep the namespaces apart at compile
//! time, so a table ID can never be passed where an action ID is expected.

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::str::FromStr;

/// Raw P4Runtime ID type (`uint32` in P4Info).
pub type RawP4Id = u32;

/// Marker trait for P4 entity kinds.
pub trait P4EntityKind: Send + Sync + 'static {
    /// Returns the entity name used in logs and error messages.
    fn type_name() -> &'static str;
}

/// A type-safe P4 entity ID.
///
/// IDs are never zero: P4Info reserves 0 as "unset", and a zero ID sent to a
/// switch would address nothing (or the wrong thing). [`P4Id::from_raw`]
/// therefore rejects it.
///
/// # Examples
///
/// ```
/// use p4lb_pipeline::{ActionId, TableId};
///
/// let table = TableId::from_raw(33574068).unwrap();
/// let action = ActionId::from_raw(16799317).unwrap();
/// assert_eq!(table.as_raw(), 33574068);
/// assert!(TableId::from_raw(0).is_none());
///
/// // This would fail to compile:
/// // fn takes_table(t: TableId) {}
/// // takes_table(action);
/// # let _ = action;
/// ```
#[derive(Clone, Copy)]
pub struct P4Id<T: P4EntityKind> {
    raw: RawP4Id,
    _marker: PhantomData<T>,
}

impl<T: P4EntityKind> P4Id<T> {
    /// Creates an ID from a raw value, returning `None` for 0.
    pub fn from_raw(raw: RawP4Id) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Returns the raw ID value.
    pub const fn as_raw(&self) -> RawP4Id {
        self.raw
    }
}

impl<T: P4EntityKind> fmt::Debug for P4Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::type_name(), self.raw)
    }
}

impl<T: P4EntityKind> fmt::Display for P4Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl<T: P4EntityKind> PartialEq for P4Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: P4EntityKind> Eq for P4Id<T> {}

impl<T: P4EntityKind> Hash for P4Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: P4EntityKind> PartialOrd for P4Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: P4EntityKind> Ord for P4Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: P4EntityKind> Serialize for P4Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.raw)
    }
}

macro_rules! define_p4_kind {
    ($kind:ident, $alias:ident, $name:literal) => {
        #[doc = concat!("Marker type for ", $name, " IDs.")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $kind;

        impl P4EntityKind for $kind {
            fn type_name() -> &'static str {
                $name
            }
        }

        #[doc = concat!("Type-safe ", $name, " ID.")]
        pub type $alias = P4Id<$kind>;
    };
}

define_p4_kind!(TableKind, TableId, "Table");
define_p4_kind!(ActionKind, ActionId, "Action");
define_p4_kind!(MatchFieldKind, FieldId, "MatchField");
define_p4_kind!(ParamKind, ParamId, "Param");
define_p4_kind!(CounterKind, CounterId, "Counter");

/// How a match field is compared against packet header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchKind {
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
}

impl MatchKind {
    /// Returns true if entries in a table using this match kind need a
    /// priority to break ties between overlapping keys.
    pub fn requires_priority(&self) -> bool {
        matches!(self, MatchKind::Ternary | MatchKind::Range | MatchKind::Optional)
    }

    /// Returns the P4Info spelling of this match kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "EXACT",
            MatchKind::Lpm => "LPM",
            MatchKind::Ternary => "TERNARY",
            MatchKind::Range => "RANGE",
            MatchKind::Optional => "OPTIONAL",
        }
    }
}

impl FromStr for MatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EXACT" => Ok(MatchKind::Exact),
            "LPM" => Ok(MatchKind::Lpm),
            "TERNARY" => Ok(MatchKind::Ternary),
            "RANGE" => Ok(MatchKind::Range),
            "OPTIONAL" => Ok(MatchKind::Optional),
            _ => Err(format!("Unsupported match type: {}", s)),
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
