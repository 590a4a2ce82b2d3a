//! Relationship metadata.
//!
//! Each entity class declares, per related class, which side it sits on
//! (`has one` / `has many`). Combining both declarations yields the resolved
//! [`RelationKind`], which decides where the foreign-key columns live.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// One side of a relation declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// `has one Other`: this class stores the other class's key.
    One,
    /// `has many Other`
    Many,
}

impl Side {
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::One => "one",
            Side::Many => "many",
        }
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "one" => Ok(Side::One),
            "many" => Ok(Side::Many),
            other => Err(Error::broken(
                other,
                "malformed @has, expected one or many",
            )),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved relation between two classes, seen from the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// This side holds the foreign-key columns.
    OneToMany,
    /// The other side holds the foreign-key columns.
    ManyToOne,
    /// A junction table holds both sides' keys.
    ManyToMany,
}

impl RelationKind {
    /// Combine both declarations; ONE/ONE is not a valid relation.
    pub fn resolve(this_to_other: Side, other_to_this: Side) -> Option<Self> {
        match (this_to_other, other_to_this) {
            (Side::One, Side::One) => None,
            (Side::One, Side::Many) => Some(RelationKind::OneToMany),
            (Side::Many, Side::One) => Some(RelationKind::ManyToOne),
            (Side::Many, Side::Many) => Some(RelationKind::ManyToMany),
        }
    }

    /// The same relation seen from the other class.
    pub const fn reverse(self) -> Self {
        match self {
            RelationKind::OneToMany => RelationKind::ManyToOne,
            RelationKind::ManyToOne => RelationKind::OneToMany,
            RelationKind::ManyToMany => RelationKind::ManyToMany,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::OneToMany => "one_to_many",
            RelationKind::ManyToOne => "many_to_one",
            RelationKind::ManyToMany => "many_to_many",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
