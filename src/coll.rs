//! Database/collection namespace handling.

use std::fmt;

/// The longest `<db>.<collection>` string the wire protocol accepts.
pub const MAX_NAMESPACE_LENGTH: usize = 128;

/// The `<db>.<collection>` addressing pair a write is aimed at.
///
/// Legacy wire messages carry the two parts joined with a dot; write commands
/// carry the collection part alone and route to the database separately.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The database half of the addressing string.
    pub db: String,

    /// The collection half of the addressing string.
    pub coll: String,
}

impl Namespace {
    /// Builds the namespace addressing `coll` within `db`.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Joins the two halves into the dotted form legacy wire messages carry.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.db, self.coll)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}
