/*
    types.rs - Identifiers, timestamps and rights

    Contains:
    - Record, ACL and user identifiers
    - Millisecond timestamps
    - The four access rights and the bit set holding them
*/

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest accepted record or ACL id, in bytes
pub const MAX_ID_LEN: usize = 256;

fn validate_id(kind: &str, id: &str) -> DbResult<()> {
    if id.is_empty() {
        return Err(DbError::invalid(format!("{} id must not be empty", kind)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(DbError::invalid(format!(
            "{} id exceeds {} bytes",
            kind, MAX_ID_LEN
        )));
    }
    if id.starts_with(':') {
        return Err(DbError::invalid(format!("{} id must not start with ':'", kind)));
    }
    if id.chars().any(char::is_control) {
        return Err(DbError::invalid(format!("{} id contains control characters", kind)));
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Validate and wrap a caller supplied id
            pub fn parse(id: impl Into<String>) -> DbResult<Self> {
                let id = id.into();
                validate_id($kind, &id)?;
                Ok($name(id))
            }

            /// Generate a fresh server-assigned id
            pub fn generate() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Unique identifier of a stored record
    RecordId,
    "record"
);

string_id!(
    /// Unique identifier of an ACL
    AclId,
    "acl"
);

/// Identifier of an authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp representing the current time
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    /// Current time, but never earlier than `previous`
    pub fn now_after(previous: Timestamp) -> Self {
        Timestamp::now().max(previous)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single access right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Right {
    Read,
    Write,
    Delete,
    Grant,
}

impl Right {
    pub const ALL: [Right; 4] = [Right::Read, Right::Write, Right::Delete, Right::Grant];

    fn bit(self) -> u8 {
        match self {
            Right::Read => 0b0001,
            Right::Write => 0b0010,
            Right::Delete => 0b0100,
            Right::Grant => 0b1000,
        }
    }

    fn letter(self) -> char {
        match self {
            Right::Read => 'r',
            Right::Write => 'w',
            Right::Delete => 'd',
            Right::Grant => 'g',
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Right::Read => "read",
            Right::Write => "write",
            Right::Delete => "delete",
            Right::Grant => "grant",
        };
        f.write_str(name)
    }
}

/// Set of rights held by one user on one ACL.
///
/// Rendered positionally as `rwdg`, with `-` for a missing right.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rights(u8);

impl Rights {
    pub const fn empty() -> Self {
        Rights(0)
    }

    pub const fn all() -> Self {
        Rights(0b1111)
    }

    pub fn with(self, right: Right) -> Self {
        Rights(self.0 | right.bit())
    }

    pub fn has(&self, right: Right) -> bool {
        self.0 & right.bit() != 0
    }

    /// True if every right in `other` is also in `self`
    pub fn contains(&self, other: Rights) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Rights) -> Self {
        Rights(self.0 | other.0)
    }

    pub fn difference(self, other: Rights) -> Self {
        Rights(self.0 & !other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Right> + '_ {
        Right::ALL.into_iter().filter(move |r| self.has(*r))
    }
}

impl From<Right> for Rights {
    fn from(right: Right) -> Self {
        Rights::empty().with(right)
    }
}

impl FromIterator<Right> for Rights {
    fn from_iter<I: IntoIterator<Item = Right>>(iter: I) -> Self {
        iter.into_iter().fold(Rights::empty(), Rights::with)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for right in Right::ALL {
            let c = if self.has(right) { right.letter() } else { '-' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl FromStr for Rights {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rights = Rights::empty();
        for c in s.chars() {
            rights = match c {
                'r' => rights.with(Right::Read),
                'w' => rights.with(Right::Write),
                'd' => rights.with(Right::Delete),
                'g' => rights.with(Right::Grant),
                '-' => rights,
                other => {
                    return Err(DbError::invalid(format!(
                        "unknown right '{}' in '{}'",
                        other, s
                    )))
                }
            };
        }
        Ok(rights)
    }
}

impl TryFrom<String> for Rights {
    type Error = DbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Rights> for String {
    fn from(rights: Rights) -> Self {
        rights.to_string()
    }
}

/// Sorting options for scans and queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}
