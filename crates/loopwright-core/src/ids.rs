//! Identifier newtypes.
//!
//! Run, message, approval and pattern identifiers are UUID v4 strings validated
//! on parse. Span identifiers are plain counters scoped to a single run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when an identifier fails validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} format (expected UUID): '{value}'")]
pub struct IdError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new random identifier (UUID v4)
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Parse and validate an identifier from a string
            pub fn parse(id: impl AsRef<str>) -> Result<Self, IdError> {
                let s = id.as_ref();
                Uuid::parse_str(s).map_err(|_| IdError {
                    kind: $kind,
                    value: s.to_string(),
                })?;
                Ok(Self(s.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of one run of a worker
    RunId,
    "RunId"
);
uuid_id!(
    /// Identifier of a mailbox message
    MessageId,
    "MessageId"
);
uuid_id!(
    /// Identifier of a pending human approval
    ApprovalId,
    "ApprovalId"
);
uuid_id!(
    /// Identifier of a learned pattern
    PatternId,
    "PatternId"
);

/// Span identifier, monotonically generated within one run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SpanId(u64);

impl SpanId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
