//! Branded ID newtypes.
//!
//! Runs, instances and threads are all identified by opaque strings. Wrapping
//! each in its own type keeps a run id from being passed where an instance id
//! is expected. Generated IDs are UUID v7 (time-ordered).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a single agent run.
    RunId
}

branded_id! {
    /// Identifier of a worker process that executes runs.
    InstanceId
}

branded_id! {
    /// Identifier of the thread (conversation) a run belongs to.
    ThreadId
}

impl InstanceId {
    /// Generate a short, human-friendly instance id (8 hex characters).
    #[must_use]
    pub fn short() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..8].to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_new_is_uuid_v7() {
        let id = RunId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn short_instance_id_is_eight_hex_chars() {
        let id = InstanceId::short();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn display_matches_inner() {
        let id = RunId::from("R1");
        assert_eq!(id.to_string(), "R1");
        assert_eq!(String::from(id), "R1");
    }

    #[test]
    fn serde_is_transparent() {
        let id = ThreadId::from("thread-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"thread-7\"");
        let back: ThreadId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
