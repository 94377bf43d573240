//! Branded ID newtypes.
//!
//! Every entity has a distinct ID type wrapping a `String`, so a persona ID
//! can never be passed where an execution ID is expected. Fresh IDs are
//! UUID v7 (time-ordered) via [`uuid::Uuid::now_v7`]; IDs arriving from the
//! wire or the database are wrapped as-is.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new random ID (UUID v7, time-ordered).
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

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
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
    /// Identifier of a persona (the reusable agent template).
    PersonaId
}

branded_id! {
    /// Identifier of one execution of a persona on a worker.
    ExecutionId
}

branded_id! {
    /// Identifier a worker chooses for itself in its `hello` frame.
    WorkerId
}

branded_id! {
    /// Identifier of a pending event row.
    EventId
}

branded_id! {
    /// Identifier of an event subscription.
    SubscriptionId
}

branded_id! {
    /// Identifier of a time- or rule-based trigger.
    TriggerId
}

branded_id! {
    /// Identifier of an encrypted persona credential.
    CredentialId
}

branded_id! {
    /// Identifier of a tool definition.
    ToolId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
