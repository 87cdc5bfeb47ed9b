use crate::errors::ModelError;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(Arc::from(id.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identity of the migration target (e.g. a site id). At most one
    /// migration may be active per target.
    TargetId
);

string_id!(
    /// Correlates every invocation of one logical migration.
    ProcessId
);

string_id!(
    /// Identifier of a pipeline task.
    TaskId
);

string_id!(
    /// Identifier of a dependency a task can be gated on.
    DependencyKey
);

impl ProcessId {
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Identifier of an upload session.
///
/// Session ids name scratch files on disk, so they are restricted to ASCII
/// alphanumerics, `-` and `_`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(Arc<str>);

const MAX_SESSION_ID_LEN: usize = 128;

impl SessionId {
    pub fn parse(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into();

        if id.is_empty() {
            return Err(ModelError::InvalidIdentifier {
                value: id,
                reason: "session id cannot be empty",
            });
        }

        if id.len() > MAX_SESSION_ID_LEN {
            return Err(ModelError::InvalidIdentifier {
                value: id,
                reason: "session id is too long",
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ModelError::InvalidIdentifier {
                value: id,
                reason: "session id may only contain ASCII letters, digits, '-' and '_'",
            });
        }

        Ok(Self(Arc::from(id)))
    }

    /// Derives the session id of a target, one upload session per target.
    pub fn for_target(target: &TargetId) -> Result<Self, ModelError> {
        Self::parse(format!("target-{}", target.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_rejects_path_traversal() {
        assert!(SessionId::parse("../etc/passwd").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("x".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    #[test]
    fn session_id_accepts_safe_names() {
        let id = SessionId::parse("site-42_upload").unwrap();
        assert_eq!(id.as_str(), "site-42_upload");
    }

    #[test]
    fn session_id_derived_from_target() {
        let id = SessionId::for_target(&TargetId::new("42")).unwrap();
        assert_eq!(id.as_str(), "target-42");
    }

    #[test]
    fn session_id_deserialization_validates() {
        let ok: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<SessionId>("\"a b\"").is_err());
    }
}
