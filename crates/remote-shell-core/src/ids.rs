//! Identifiers for shells, commands and backend sessions.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh session token.
///
/// Tokens are random v4 UUIDs in upper-case hyphenated form, which is how
/// WS-Management shells name their shell and command ids.
fn new_token() -> String {
    let mut buf = Uuid::encode_buffer();
    Uuid::new_v4()
        .hyphenated()
        .encode_upper(&mut buf)
        .to_owned()
}

/// Shell identifier, unique for the lifetime of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShellId(String);

impl ShellId {
    /// Generate a new unique shell id.
    #[must_use]
    pub fn generate() -> Self {
        Self(new_token())
    }

    /// Borrow the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ShellId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ShellId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ShellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Command identifier, unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Generate a new unique command id.
    #[must_use]
    pub fn generate() -> Self {
        Self(new_token())
    }

    /// Borrow the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CommandId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token a backend hands out when it accepts a shell or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(u64);

impl BackendHandle {
    /// Wrap a backend-chosen token.
    #[must_use]
    pub const fn new(token: u64) -> Self {
        Self(token)
    }

    /// The raw token.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Which session a backend request belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// A shell-level request (begin shell).
    Shell { shell_id: ShellId },
    /// A command-level request (begin command, receive).
    Command {
        shell_id: ShellId,
        command_id: CommandId,
    },
}

impl SessionKind {
    /// The shell this request belongs to.
    #[must_use]
    pub const fn shell_id(&self) -> &ShellId {
        match self {
            Self::Shell { shell_id } | Self::Command { shell_id, .. } => shell_id,
        }
    }

    /// The command this request belongs to, if any.
    #[must_use]
    pub const fn command_id(&self) -> Option<&CommandId> {
        match self {
            Self::Shell { .. } => None,
            Self::Command { command_id, .. } => Some(command_id),
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell { shell_id } => write!(f, "shell {shell_id}"),
            Self::Command {
                shell_id,
                command_id,
            } => write!(f, "command {command_id} on shell {shell_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        let ids: HashSet<ShellId> = (0..1000).map(|_| ShellId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_id_format() {
        let id = CommandId::generate();
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(id.as_str(), id.as_str().to_uppercase());
    }

    #[test]
    fn test_session_kind_accessors() {
        let kind = SessionKind::Command {
            shell_id: "S".into(),
            command_id: "C".into(),
        };
        assert_eq!(kind.shell_id().as_str(), "S");
        assert_eq!(kind.command_id().map(CommandId::as_str), Some("C"));
        assert_eq!(kind.to_string(), "command C on shell S");
    }
}
