//! Shell creation request.

use serde::{Deserialize, Serialize};

/// What a caller declares when creating a shell.
///
/// Only the outbound stream list is mandatory; everything else has a
/// default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellDeclaration {
    /// Space-delimited outbound stream names, e.g. `"stdout stderr"`.
    #[serde(default)]
    pub output_streams: Option<String>,

    /// Space-delimited inbound stream names. Defaults to `stdin`.
    #[serde(default)]
    pub input_streams: Option<String>,

    /// Whether stream payloads are chunk-compressed.
    #[serde(default)]
    pub is_compressed: bool,
}

impl ShellDeclaration {
    /// Declare a shell with the given outbound streams.
    #[must_use]
    pub fn new(output_streams: impl Into<String>) -> Self {
        Self {
            output_streams: Some(output_streams.into()),
            ..Self::default()
        }
    }

    /// Enable or disable payload compression.
    #[must_use]
    pub const fn compressed(mut self, is_compressed: bool) -> Self {
        self.is_compressed = is_compressed;
        self
    }

    /// Set the inbound stream names.
    #[must_use]
    pub fn input_streams(mut self, streams: impl Into<String>) -> Self {
        self.input_streams = Some(streams.into());
        self
    }
}

/// Split a space-delimited stream declaration into names.
///
/// Runs of spaces do not produce empty names.
#[must_use]
pub fn split_stream_names(declaration: &str) -> Vec<String> {
    declaration
        .split(' ')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_stream_names() {
        assert_eq!(split_stream_names("stdout stderr"), ["stdout", "stderr"]);
        assert_eq!(split_stream_names("  stdout   pr "), ["stdout", "pr"]);
        assert!(split_stream_names("   ").is_empty());
    }

    #[test]
    fn test_builder() {
        let decl = ShellDeclaration::new("stdout").compressed(true).input_streams("stdin pr");
        assert_eq!(decl.output_streams.as_deref(), Some("stdout"));
        assert_eq!(decl.input_streams.as_deref(), Some("stdin pr"));
        assert!(decl.is_compressed);
    }
}
