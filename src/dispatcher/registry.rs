//! Prefix to command mapping.

use tracing::warn;

/// Character every command starts with.
pub const COMMAND_SIGIL: char = '/';

/// Immutable map from text prefixes to commands.
///
/// Longer prefixes are tried first so `/no-participo` wins over `/no`;
/// prefixes of equal length keep their registration order.
#[derive(Debug, Clone)]
pub struct CommandRegistry<C> {
    entries: Vec<(String, C)>,
}

/// Collects prefixes before the registry is frozen.
#[derive(Debug)]
pub struct RegistryBuilder<C> {
    entries: Vec<(String, C)>,
}

impl<C> Default for RegistryBuilder<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C: Copy> RegistryBuilder<C> {
    /// Maps `prefix` to `command`. Re-registering a prefix keeps the first mapping.
    #[must_use]
    pub fn register(mut self, prefix: impl Into<String>, command: C) -> Self {
        let prefix = prefix.into();
        if prefix.is_empty() {
            warn!("Ignoring empty command prefix");
        } else if self.entries.iter().any(|(p, _)| *p == prefix) {
            warn!(%prefix, "Ignoring duplicate command prefix");
        } else {
            self.entries.push((prefix, command));
        }
        self
    }

    #[must_use]
    pub fn build(mut self) -> CommandRegistry<C> {
        // Stable sort keeps registration order among equal lengths.
        self.entries
            .sort_by(|(a, _), (b, _)| b.chars().count().cmp(&a.chars().count()));
        CommandRegistry {
            entries: self.entries,
        }
    }
}

impl<C: Copy> CommandRegistry<C> {
    #[must_use]
    pub fn builder() -> RegistryBuilder<C> {
        RegistryBuilder::default()
    }

    /// Finds the command whose prefix starts `text`.
    #[must_use]
    pub fn lookup(&self, text: &str) -> Option<C> {
        let text = text.trim_start();
        self.entries
            .iter()
            .find(|(prefix, _)| text.starts_with(prefix.as_str()))
            .map(|&(_, command)| command)
    }

    /// Registered prefixes in lookup order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(prefix, _)| prefix.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `text` looks like a command at all.
#[must_use]
pub fn is_command(text: &str) -> bool {
    text.trim_start().starts_with(COMMAND_SIGIL)
}

/// First whitespace separated token of `text`, e.g. `/sortea` of `/sortea now`.
#[must_use]
pub fn command_token(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or_default()
}
