/// Literal `{PLACEHOLDER}` templating for the cluster creation documents
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Placeholder name to replacement value
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
    /// Names also replaced when they appear as a bare word, without braces
    bare: BTreeSet<String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value for `{name}`
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Add a value for `{name}` that also replaces `name` standing alone as a word
    ///
    /// Older cluster templates carry some tokens without braces.
    pub fn with_bare(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.bare.insert(name.clone());
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Length of the token starting at byte `pos` of `text` and its value, if any
    fn match_at(&self, text: &str, pos: usize) -> Option<(usize, &str)> {
        let rest = &text[pos..];
        if let Some(after) = rest.strip_prefix('{') {
            let close = after.find('}')?;
            return self.get(&after[..close]).map(|value| (close + 2, value));
        }

        if text[..pos].chars().next_back().is_some_and(is_word_char) {
            return None;
        }
        self.bare.iter().find_map(|name| {
            let tail = rest.strip_prefix(name.as_str())?;
            if tail.chars().next().is_some_and(is_word_char) {
                return None;
            }
            self.get(name).map(|value| (name.len(), value))
        })
    }
}

/// A text document containing `{NAME}` placeholders
#[derive(Debug, Clone)]
pub struct Template {
    source: Option<PathBuf>,
    text: String,
}

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            source: None,
            text: text.into(),
        }
    }

    /// Load a template file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template file at {}", path.display()))?;
        Ok(Self {
            source: Some(path.to_path_buf()),
            text,
        })
    }

    /// Where the template was loaded from, for error messages
    pub fn describe(&self) -> String {
        match &self.source {
            Some(path) => path.display().to_string(),
            None => "<inline template>".to_string(),
        }
    }

    /// Replace every `{NAME}` that has a value in `substitutions`
    ///
    /// Placeholders without a value stay in the output untouched. Replacement
    /// values are never re-scanned, so a value that itself looks like a
    /// placeholder is emitted literally.
    pub fn render(&self, substitutions: &Substitutions) -> String {
        let text = self.text.as_str();
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let mut pos = 0;

        while let Some(c) = text[pos..].chars().next() {
            match substitutions.match_at(text, pos) {
                Some((len, value)) => {
                    out.push_str(&text[copied..pos]);
                    out.push_str(value);
                    pos += len;
                    copied = pos;
                }
                None => pos += c.len_utf8(),
            }
        }
        out.push_str(&text[copied..]);
        out
    }

    /// Render and fail if any `{NAME}` placeholder is left in the output
    pub fn render_strict(&self, substitutions: &Substitutions) -> Result<String> {
        let rendered = self.render(substitutions);
        let leftover = unresolved_placeholders(&rendered);
        if !leftover.is_empty() {
            anyhow::bail!(
                "unresolved placeholders in {}: {}",
                self.describe(),
                leftover.join(", ")
            );
        }
        Ok(rendered)
    }
}

/// All distinct `{NAME}` tokens (upper-case letters, digits, underscores) in `text`
pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                let token = format!("{{{}}}", &after[..close]);
                if !found.contains(&token) {
                    found.push(token);
                }
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }
    found
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
