// Named text values substituted into prompts

//! # Variables
//!
//! A variable is a named string that prompt text can reference with a
//! placeholder token such as `{{ $topic }}` or `{ $topic }`. Names always
//! carry the leading `$` sigil, so the stored name is exactly what appears
//! inside the braces.

use serde::{Deserialize, Serialize};

/// Id of the variable every workspace starts with. It can be renamed and
/// edited but never deleted.
pub const DEFAULT_VARIABLE_ID: &str = "1";

/// Name given to the protected default variable.
pub const DEFAULT_VARIABLE_NAME: &str = "$default_var";

/// Leading character every variable name must carry.
pub const VARIABLE_SIGIL: char = '$';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Variable {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: String::new(),
        }
    }

    /// The built-in variable present in every fresh workspace.
    pub fn default_variable() -> Self {
        Self::new(DEFAULT_VARIABLE_ID, DEFAULT_VARIABLE_NAME)
    }

    pub fn is_protected(&self) -> bool {
        self.id == DEFAULT_VARIABLE_ID
    }

    /// Name without the sigil, as captured from a placeholder token.
    pub fn bare_name(&self) -> &str {
        self.name.strip_prefix(VARIABLE_SIGIL).unwrap_or(&self.name)
    }

    /// A valid name is the sigil followed by one or more ASCII letters,
    /// digits, `_` or `-`.
    pub fn is_valid_name(name: &str) -> bool {
        match name.strip_prefix(VARIABLE_SIGIL) {
            Some(rest) if !rest.is_empty() => rest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            _ => false,
        }
    }
}
