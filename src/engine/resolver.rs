//! # Variable Resolver
//!
//! Substitutes placeholder tokens in prompt text. Two spellings are accepted,
//! with optional whitespace inside the braces:
//!
//! ```text
//! {{ $topic }}      { $topic }
//! {{ $step1.action2.output }}
//! ```
//!
//! A name that matches a known variable becomes that variable's value. A
//! name of the form `stepN.actionM.output` (1-based) is a back-reference to
//! the output of an earlier action in the same run. Anything else is left
//! exactly as written.
//!
//! ## Rules
//!
//! - One scan per call. Substituted values are never re-scanned, so a value
//!   that itself looks like a token is inserted verbatim.
//! - A back-reference is only honoured when `N - 1` is strictly less than the
//!   index of the step being resolved. Forward, self and out-of-range
//!   references become the empty string and are reported in
//!   [`Resolution::rejected`].
//! - Without a run every back-reference becomes the empty string.
//!
//! ## Rust Learning Notes:
//!
//! The token regexes are compiled once through `lazy_static!`. `Regex` is
//! `Sync`, so every resolver in every task shares the same compiled program.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt;

use crate::models::{Run, Variable};

lazy_static! {
    /// `{{ $name }}` or `{ $name }`; group 1 or 2 holds the bare name.
    static ref TOKEN_RE: Regex =
        Regex::new(r"\{\{\s*\$([^\s{}]+)\s*\}\}|\{\s*\$([^\s{}]+)\s*\}").expect("valid token pattern");
    static ref BACK_REF_RE: Regex =
        Regex::new(r"^step(\d+)\.action(\d+)\.output$").expect("valid back-reference pattern");
}

/// Resolved text plus a note for every back-reference that was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub text: String,
    pub rejected: Vec<String>,
}

/// A token found in text, for preview listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Variable(String),
    /// 1-based step and action numbers as written.
    BackReference { step: usize, action: usize },
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Variable(name) => write!(f, "${}", name),
            Placeholder::BackReference { step, action } => {
                write!(f, "output of step {} action {}", step, action)
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Classes {
    variables: bool,
    back_references: bool,
}

pub struct Resolver<'a> {
    variables: HashMap<&'a str, &'a str>,
    run: Option<(&'a Run, usize)>,
}

impl<'a> Resolver<'a> {
    pub fn new(variables: &'a [Variable]) -> Self {
        let mut map = HashMap::with_capacity(variables.len());
        for var in variables {
            map.entry(var.bare_name()).or_insert(var.value.as_str());
        }
        Self {
            variables: map,
            run: None,
        }
    }

    /// Resolve back-references against `run` on behalf of the step at
    /// `current_step_index` (0-based).
    pub fn with_run(mut self, run: &'a Run, current_step_index: usize) -> Self {
        self.run = Some((run, current_step_index));
        self
    }

    /// Substitute variables and back-references in one pass.
    pub fn resolve(&self, text: &str) -> Resolution {
        self.substitute(
            text,
            Classes {
                variables: true,
                back_references: true,
            },
        )
    }

    /// Substitute variables only; back-reference tokens are kept for a
    /// later, run-aware pass.
    pub fn resolve_variables(&self, text: &str) -> String {
        self.substitute(
            text,
            Classes {
                variables: true,
                back_references: false,
            },
        )
        .text
    }

    /// Substitute back-references only.
    pub fn resolve_back_references(&self, text: &str) -> Resolution {
        self.substitute(
            text,
            Classes {
                variables: false,
                back_references: true,
            },
        )
    }

    fn substitute(&self, text: &str, classes: Classes) -> Resolution {
        if !text.contains('{') {
            return Resolution {
                text: text.to_string(),
                rejected: Vec::new(),
            };
        }

        let mut rejected = Vec::new();
        let resolved = TOKEN_RE.replace_all(text, |caps: &Captures| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();

            if let Some(back_ref) = BACK_REF_RE.captures(name) {
                if !classes.back_references {
                    return whole.to_string();
                }
                return self.back_reference(&back_ref[1], &back_ref[2], name, &mut rejected);
            }

            if classes.variables {
                if let Some(value) = self.variables.get(name) {
                    return value.to_string();
                }
            }
            whole.to_string()
        });

        Resolution {
            text: resolved.into_owned(),
            rejected,
        }
    }

    fn back_reference(
        &self,
        step: &str,
        action: &str,
        token: &str,
        rejected: &mut Vec<String>,
    ) -> String {
        let Some((run, current)) = self.run else {
            return String::new();
        };

        let (step, action) = match (step.parse::<usize>(), action.parse::<usize>()) {
            (Ok(s), Ok(a)) if s > 0 && a > 0 => (s, a),
            _ => {
                rejected.push(format!("${}: step and action numbers start at 1", token));
                return String::new();
            }
        };

        if step - 1 >= current {
            rejected.push(format!(
                "${}: step {} is not before the current step {}",
                token,
                step,
                current + 1
            ));
            return String::new();
        }

        match run.action(step - 1, action - 1) {
            Ok(action_run) => action_run.output.clone(),
            Err(_) => {
                rejected.push(format!("${}: no such action in run {}", token, run.id));
                String::new()
            }
        }
    }
}

/// Resolve `text` in one call. `prior` pairs a run with the 0-based index of
/// the step the text belongs to.
pub fn resolve(text: &str, variables: &[Variable], prior: Option<(&Run, usize)>) -> String {
    let resolver = Resolver::new(variables);
    match prior {
        Some((run, step_index)) => resolver.with_run(run, step_index).resolve(text).text,
        None => resolver.resolve(text).text,
    }
}

/// Every placeholder token in `text`, in order of appearance, without
/// duplicates.
pub fn placeholders(text: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    for caps in TOKEN_RE.captures_iter(text) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let placeholder = match BACK_REF_RE.captures(name) {
            Some(back_ref) => match (back_ref[1].parse(), back_ref[2].parse()) {
                (Ok(step), Ok(action)) => Placeholder::BackReference { step, action },
                _ => Placeholder::Variable(name.to_string()),
            },
            None => Placeholder::Variable(name.to_string()),
        };
        if !found.contains(&placeholder) {
            found.push(placeholder);
        }
    }
    found
}
