//! Annotation templates.
//!
//! `{{ $labels.<name> }}` reads a label and `{{ $<name> }}` is shorthand for
//! the same lookup (`{{ $value }}`, `{{ $first_value }}`). Unknown labels
//! render as an empty string.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\$(?:labels\.)?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
        .unwrap_or_else(|_| unreachable!())
});

/// Renders `template` against `labels`.
#[must_use]
pub fn render(template: &str, labels: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            labels.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
