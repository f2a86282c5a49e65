//! SQL template rendering
//!
//! Handles `{{ name }}` substitution in statement templates. Rendering is a
//! pure function of the template and its parameters; unknown names are an
//! error rather than being left in the output.

use crate::error::{Error, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Regex for matching template variables: {{ name }} or {{ name.part }}
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)*)\s*\}\}").unwrap()
});

/// Named values substituted into a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParams {
    values: BTreeMap<String, String>,
}

impl TemplateParams {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Set a value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Get a value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Render a template with the given parameters
///
/// Substituted values are not scanned again, so a value containing `{{ x }}`
/// is emitted literally.
pub fn render(template: &str, params: &TemplateParams) -> Result<String> {
    let missing: Vec<String> = extract_variables(template)
        .into_iter()
        .filter(|name| params.get(name).is_none())
        .collect();

    if !missing.is_empty() {
        return Err(Error::undefined_var(missing.join(", ")));
    }

    let rendered = TEMPLATE_REGEX.replace_all(template, |cap: &Captures<'_>| {
        params.get(&cap[1]).unwrap_or_default().to_string()
    });

    Ok(rendered.into_owned())
}

/// Check if a string contains template variables
pub fn has_templates(s: &str) -> bool {
    TEMPLATE_REGEX.is_match(s)
}

/// Extract all variable names from a template
pub fn extract_variables(template: &str) -> Vec<String> {
    TEMPLATE_REGEX
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}
