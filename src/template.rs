//! Message personalization.
//!
//! Templates use `{variable}` placeholders. Rendering is total: unknown or
//! empty variables become empty strings (or the neutral salutation for
//! `{name}`), so no raw placeholder ever reaches a recipient.

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

use crate::config::TemplateConfig;
use crate::contacts::model::{ContactRecord, normalize_key};

pub struct TemplateEngine {
    config: TemplateConfig,
    placeholder: Regex,
}

impl TemplateEngine {
    pub fn new(config: TemplateConfig) -> Self {
        Self {
            config,
            placeholder: Regex::new(r"\{([^{}\r\n]+)\}").expect("placeholder pattern is valid"),
        }
    }

    /// Render `template` for `contact` as of `at`.
    pub fn render(&self, template: &str, contact: &ContactRecord, at: DateTime<Utc>) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures<'_>| {
                self.resolve(&caps[1], contact, at).unwrap_or_default()
            })
            .into_owned()
    }

    /// Normalized variable names referenced by `template`, in first-use order.
    pub fn referenced_variables(&self, template: &str) -> Vec<String> {
        let mut vars = Vec::new();
        for caps in self.placeholder.captures_iter(template) {
            let key = normalize_key(&caps[1]);
            if !key.is_empty() && !vars.contains(&key) {
                vars.push(key);
            }
        }
        vars
    }

    fn resolve(&self, raw_key: &str, contact: &ContactRecord, at: DateTime<Utc>) -> Option<String> {
        let key = normalize_key(raw_key);
        let local = at.with_timezone(&self.config.utc_offset);

        let computed = match key.as_str() {
            "date" | "current_date" => Some(local.format("%m/%d/%Y").to_string()),
            "time" | "current_time" => Some(local.format("%-I:%M %p").to_string()),
            "current_month" | "month" => Some(local.format("%B").to_string()),
            "current_year" | "year" => Some(local.format("%Y").to_string()),
            "day_of_week" => Some(local.format("%A").to_string()),
            _ => None,
        };
        if computed.is_some() {
            return computed;
        }

        contact.lookup(&key).or_else(|| match key.as_str() {
            "name" | "first_name" | "full_name" => Some(self.config.name_fallback.clone()),
            _ => None,
        })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(TemplateConfig::default())
    }
}
