//! Contact record, the unit enrolled into campaigns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A lead with a canonical phone, a few well-known fields, and an open map of
/// whatever other columns the source sheet carried.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Custom fields keyed by normalized column name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

/// Aliases consulted when a well-known field is missing.
const COMPANY_ALIASES: &[&str] = &["company_name", "organization", "business", "business_name"];
const EMAIL_ALIASES: &[&str] = &["email_address", "e_mail", "work_email"];
const LOCATION_ALIASES: &[&str] = &["city", "address", "state"];
const TITLE_ALIASES: &[&str] = &["job_title", "position", "role"];

impl ContactRecord {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = non_empty(name.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = non_empty(company.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = non_empty(email.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = non_empty(location.into());
        self
    }

    /// Builder: set a custom field. Empty values are dropped.
    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.custom.insert(normalize_key(key), value.trim().to_string());
        }
        self
    }

    /// Resolve a personalization variable against this contact.
    ///
    /// Looks at the well-known fields first, then their common aliases, then the
    /// custom map. Empty values count as missing.
    pub fn lookup(&self, key: &str) -> Option<String> {
        let key = normalize_key(key);
        let custom = |k: &str| self.custom.get(k).filter(|v| !v.is_empty()).cloned();
        let first_of = |keys: &[&str]| keys.iter().find_map(|k| custom(*k));

        match key.as_str() {
            "phone" => non_empty(self.phone.clone()),
            "name" | "full_name" => self.name.clone().or_else(|| {
                let first = custom("first_name")?;
                Some(match custom("last_name") {
                    Some(last) => format!("{first} {last}"),
                    None => first,
                })
            }),
            "first_name" => custom("first_name").or_else(|| {
                self.name
                    .as_deref()
                    .and_then(|n| n.split_whitespace().next())
                    .map(String::from)
            }),
            "last_name" => custom("last_name").or_else(|| {
                let name = self.name.as_deref()?;
                let mut parts = name.split_whitespace();
                parts.next();
                non_empty(parts.collect::<Vec<_>>().join(" "))
            }),
            "company" => self.company.clone().or_else(|| first_of(COMPANY_ALIASES)),
            "email" => self.email.clone().or_else(|| first_of(EMAIL_ALIASES)),
            "location" => self.location.clone().or_else(|| first_of(LOCATION_ALIASES)),
            "title" => custom("title").or_else(|| first_of(TITLE_ALIASES)),
            other => custom(other),
        }
    }

    /// Keys for which `lookup` yields a value (well-known first, then custom).
    pub fn available_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = ["phone", "name", "first_name", "company", "email", "location"]
            .iter()
            .filter(|k| self.lookup(k).is_some())
            .map(|k| k.to_string())
            .collect();
        for key in self.custom.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

/// Normalize a column header or variable name: trimmed, lowercase, with runs
/// of whitespace and hyphens collapsed to `_`.
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push('_');
            pending_sep = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
