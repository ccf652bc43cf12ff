//! Contact list intake: parse a CSV sheet, classify every phone, tally what
//! the list can support, and optionally emit a cleaned, deduplicated roster.
//!
//! Row-level problems are findings, never errors. Only an unreadable file
//! (no header row) fails the whole call.

use std::collections::HashSet;
use std::str::FromStr;

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::config::{EnrollmentPolicy, IntakeConfig};
use crate::contacts::model::{ContactRecord, normalize_key};
use crate::contacts::phone::{self, LineKind};
use crate::error::IntakeError;

/// Variables the template engine computes at render time.
pub const SYSTEM_VARIABLES: &[&str] = &["date", "time", "current_month", "current_year", "day_of_week"];

/// Header fragments that identify the phone column, in priority order.
const PHONE_HEADERS: &[&str] = &["phone", "mobile", "cell", "telephone", "tel", "number"];
const NAME_HEADERS: &[&str] = &["name", "full_name", "contact_name", "contact"];
const COMPANY_HEADERS: &[&str] = &["company", "company_name", "organization", "business", "business_name"];
const EMAIL_HEADERS: &[&str] = &["email", "email_address", "e_mail", "work_email"];
const LOCATION_HEADERS: &[&str] = &["location", "address"];

/// Raw tabular input: a header row and data rows.
#[derive(Debug, Clone, Default)]
pub struct ContactSheet {
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

#[derive(Debug, Clone)]
pub struct SheetRow {
    /// 1-based line in the source file (header is line 1).
    pub line: usize,
    pub fields: Vec<String>,
    /// Set when the row could not be decoded at all.
    pub error: Option<String>,
}

impl ContactSheet {
    /// Parse CSV bytes. Ragged rows are accepted; undecodable rows become
    /// rows with an `error` so they are reported, not dropped.
    pub fn from_csv(content: &[u8]) -> Result<Self, IntakeError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content);

        let headers: Vec<String> = reader
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim_start_matches('\u{feff}').to_string())
            .collect();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(IntakeError::MissingHeader);
        }

        let mut rows = Vec::new();
        for (idx, result) in reader.byte_records().enumerate() {
            let fallback_line = idx + 2;
            match result {
                Ok(record) => {
                    let fields: Vec<String> = record
                        .iter()
                        .map(|f| String::from_utf8_lossy(f).into_owned())
                        .collect();
                    if fields.iter().all(|f| f.is_empty()) {
                        continue;
                    }
                    rows.push(SheetRow {
                        line: record
                            .position()
                            .map(|p| p.line() as usize)
                            .unwrap_or(fallback_line),
                        fields,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable CSV row {fallback_line}: {e}");
                    rows.push(SheetRow {
                        line: fallback_line,
                        fields: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(Self { headers, rows })
    }

    /// Build a sheet from already-split rows (line numbers assigned from 2).
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, fields)| SheetRow {
                line: i + 2,
                fields,
                error: None,
            })
            .collect();
        Self { headers, rows }
    }
}

/// Where each well-known field lives in the sheet.
#[derive(Debug, Clone)]
struct ColumnMap {
    phone: usize,
    name: Option<usize>,
    first_name: Option<usize>,
    last_name: Option<usize>,
    company: Option<usize>,
    email: Option<usize>,
    location: Option<usize>,
    /// city/state/country columns, composed into `location` when there is no location column.
    place_parts: Vec<usize>,
    /// Every column that is not phone/name/company/email/location.
    custom: Vec<(usize, String)>,
}

impl ColumnMap {
    fn detect(headers: &[String]) -> Self {
        let keys: Vec<String> = headers.iter().map(|h| normalize_key(h)).collect();
        let exact = |aliases: &[&str]| keys.iter().position(|k| aliases.contains(&k.as_str()));

        let phone = PHONE_HEADERS
            .iter()
            .find_map(|frag| keys.iter().position(|k| k.contains(*frag)))
            .unwrap_or(0);

        let pick = |aliases: &[&str]| exact(aliases).filter(|&i| i != phone);
        let name = pick(NAME_HEADERS);
        let first_name = pick(&["first_name", "firstname", "first"]);
        let last_name = pick(&["last_name", "lastname", "last", "surname"]);
        let company = pick(COMPANY_HEADERS);
        let email = pick(EMAIL_HEADERS).or_else(|| {
            keys.iter()
                .position(|k| k.contains("email"))
                .filter(|&i| i != phone)
        });
        let location = pick(LOCATION_HEADERS);
        let place_parts = ["city", "state", "country"]
            .iter()
            .filter_map(|p| pick(&[*p]))
            .collect();

        let standard = [Some(phone), name, company, email, location];
        let custom = keys
            .iter()
            .enumerate()
            .filter(|(i, k)| !k.is_empty() && !standard.contains(&Some(*i)))
            .map(|(i, k)| (i, k.clone()))
            .collect();

        Self {
            phone,
            name,
            first_name,
            last_name,
            company,
            email,
            location,
            place_parts,
            custom,
        }
    }

    fn contact(&self, fields: &[String], phone: String) -> ContactRecord {
        let get = |idx: Option<usize>| {
            idx.and_then(|i| fields.get(i))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let mut contact = ContactRecord::new(phone);
        contact.name = get(self.name).map(String::from).or_else(|| {
            let parts: Vec<&str> = [get(self.first_name), get(self.last_name)]
                .into_iter()
                .flatten()
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });
        contact.company = get(self.company).map(String::from);
        contact.email = get(self.email).map(String::from);
        contact.location = get(self.location).map(String::from).or_else(|| {
            let parts: Vec<&str> = self
                .place_parts
                .iter()
                .filter_map(|&i| get(Some(i)))
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        });
        for (idx, key) in &self.custom {
            if let Some(value) = get(Some(*idx)) {
                contact.custom.insert(key.clone(), value.to_string());
            }
        }
        contact
    }
}

/// `validate` only reports; `fix` also returns the cleaned roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeMode {
    #[default]
    Validate,
    Fix,
}

impl FromStr for IntakeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validate" => Ok(IntakeMode::Validate),
            "fix" => Ok(IntakeMode::Fix),
            other => Err(format!("unknown intake mode '{other}' (expected validate or fix)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeStats {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    /// Counts below are over unique canonical phones (first occurrence).
    pub mobile_numbers: usize,
    pub landlines: usize,
    pub voip_numbers: usize,
    pub unknown_numbers: usize,
    pub emails_found: usize,
    pub companies_found: usize,
    pub names_found: usize,
    pub duplicate_phones: usize,
    pub available_variables: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningSummary {
    pub original_count: usize,
    pub after_cleaning: usize,
    pub removed: usize,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub ready_for_campaign: bool,
    /// Blocking findings.
    pub errors: Vec<String>,
    /// Advisory findings.
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub stats: IntakeStats,
    /// Header of the column used for phone numbers.
    pub phone_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned: Option<Vec<ContactRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<CleaningSummary>,
}

/// Validates and cleans contact sheets.
#[derive(Debug, Clone, Default)]
pub struct IntakeValidator {
    config: IntakeConfig,
    policy: EnrollmentPolicy,
}

impl IntakeValidator {
    pub fn new(config: IntakeConfig, policy: EnrollmentPolicy) -> Self {
        Self { config, policy }
    }

    pub fn validate(&self, sheet: &ContactSheet, mode: IntakeMode) -> ValidationResult {
        let mut result = ValidationResult::default();
        let stats = &mut result.stats;
        stats.total_rows = sheet.rows.len();

        if sheet.rows.is_empty() {
            result.errors.push("Contact sheet has no data rows".to_string());
            if mode == IntakeMode::Fix {
                result.cleaned = Some(Vec::new());
                result.summary = Some(CleaningSummary::default());
            }
            return result;
        }

        let columns = ColumnMap::detect(&sheet.headers);
        result.phone_column = sheet.headers.get(columns.phone).cloned();

        let mut row_findings = Vec::new();
        let mut seen = HashSet::new();
        let mut cleaned = Vec::new();
        let mut field_hits: Vec<(String, usize)> = Vec::new();

        for row in &sheet.rows {
            if let Some(err) = &row.error {
                stats.invalid_rows += 1;
                row_findings.push(format!("Row {}: unreadable ({err})", row.line));
                continue;
            }

            let raw = row
                .fields
                .get(columns.phone)
                .map(|s| s.trim())
                .unwrap_or_default();
            if raw.is_empty() {
                stats.invalid_rows += 1;
                row_findings.push(format!("Row {}: missing phone number", row.line));
                continue;
            }

            let classification = phone::classify(raw);
            if !classification.valid {
                stats.invalid_rows += 1;
                row_findings.push(format!("Row {}: invalid phone number '{raw}'", row.line));
                continue;
            }
            stats.valid_rows += 1;

            if !seen.insert(classification.canonical.clone()) {
                stats.duplicate_phones += 1;
                tracing::debug!(line = row.line, phone = %classification.canonical, "Duplicate phone");
                continue;
            }

            match classification.kind {
                LineKind::Mobile => stats.mobile_numbers += 1,
                LineKind::Landline => stats.landlines += 1,
                LineKind::Voip => stats.voip_numbers += 1,
                LineKind::Unknown => stats.unknown_numbers += 1,
            }

            let contact = columns.contact(&row.fields, classification.canonical);
            stats.names_found += usize::from(contact.name.is_some());
            stats.companies_found += usize::from(contact.company.is_some());
            stats.emails_found += usize::from(contact.email.is_some());
            for key in contact.available_keys() {
                match field_hits.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, n)) => *n += 1,
                    None => field_hits.push((key, 1)),
                }
            }

            if self.policy.is_eligible(classification.kind) {
                cleaned.push(contact);
            }
        }

        stats.available_variables = self.available_variables(&field_hits, stats.total_rows);
        self.assess(&mut result, row_findings);

        if mode == IntakeMode::Fix {
            let original_count = result.stats.total_rows;
            result.summary = Some(CleaningSummary {
                original_count,
                after_cleaning: cleaned.len(),
                removed: original_count - cleaned.len(),
                duplicates_removed: result.stats.duplicate_phones,
            });
            result.cleaned = Some(cleaned);
        }

        tracing::info!(
            total = result.stats.total_rows,
            valid = result.stats.valid_rows,
            mobile = result.stats.mobile_numbers,
            duplicates = result.stats.duplicate_phones,
            ready = result.ready_for_campaign,
            "Validated contact sheet"
        );
        result
    }

    fn available_variables(&self, hits: &[(String, usize)], total: usize) -> Vec<String> {
        let threshold = (total as f64 * self.config.variable_coverage).ceil().max(1.0) as usize;
        let mut vars: Vec<String> = hits
            .iter()
            .filter(|(_, n)| *n >= threshold)
            .map(|(k, _)| k.clone())
            .collect();
        vars.extend(SYSTEM_VARIABLES.iter().map(|v| v.to_string()));
        vars
    }

    /// Fill in validity, readiness and the three finding lists.
    fn assess(&self, result: &mut ValidationResult, row_findings: Vec<String>) {
        let stats = &result.stats;
        let total = stats.total_rows as f64;
        let invalid_fraction = stats.invalid_rows as f64 / total;
        let duplicate_fraction = stats.duplicate_phones as f64 / total;
        let unique = stats.mobile_numbers + stats.landlines + stats.voip_numbers + stats.unknown_numbers;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        if stats.valid_rows == 0 {
            errors.push("No valid phone numbers found".to_string());
        } else if invalid_fraction > self.config.max_invalid_fraction {
            errors.push(format!(
                "{} of {} rows ({:.0}%) have invalid phone numbers",
                stats.invalid_rows,
                stats.total_rows,
                invalid_fraction * 100.0
            ));
        }
        if stats.valid_rows > 0 && stats.mobile_numbers == 0 {
            errors.push("No mobile numbers found; SMS campaigns require mobile numbers".to_string());
        }
        if stats.duplicate_phones > 0 && duplicate_fraction >= self.config.max_duplicate_fraction {
            errors.push(format!(
                "{} duplicate phone numbers ({:.0}% of rows); run fix mode to deduplicate",
                stats.duplicate_phones,
                duplicate_fraction * 100.0
            ));
        }

        if stats.invalid_rows > 0 {
            warnings.push(format!("{} rows have missing or invalid phone numbers", stats.invalid_rows));
        }
        if stats.landlines > 0 {
            warnings.push(format!("{} landline numbers cannot receive SMS", stats.landlines));
        }
        if stats.voip_numbers > 0 {
            warnings.push(format!("{} VoIP numbers may not receive SMS reliably", stats.voip_numbers));
        }
        if stats.unknown_numbers > 0 {
            warnings.push(format!("{} numbers have an unknown line type", stats.unknown_numbers));
        }
        if unique > 0 && (stats.mobile_numbers as f64) < unique as f64 * 0.5 {
            warnings.push(format!(
                "Only {:.0}% of numbers are mobile",
                stats.mobile_numbers as f64 / unique as f64 * 100.0
            ));
        }
        if stats.duplicate_phones > 0 && duplicate_fraction < self.config.max_duplicate_fraction {
            warnings.push(format!("{} duplicate phone numbers found", stats.duplicate_phones));
        }

        let cap = self.config.max_row_findings;
        let overflow = row_findings.len().saturating_sub(cap);
        warnings.extend(row_findings.into_iter().take(cap));
        if overflow > 0 {
            warnings.push(format!("...and {overflow} more row issues"));
        }

        if unique > 0 {
            let coverage = |n: usize| n as f64 / unique as f64;
            if coverage(stats.names_found) < 0.5 {
                suggestions.push(
                    "Add a name column so {name} greetings are personal (missing names fall back to a generic greeting)"
                        .to_string(),
                );
            }
            if coverage(stats.companies_found) < 0.7 {
                suggestions.push("Add company names to personalize messages with {company}".to_string());
            }
            if coverage(stats.emails_found) < 0.5 {
                suggestions.push("Add email addresses to enable follow-up outside SMS".to_string());
            }
        }
        if stats.duplicate_phones > 0 || stats.invalid_rows > 0 || stats.landlines > 0 {
            suggestions.push("Run fix mode to get a cleaned, deduplicated mobile-only list".to_string());
        }

        let is_valid = stats.valid_rows > 0 && invalid_fraction <= self.config.max_invalid_fraction;
        let ready = is_valid
            && stats.mobile_numbers > 0
            && duplicate_fraction < self.config.max_duplicate_fraction;

        result.is_valid = is_valid;
        result.ready_for_campaign = ready;
        result.errors = errors;
        result.warnings = warnings;
        result.suggestions = suggestions;
    }
}

/// Serialize contacts back to CSV: standard columns, then every custom key seen.
pub fn write_contacts_csv(contacts: &[ContactRecord]) -> Result<String, IntakeError> {
    let mut custom_keys: Vec<&str> = Vec::new();
    for contact in contacts {
        for key in contact.custom.keys() {
            if !custom_keys.contains(&key.as_str()) {
                custom_keys.push(key);
            }
        }
    }

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    let mut header = vec!["phone", "name", "company", "email", "location"];
    header.extend(custom_keys.iter().copied());
    writer.write_record(&header)?;

    for contact in contacts {
        let mut record = vec![
            contact.phone.as_str(),
            contact.name.as_deref().unwrap_or_default(),
            contact.company.as_deref().unwrap_or_default(),
            contact.email.as_deref().unwrap_or_default(),
            contact.location.as_deref().unwrap_or_default(),
        ];
        record.extend(
            custom_keys
                .iter()
                .map(|k| contact.custom.get(*k).map(String::as_str).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| IntakeError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| IntakeError::Csv(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mobile(i: usize) -> String {
        format!("(415) 2{:02}-{:04}", i % 100, 1000 + i)
    }

    fn landline(i: usize) -> String {
        format!("555-3{:02}-{:04}", i % 100, 2000 + i)
    }

    /// 70 unique mobiles, 10 repeats of those, 20 landlines.
    fn scenario_sheet() -> ContactSheet {
        let headers = vec!["Name".into(), "Phone Number".into(), "Company".into()];
        let mut rows = Vec::new();
        for i in 0..70 {
            rows.push(vec![format!("Lead {i}"), mobile(i), "Acme".into()]);
        }
        for i in 0..10 {
            rows.push(vec![format!("Lead {i} again"), mobile(i), String::new()]);
        }
        for i in 0..20 {
            rows.push(vec![format!("Office {i}"), landline(i), "Acme".into()]);
        }
        ContactSheet::from_rows(headers, rows)
    }

    #[test]
    fn validate_counts_scenario_list() {
        let validator = IntakeValidator::default();
        let result = validator.validate(&scenario_sheet(), IntakeMode::Validate);

        assert_eq!(result.stats.total_rows, 100);
        assert_eq!(result.stats.valid_rows, 100);
        assert_eq!(result.stats.mobile_numbers, 70);
        assert_eq!(result.stats.landlines, 20);
        assert_eq!(result.stats.duplicate_phones, 10);
        assert!(result.is_valid);
        assert!(result.ready_for_campaign);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.phone_column.as_deref(), Some("Phone Number"));
        assert!(result.cleaned.is_none());
        assert!(result.stats.available_variables.contains(&"company".to_string()));
        assert!(result.stats.available_variables.contains(&"date".to_string()));
    }

    #[test]
    fn fix_keeps_unique_mobiles() {
        let validator = IntakeValidator::default();
        let result = validator.validate(&scenario_sheet(), IntakeMode::Fix);

        let cleaned = result.cleaned.unwrap();
        assert_eq!(cleaned.len(), 70);
        let summary = result.summary.unwrap();
        assert_eq!(summary.original_count, 100);
        assert_eq!(summary.after_cleaning, 70);
        assert_eq!(summary.removed, 30);
        assert_eq!(summary.duplicates_removed, 10);
        // First occurrence wins.
        assert_eq!(cleaned[0].name.as_deref(), Some("Lead 0"));
        assert!(cleaned.iter().all(|c| c.phone.starts_with("+1415")));
    }

    #[test]
    fn fixing_a_cleaned_list_removes_nothing() {
        let validator = IntakeValidator::default();
        let first = validator.validate(&scenario_sheet(), IntakeMode::Fix);
        let csv = write_contacts_csv(&first.cleaned.unwrap()).unwrap();

        let sheet = ContactSheet::from_csv(csv.as_bytes()).unwrap();
        let second = validator.validate(&sheet, IntakeMode::Fix);
        let summary = second.summary.unwrap();
        assert_eq!(summary.original_count, 70);
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.duplicates_removed, 0);
        assert_eq!(second.cleaned.unwrap().len(), 70);
    }

    #[test]
    fn malformed_rows_become_findings() {
        let csv = "phone,name\n415-234-5678,Ann\nnot a number,Bob\n,Cy\n415-234-5679,Di\n";
        let sheet = ContactSheet::from_csv(csv.as_bytes()).unwrap();
        let result = IntakeValidator::default().validate(&sheet, IntakeMode::Validate);

        assert_eq!(result.stats.total_rows, 4);
        assert_eq!(result.stats.valid_rows, 2);
        assert_eq!(result.stats.invalid_rows, 2);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.starts_with("Row 3: invalid phone number")));
        assert!(result.warnings.iter().any(|w| w == "Row 4: missing phone number"));
    }

    #[test]
    fn mostly_invalid_sheet_is_not_valid() {
        let csv = "phone\n415-234-5678\nbad\nworse\nworst\n";
        let sheet = ContactSheet::from_csv(csv.as_bytes()).unwrap();
        let result = IntakeValidator::default().validate(&sheet, IntakeMode::Validate);
        assert!(!result.is_valid);
        assert!(!result.ready_for_campaign);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn landline_only_list_is_valid_but_not_ready() {
        let csv = "phone\n555-234-5678\n555-234-5679\n";
        let sheet = ContactSheet::from_csv(csv.as_bytes()).unwrap();
        let result = IntakeValidator::default().validate(&sheet, IntakeMode::Fix);
        assert!(result.is_valid);
        assert!(!result.ready_for_campaign);
        assert!(result.cleaned.unwrap().is_empty());
    }

    #[test]
    fn policy_widens_fix_output() {
        let policy = EnrollmentPolicy {
            allow_landline: true,
            ..Default::default()
        };
        let validator = IntakeValidator::new(IntakeConfig::default(), policy);
        let result = validator.validate(&scenario_sheet(), IntakeMode::Fix);
        assert_eq!(result.cleaned.unwrap().len(), 90);
    }

    #[test]
    fn detects_columns_and_custom_fields() {
        let csv = "First Name,Last Name,Cell,Organization,City,State,Deal Size\n\
                   Ada,Lovelace,415-234-5678,Engines Inc,London,KY,big\n";
        let sheet = ContactSheet::from_csv(csv.as_bytes()).unwrap();
        let result = IntakeValidator::default().validate(&sheet, IntakeMode::Fix);
        let contact = &result.cleaned.unwrap()[0];

        assert_eq!(result.phone_column.as_deref(), Some("Cell"));
        assert_eq!(contact.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(contact.company.as_deref(), Some("Engines Inc"));
        assert_eq!(contact.location.as_deref(), Some("London, KY"));
        assert_eq!(contact.custom.get("deal_size").map(String::as_str), Some("big"));
    }

    #[test]
    fn falls_back_to_first_column_for_phone() {
        let csv = "contact_no,who\n415-234-5678,Ann\n";
        let sheet = ContactSheet::from_csv(csv.as_bytes()).unwrap();
        let result = IntakeValidator::default().validate(&sheet, IntakeMode::Validate);
        assert_eq!(result.phone_column.as_deref(), Some("contact_no"));
        assert_eq!(result.stats.mobile_numbers, 1);
    }

    #[test]
    fn empty_sheet() {
        assert!(matches!(
            ContactSheet::from_csv(b""),
            Err(IntakeError::MissingHeader)
        ));
        let sheet = ContactSheet::from_csv(b"phone,name\n").unwrap();
        let result = IntakeValidator::default().validate(&sheet, IntakeMode::Validate);
        assert!(!result.is_valid);
        assert_eq!(result.stats.total_rows, 0);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("fix".parse::<IntakeMode>().unwrap(), IntakeMode::Fix);
        assert_eq!(" Validate ".parse::<IntakeMode>().unwrap(), IntakeMode::Validate);
        assert!("clean".parse::<IntakeMode>().is_err());
    }
}
