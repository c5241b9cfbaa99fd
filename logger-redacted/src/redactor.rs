use crate::config::LoggerConfig;
use base64::{engine::general_purpose, Engine as _};
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

mod patterns {
    #![allow(clippy::unwrap_used)]

    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        pub static ref EMAIL_REGEX: Regex =
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
        pub static ref COORDINATE_REGEX: Regex =
            Regex::new(r"-?\b\d{1,2}\.\d{3,}\s*,\s*-?\d{1,3}\.\d{3,}\b").unwrap();
        pub static ref IP_REGEX: Regex =
            Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").unwrap();
        pub static ref PHONE_REGEX: Regex =
            Regex::new(r"(?:\+\d{1,3}[-.\s]?|\b)\(?\d{3,4}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap();
    }
}

use patterns::{COORDINATE_REGEX, EMAIL_REGEX, IP_REGEX, PHONE_REGEX};

/// PII redaction configuration
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub enabled: bool,
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_coordinates: bool,
    pub redact_ip_addresses: bool,
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_emails: true,
            redact_phones: true,
            redact_coordinates: true,
            redact_ip_addresses: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

/// PII redactor for log messages
#[derive(Debug, Clone)]
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new(RedactionConfig::default())
    }
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn from_logger_config(config: &LoggerConfig) -> Self {
        Self::new(RedactionConfig {
            enabled: config.redaction_enabled,
            hash_for_correlation: config.hash_for_correlation,
            ..RedactionConfig::default()
        })
    }

    /// Add an organisation-specific pattern, applied after the built-in ones
    #[must_use]
    pub fn with_custom_pattern(mut self, pattern: Regex, replacement: impl Into<String>) -> Self {
        self.config.custom_patterns.push((pattern, replacement.into()));
        self
    }

    pub fn redact(&self, text: &str) -> String {
        if !self.config.enabled {
            return text.to_string();
        }

        let mut result = text.to_string();

        if self.config.redact_emails {
            result = self.replace(&EMAIL_REGEX, &result, "EMAIL", |_| "***@***".to_string());
        }

        // Coordinates before IPs and phones: both would otherwise eat the digits
        if self.config.redact_coordinates {
            result = self.replace(&COORDINATE_REGEX, &result, "GPS", |_| "[LOCATION]".to_string());
        }

        if self.config.redact_ip_addresses {
            result = self.replace(&IP_REGEX, &result, "IP", |ip| {
                let parts: Vec<&str> = ip.split('.').collect();
                match (parts.first(), parts.last()) {
                    (Some(first), Some(last)) if parts.len() == 4 => {
                        format!("{first}.***.***.{last}")
                    }
                    _ => "***.***.***.***".to_string(),
                }
            });
        }

        if self.config.redact_phones {
            result = self.replace(&PHONE_REGEX, &result, "PHONE", |_| "[PHONE]".to_string());
        }

        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement.as_str()).to_string();
        }

        result
    }

    fn replace(
        &self,
        regex: &Regex,
        text: &str,
        label: &str,
        mask: impl Fn(&str) -> String,
    ) -> String {
        regex
            .replace_all(text, |caps: &Captures| {
                let matched = caps.get(0).map_or("", |m| m.as_str());
                if self.config.hash_for_correlation {
                    format!("{label}[{}]", Self::hash_value(matched))
                } else {
                    mask(matched)
                }
            })
            .to_string()
    }

    fn hash_value(value: &str) -> String {
        let digest = Sha256::digest(value.as_bytes());
        // First 8 bytes are enough to correlate without being reversible
        general_purpose::STANDARD_NO_PAD.encode(digest.get(..8).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masking() -> PiiRedactor {
        PiiRedactor::new(RedactionConfig {
            hash_for_correlation: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_email_redaction() {
        let redacted = masking().redact("Assessor amina.bello@example.org submitted a report");
        assert!(!redacted.contains("amina.bello"));
        assert!(redacted.contains("***@***"));
    }

    #[test]
    fn test_phone_redaction() {
        let redactor = masking();

        let intl = redactor.redact("Call the ward focal point on +234 803 123 4567");
        assert!(intl.contains("[PHONE]"));
        assert!(!intl.contains("4567"));

        let local = redactor.redact("Backup number 08031234567");
        assert_eq!(local, "Backup number [PHONE]");
    }

    #[test]
    fn test_coordinate_redaction() {
        let redacted = masking().redact("Camp located at 11.8469, 13.1571 near Maiduguri");
        assert_eq!(redacted, "Camp located at [LOCATION] near Maiduguri");
    }

    #[test]
    fn test_ip_redaction() {
        let redacted = masking().redact("request from 192.168.1.100 timed out");
        assert!(redacted.contains("192.***.***.100"));
    }

    #[test]
    fn test_hash_correlation_is_stable() {
        let redactor = PiiRedactor::default();

        let a = redactor.redact("amina@example.org");
        let b = redactor.redact("contact amina@example.org again");
        let tag = a.clone();

        assert!(a.starts_with("EMAIL["));
        assert!(b.contains(&tag));
    }

    #[test]
    fn test_uuid_is_left_alone() {
        let text = "queue item 550e8400-e29b-41d4-a716-446655440000 failed";
        assert_eq!(masking().redact(text), text);
    }

    #[test]
    fn test_disabled_redactor_passes_through() {
        let config = LoggerConfig {
            redaction_enabled: false,
            ..LoggerConfig::default()
        };
        let text = "amina@example.org at 11.8469, 13.1571";
        assert_eq!(PiiRedactor::from_logger_config(&config).redact(text), text);
    }

    #[test]
    fn test_custom_pattern() {
        let redactor =
            masking().with_custom_pattern(Regex::new(r"\bHH-\d+\b").unwrap(), "HH-[REDACTED]");
        assert_eq!(redactor.redact("household HH-20931"), "household HH-[REDACTED]");
    }
}
