//! Contact extraction from crawled post text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::message::{Contact, ContactKind};

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b0\d{1,2}[-.\s]?\d{3,4}[-.\s]?\d{4}\b").expect("phone pattern must compile")
});

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .expect("email pattern must compile")
});

/// Extract phone and email contacts from post text.
///
/// Phones are listed before emails, each in order of first appearance,
/// and repeated values are reported once. Phone numbers are normalized
/// to dash-separated digit groups so the same number written
/// differently dedupes.
pub fn extract_contacts(text: &str) -> Vec<Contact> {
    let mut seen = HashSet::new();
    let mut contacts = Vec::new();

    for found in PHONE_PATTERN.find_iter(text) {
        let value = normalize_phone(found.as_str());
        if seen.insert(value.clone()) {
            contacts.push(Contact {
                kind: ContactKind::Phone,
                value,
            });
        }
    }

    for found in EMAIL_PATTERN.find_iter(text) {
        let value = found.as_str().to_ascii_lowercase();
        if seen.insert(value.clone()) {
            contacts.push(Contact {
                kind: ContactKind::Email,
                value,
            });
        }
    }

    contacts
}

fn normalize_phone(raw: &str) -> String {
    raw.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_dashed_phone_numbers() {
        let contacts = extract_contacts("Call 010-1234-5678 with any information.");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].kind, ContactKind::Phone);
        assert_eq!(contacts[0].value, "010-1234-5678");
    }

    #[test]
    fn normalizes_spaced_and_dotted_numbers() {
        let contacts = extract_contacts("010 1234 5678 or 02.555.0199");
        let values: Vec<&str> = contacts.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, vec!["010-1234-5678", "02-555-0199"]);
    }

    #[test]
    fn dedupes_same_number_written_differently() {
        let contacts = extract_contacts("010-1234-5678, also 010 1234 5678");
        assert_eq!(contacts.len(), 1);
    }

    #[test]
    fn finds_email_addresses() {
        let contacts = extract_contacts("Send tips to Tips@Example.org please");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].kind, ContactKind::Email);
        assert_eq!(contacts[0].value, "tips@example.org");
    }

    #[test]
    fn ignores_plain_dates_and_empty_text() {
        assert!(extract_contacts("posted 2024-05-01").is_empty());
        assert!(extract_contacts("").is_empty());
    }

    #[test]
    fn keeps_order_of_first_appearance() {
        let contacts = extract_contacts("02-555-0199 then tips@example.org then 010-1234-5678");
        assert_eq!(contacts[0].value, "02-555-0199");
        assert_eq!(contacts[1].value, "010-1234-5678");
        assert_eq!(contacts[2].kind, ContactKind::Email);
    }
}
