use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SERVICE_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Reject the hold if any hold/confirmed reservation on the calendar
/// collides with `span` once buffers are applied. `exclude` skips one
/// reservation (used when restoring it).
///
/// Stale holds still count here: the caller expires them first, so the
/// invariant is checked against committed state only.
pub(crate) fn check_no_conflict(
    cal: &Calendar,
    span: &Span,
    buffer: Ms,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for r in cal.near(span, buffer) {
        if Some(r.id) == exclude || !r.is_active() {
            continue;
        }
        if r.conflicts_with(span, buffer) {
            return Err(EngineError::SlotUnavailable { conflicting: r.id });
        }
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn is_phone_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')' | '.')
}

/// Trim and check customer contact fields. Runs before any write.
pub fn validate_contact(contact: &Contact, notes: Option<&str>) -> Result<Contact, EngineError> {
    let name = contact.name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::validation("name is too long"));
    }

    let email = contact.email.trim();
    if email.is_empty() {
        return Err(EngineError::validation("email is required"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::validation("email is too long"));
    }
    if !is_plausible_email(email) {
        return Err(EngineError::validation("email is not valid"));
    }

    let phone = match contact.phone.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(p) if p.len() > MAX_PHONE_LEN => return Err(EngineError::validation("phone is too long")),
        Some(p) if !p.chars().all(is_phone_char) || !p.chars().any(|c| c.is_ascii_digit()) => {
            return Err(EngineError::validation("phone is not valid"));
        }
        Some(p) => Some(p.to_string()),
    };

    if notes.is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
        return Err(EngineError::validation("notes are too long"));
    }

    Ok(Contact {
        name: name.to_string(),
        email: email.to_string(),
        phone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: &str, email: &str, phone: Option<&str>) -> Contact {
        Contact {
            name: name.into(),
            email: email.into(),
            phone: phone.map(Into::into),
        }
    }

    #[test]
    fn contact_is_trimmed() {
        let c = validate_contact(&contact("  Ada Lovelace ", " ada@example.com ", Some(" ")), None).unwrap();
        assert_eq!(c.name, "Ada Lovelace");
        assert_eq!(c.email, "ada@example.com");
        assert_eq!(c.phone, None);
    }

    #[test]
    fn contact_requires_name_and_email() {
        assert!(validate_contact(&contact("", "a@b.co", None), None).is_err());
        assert!(validate_contact(&contact("Ada", "", None), None).is_err());
    }

    #[test]
    fn contact_rejects_bad_email() {
        for email in ["ada", "ada@", "@example.com", "ada@example", "ada@@example.com", "a da@example.com"] {
            assert!(
                matches!(validate_contact(&contact("Ada", email, None), None), Err(EngineError::Validation(_))),
                "{email} should be rejected"
            );
        }
    }

    #[test]
    fn contact_phone_charset() {
        assert!(validate_contact(&contact("Ada", "a@b.co", Some("+1 (555) 010-2030")), None).is_ok());
        assert!(validate_contact(&contact("Ada", "a@b.co", Some("call me")), None).is_err());
        assert!(validate_contact(&contact("Ada", "a@b.co", Some("1".repeat(33).as_str())), None).is_err());
    }

    #[test]
    fn contact_notes_limit() {
        let long = "x".repeat(MAX_NOTES_LEN + 1);
        assert!(validate_contact(&contact("Ada", "a@b.co", None), Some(&long)).is_err());
    }

    #[test]
    fn span_limits() {
        assert!(validate_span(&Span::new(0, 1000)).is_err());
        let start = MIN_VALID_TIMESTAMP_MS + DAY;
        assert!(validate_span(&Span::new(start, start + HOUR)).is_ok());
        assert!(validate_span(&Span::new(start, start + 13 * HOUR)).is_err());
    }
}
