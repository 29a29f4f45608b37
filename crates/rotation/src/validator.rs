//! Pre-rotation credential validation against catalog constraints.

use umbra_core::SecretString;

use crate::catalog::ServiceTypeDef;
use crate::ttl::parse_ttl;

/// Outcome of validating a candidate credential value.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// True when no rule failed.
    pub valid: bool,
    /// One entry per failed rule, phrased for operators.
    pub errors: Vec<String>,
    /// Parsed TTL for the credential kind, when the catalog declares one.
    pub ttl_seconds: Option<u64>,
}

/// Validate a candidate value for `kind` of `service_type`.
///
/// Pure over its inputs. Rules: length window, charset membership,
/// not-identical-to-current, and a parseable TTL when one is declared.
pub fn validate_credential(
    service_type: &ServiceTypeDef,
    kind: &str,
    new_value: &SecretString,
    current_value: Option<&SecretString>,
) -> ValidationReport {
    let mut report = ValidationReport {
        valid: true,
        ..ValidationReport::default()
    };

    let Some(kind_def) = service_type.credential_kinds.get(kind) else {
        // No constraints published for this kind; nothing to check.
        return report;
    };
    let constraints = &kind_def.constraints;

    let length = new_value.len();
    if let Some(min) = constraints.min_length {
        if length < min {
            report.errors.push(format!(
                "value is {length} characters, below the minimum of {min}"
            ));
        }
    }
    if let Some(max) = constraints.max_length {
        if length > max {
            report.errors.push(format!(
                "value is {length} characters, above the maximum of {max}"
            ));
        }
    }

    if let Some(charset) = &constraints.charset {
        let outside: Vec<char> = new_value.expose(|v| {
            let mut bad: Vec<char> = v.chars().filter(|c| !charset.contains(*c)).collect();
            bad.sort_unstable();
            bad.dedup();
            bad
        });
        if !outside.is_empty() {
            // Name the count, not the characters; the characters are secret.
            report.errors.push(format!(
                "value contains {} character(s) outside the allowed charset",
                outside.len()
            ));
        }
    }

    if let Some(current) = current_value {
        // SecretString equality is constant-time.
        if new_value == current {
            report
                .errors
                .push("new value is identical to the current value".to_string());
        }
    }

    if let Some(ttl) = &constraints.ttl {
        match parse_ttl(ttl) {
            Ok(duration) => report.ttl_seconds = Some(duration.as_secs()),
            Err(err) => report
                .errors
                .push(format!("catalog TTL '{ttl}' does not parse: {err}")),
        }
    }

    report.valid = report.errors.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Constraints, CredentialKindDef};

    fn service_type_with(constraints: Constraints) -> ServiceTypeDef {
        let mut def = ServiceTypeDef {
            name: "postgres".into(),
            ..ServiceTypeDef::default()
        };
        def.credential_kinds
            .insert("password".into(), CredentialKindDef { constraints });
        def
    }

    #[test]
    fn accepts_a_conforming_value() {
        let def = service_type_with(Constraints {
            ttl: Some("90d".into()),
            min_length: Some(12),
            max_length: Some(64),
            charset: Some("abcdefghijklmnopqrstuvwxyz0123456789".into()),
        });
        let report = validate_credential(
            &def,
            "password",
            &SecretString::new("abcdef123456"),
            Some(&SecretString::new("previous-value")),
        );
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(report.ttl_seconds, Some(90 * 86_400));
    }

    #[test]
    fn rejects_length_violations() {
        let def = service_type_with(Constraints {
            min_length: Some(12),
            max_length: Some(16),
            ..Constraints::default()
        });
        let short = validate_credential(&def, "password", &SecretString::new("short"), None);
        assert!(!short.valid);
        assert!(short.errors[0].contains("below the minimum"));

        let long = validate_credential(
            &def,
            "password",
            &SecretString::new("a".repeat(40)),
            None,
        );
        assert!(!long.valid);
        assert!(long.errors[0].contains("above the maximum"));
    }

    #[test]
    fn rejects_characters_outside_the_charset_without_naming_them() {
        let def = service_type_with(Constraints {
            charset: Some("abc".into()),
            ..Constraints::default()
        });
        let report = validate_credential(&def, "password", &SecretString::new("abcXY"), None);
        assert!(!report.valid);
        assert!(report.errors[0].contains("2 character(s)"));
        assert!(!report.errors[0].contains('X'), "must not echo secret chars");
    }

    #[test]
    fn rejects_identical_to_current() {
        let def = service_type_with(Constraints::default());
        let report = validate_credential(
            &def,
            "password",
            &SecretString::new("same-value"),
            Some(&SecretString::new("same-value")),
        );
        assert!(!report.valid);
        assert!(report.errors[0].contains("identical"));
    }

    #[test]
    fn unknown_kind_passes_vacuously() {
        let def = service_type_with(Constraints {
            min_length: Some(100),
            ..Constraints::default()
        });
        let report = validate_credential(&def, "api-key", &SecretString::new("x"), None);
        assert!(report.valid);
    }

    #[test]
    fn unparseable_catalog_ttl_is_reported() {
        let def = service_type_with(Constraints {
            ttl: Some("ninety days".into()),
            ..Constraints::default()
        });
        let report = validate_credential(&def, "password", &SecretString::new("x"), None);
        assert!(!report.valid);
        assert!(report.errors[0].contains("does not parse"));
    }
}
