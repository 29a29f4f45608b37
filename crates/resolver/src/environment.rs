//! Deterministic child-process environment building and value masking.
//!
//! The process-spawning collaborator owns the actual exec; this module
//! guarantees (a) the child sees exactly the intended keys, in sorted order,
//! and (b) a "print vars" mode can render values without disclosing them.

use std::collections::BTreeMap;

use umbra_core::SecretString;

/// Who wins when a resolved variable collides with a parent variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Resolved values shadow the parent environment.
    ResolvedWins,
    /// The parent environment shadows resolved values.
    ParentWins,
}

/// Merge resolved variables with the parent environment into a sorted
/// `KEY=VALUE` list.
///
/// Deterministic: same inputs, same list, same order.
pub fn build_env(
    resolved: &BTreeMap<String, SecretString>,
    parent: impl IntoIterator<Item = (String, String)>,
    policy: MergePolicy,
) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = parent.into_iter().collect();
    for (key, value) in resolved {
        let plaintext = value.expose(str::to_string);
        match policy {
            MergePolicy::ResolvedWins => {
                merged.insert(key.clone(), plaintext);
            }
            MergePolicy::ParentWins => {
                merged.entry(key.clone()).or_insert(plaintext);
            }
        }
    }
    merged.into_iter().collect()
}

/// Mask a value for display.
///
/// Empty values render as `(empty)`; short values (under 8 chars) as stars
/// matching their length; longer values keep the first two characters and
/// the last one with stars between.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => "(empty)".to_string(),
        n if n < 8 => "*".repeat(n),
        n => {
            let head: String = chars[..2].iter().collect();
            let tail = chars[n - 1];
            format!("{head}{}{tail}", "*".repeat(n - 3))
        }
    }
}

/// The resolved mapping with every value masked, for "print vars" surfaces.
pub fn masked_entries(resolved: &BTreeMap<String, SecretString>) -> Vec<(String, String)> {
    resolved
        .iter()
        .map(|(key, value)| (key.clone(), value.expose(mask_value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolved(pairs: &[(&str, &str)]) -> BTreeMap<String, SecretString> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), SecretString::new(*v)))
            .collect()
    }

    #[test]
    fn output_is_sorted_and_deterministic() {
        let vars = resolved(&[("ZETA", "1"), ("ALPHA", "2")]);
        let parent = vec![("MIDDLE".to_string(), "3".to_string())];
        let env = build_env(&vars, parent, MergePolicy::ResolvedWins);
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["ALPHA", "MIDDLE", "ZETA"]);
    }

    #[test]
    fn resolved_wins_shadows_parent() {
        let vars = resolved(&[("PATH", "/umbra/bin")]);
        let parent = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let env = build_env(&vars, parent, MergePolicy::ResolvedWins);
        assert_eq!(env, vec![("PATH".to_string(), "/umbra/bin".to_string())]);
    }

    #[test]
    fn parent_wins_keeps_parent() {
        let vars = resolved(&[("PATH", "/umbra/bin")]);
        let parent = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let env = build_env(&vars, parent, MergePolicy::ParentWins);
        assert_eq!(env, vec![("PATH".to_string(), "/usr/bin".to_string())]);
    }

    #[test]
    fn masking_rules() {
        assert_eq!(mask_value(""), "(empty)");
        assert_eq!(mask_value("abc"), "***");
        assert_eq!(mask_value("1234567"), "*******");
        assert_eq!(mask_value("supersecret"), "su********t");
    }

    #[test]
    fn masked_entries_never_contain_plaintext() {
        let vars = resolved(&[("TOKEN", "tok_very_secret_value")]);
        let masked = masked_entries(&vars);
        assert_eq!(masked.len(), 1);
        assert!(!masked[0].1.contains("very_secret"));
        assert!(masked[0].1.starts_with("to"));
        assert!(masked[0].1.ends_with('e'));
    }
}
