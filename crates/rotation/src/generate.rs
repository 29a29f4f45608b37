//! Replacement-value generation for strategies.
//!
//! When a rotation request carries no `new_value`, strategies generate one
//! honouring the catalog's charset and length constraints.

use rand::seq::IndexedRandom as _;
use umbra_core::SecretString;

use crate::catalog::Constraints;

/// Default alphabet when the catalog declares none: URL- and shell-safe.
const DEFAULT_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Default generated length inside the catalog's window.
const DEFAULT_LENGTH: usize = 32;

/// Generate a random credential value within `constraints`.
pub fn generate_secret(constraints: &Constraints) -> SecretString {
    let alphabet: Vec<char> = constraints
        .charset
        .as_deref()
        .filter(|cs| !cs.is_empty())
        .unwrap_or(DEFAULT_ALPHABET)
        .chars()
        .collect();

    let length = pick_length(constraints);
    let mut rng = rand::rng();
    let value: String = (0..length)
        .map(|_| {
            *alphabet
                .choose(&mut rng)
                .unwrap_or(&'x')
        })
        .collect();
    SecretString::new(value)
}

fn pick_length(constraints: &Constraints) -> usize {
    let min = constraints.min_length.unwrap_or(1);
    let max = constraints.max_length.unwrap_or(usize::MAX);
    DEFAULT_LENGTH.clamp(min, max.max(min))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_charset_and_length_window() {
        let constraints = Constraints {
            charset: Some("abc123".into()),
            min_length: Some(40),
            max_length: Some(48),
            ttl: None,
        };
        let secret = generate_secret(&constraints);
        secret.expose(|v| {
            assert_eq!(v.len(), 40, "clamped up to the minimum");
            assert!(v.chars().all(|c| "abc123".contains(c)));
        });
    }

    #[test]
    fn defaults_are_sane() {
        let secret = generate_secret(&Constraints::default());
        secret.expose(|v| {
            assert_eq!(v.len(), DEFAULT_LENGTH);
            assert!(v.chars().all(|c| DEFAULT_ALPHABET.contains(c)));
        });
    }

    #[test]
    fn successive_values_differ() {
        let constraints = Constraints::default();
        let a = generate_secret(&constraints);
        let b = generate_secret(&constraints);
        assert_ne!(a, b);
    }
}
