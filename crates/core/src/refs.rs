//! Reference URIs: `store://` secret references and `svc://` rotation targets.
//!
//! Two grammars, one shape:
//!
//! ```text
//! store://<store>/<path>[#<field>][?<k>=<v>(&<k>=<v>)*]
//! svc://<type>/<instance>?kind=<k>[&principal=<p>](&<k>=<v>)*
//! ```
//!
//! `<store>` and `<type>` must not contain `/`; `<path>` and `<instance>`
//! may. Query values are URL-encoded; the canonical form emits keys in
//! sorted order, so `parse(format(r)) == r` holds on all structural fields.
//! `version` (store refs) and `kind`/`principal` (service refs) are hoisted
//! out of the query into first-class fields on parse and re-emitted as query
//! parameters by the formatter.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use umbra_error::{Result, UmbraError};
use url::form_urlencoded;

const STORE_SCHEME: &str = "store://";
const SERVICE_SCHEME: &str = "svc://";

/// A parsed secret reference.
///
/// Immutable once constructed; builders return new values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreRef {
    /// Configured store instance name. Never empty, never contains `/`.
    pub store: String,
    /// Backend-specific path. Never empty; may contain `/`.
    pub path: String,
    /// Optional top-level field to extract from a structured payload.
    pub field: Option<String>,
    /// Optional backend version selector.
    pub version: Option<String>,
    /// Remaining query parameters. Sorted by construction.
    pub options: BTreeMap<String, String>,
}

impl StoreRef {
    /// Build a reference from its two mandatory parts.
    pub fn new(store: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            path: path.into(),
            field: None,
            version: None,
            options: BTreeMap::new(),
        }
    }

    /// Return a copy with `field` set.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Return a copy with `version` set.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Return a copy with an extra option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse the `store://store/path[#field][?k=v…]` form.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(UmbraError::validation("empty secret reference"));
        }
        let rest = input.strip_prefix(STORE_SCHEME).ok_or_else(|| {
            UmbraError::validation(format!(
                "secret reference must start with '{STORE_SCHEME}', got '{input}'"
            ))
        })?;

        let (before_query, query) = match rest.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (rest, None),
        };

        let (locator, field) = match before_query.split_once('#') {
            Some((l, f)) => {
                if f.contains('#') {
                    return Err(UmbraError::validation(format!(
                        "secret reference contains more than one '#': '{input}'"
                    )));
                }
                if f.is_empty() {
                    return Err(UmbraError::validation(format!(
                        "empty field selector in secret reference '{input}'"
                    )));
                }
                (l, Some(f.to_string()))
            }
            None => (before_query, None),
        };

        let (store, path) = locator.split_once('/').ok_or_else(|| {
            UmbraError::validation(format!(
                "secret reference is missing a path: '{input}'"
            ))
        })?;
        if store.is_empty() {
            return Err(UmbraError::validation(format!(
                "secret reference is missing a store name: '{input}'"
            )));
        }
        if path.is_empty() {
            return Err(UmbraError::validation(format!(
                "secret reference is missing a path: '{input}'"
            )));
        }

        let mut options = match query {
            Some(q) => parse_query(q, input)?,
            None => BTreeMap::new(),
        };
        let version = options.remove("version");

        Ok(Self {
            store: store.to_string(),
            path: path.to_string(),
            field,
            version,
            options,
        })
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{STORE_SCHEME}{}/{}", self.store, self.path)?;
        if let Some(field) = &self.field {
            write!(f, "#{field}")?;
        }
        format_query(f, self.version.as_deref(), &self.options)
    }
}

impl FromStr for StoreRef {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for StoreRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StoreRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A parsed rotation target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceRef {
    /// Service type from the definitions catalog (`postgres`, `github`, ...).
    pub service_type: String,
    /// Configured instance name. May contain `/`.
    pub instance: String,
    /// Credential kind being rotated (`password`, `api-key`, ...). Required.
    pub kind: String,
    /// Principal the credential belongs to, when the service scopes by one.
    pub principal: Option<String>,
    /// Remaining query parameters. Sorted by construction.
    pub options: BTreeMap<String, String>,
}

impl ServiceRef {
    /// Build a reference from its three mandatory parts.
    pub fn new(
        service_type: impl Into<String>,
        instance: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            instance: instance.into(),
            kind: kind.into(),
            principal: None,
            options: BTreeMap::new(),
        }
    }

    /// Return a copy with `principal` set.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Return a copy with an extra option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse the `svc://type/instance?kind=…` form.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(UmbraError::validation("empty service reference"));
        }
        let rest = input.strip_prefix(SERVICE_SCHEME).ok_or_else(|| {
            UmbraError::validation(format!(
                "service reference must start with '{SERVICE_SCHEME}', got '{input}'"
            ))
        })?;

        let (locator, query) = match rest.split_once('?') {
            Some((l, q)) => (l, Some(q)),
            None => (rest, None),
        };

        let (service_type, instance) = locator.split_once('/').ok_or_else(|| {
            UmbraError::validation(format!(
                "service reference is missing an instance: '{input}'"
            ))
        })?;
        if service_type.is_empty() {
            return Err(UmbraError::validation(format!(
                "service reference is missing a type: '{input}'"
            )));
        }
        if instance.is_empty() {
            return Err(UmbraError::validation(format!(
                "service reference is missing an instance: '{input}'"
            )));
        }

        let mut options = match query {
            Some(q) => parse_query(q, input)?,
            None => BTreeMap::new(),
        };
        let kind = options.remove("kind").ok_or_else(|| {
            UmbraError::validation(format!(
                "service reference is missing the required 'kind' parameter: '{input}'"
            ))
        })?;
        let principal = options.remove("principal");

        Ok(Self {
            service_type: service_type.to_string(),
            instance: instance.to_string(),
            kind,
            principal,
            options,
        })
    }

    /// Lossless adapter from the service shape to the store shape.
    ///
    /// Used when a rotation strategy versions the new credential value in a
    /// backing store: the secret lands under
    /// `<type>/<instance>/<kind>` with the principal carried as an option.
    pub fn to_store_ref(&self, store: impl Into<String>) -> StoreRef {
        let mut r = StoreRef::new(
            store,
            format!("{}/{}/{}", self.service_type, self.instance, self.kind),
        );
        if let Some(principal) = &self.principal {
            r = r.with_option("principal", principal.clone());
        }
        for (k, v) in &self.options {
            r = r.with_option(k.clone(), v.clone());
        }
        r
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SERVICE_SCHEME}{}/{}", self.service_type, self.instance)?;
        // kind and principal re-enter the query in sorted position.
        let mut merged = self.options.clone();
        merged.insert("kind".to_string(), self.kind.clone());
        if let Some(principal) = &self.principal {
            merged.insert("principal".to_string(), principal.clone());
        }
        format_query(f, None, &merged)
    }
}

impl FromStr for ServiceRef {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ServiceRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServiceRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse and percent-decode a query string, rejecting malformed pairs.
fn parse_query(query: &str, whole: &str) -> Result<BTreeMap<String, String>> {
    // Validate pair shape up front; form_urlencoded is forgiving about
    // missing '=' and we are not.
    for pair in query.split('&') {
        let Some((key, _)) = pair.split_once('=') else {
            return Err(UmbraError::validation(format!(
                "malformed query parameter '{pair}' in '{whole}'"
            )));
        };
        if key.is_empty() {
            return Err(UmbraError::validation(format!(
                "empty query key in '{whole}'"
            )));
        }
    }

    let mut out = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        out.insert(key.into_owned(), value.into_owned());
    }
    Ok(out)
}

/// Emit `?k=v&…` with percent-encoded values and sorted keys; `version`
/// folds back into its sorted position.
fn format_query(
    f: &mut fmt::Formatter<'_>,
    version: Option<&str>,
    options: &BTreeMap<String, String>,
) -> fmt::Result {
    if version.is_none() && options.is_empty() {
        return Ok(());
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut merged: BTreeMap<&str, &str> =
        options.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    if let Some(version) = version {
        merged.insert("version", version);
    }
    for (k, v) in merged {
        serializer.append_pair(k, v);
    }
    write!(f, "?{}", serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn parses_minimal_store_ref() {
        let r = StoreRef::parse("store://vault/db/creds").unwrap();
        assert_eq!(r.store, "vault");
        assert_eq!(r.path, "db/creds");
        assert_eq!(r.field, None);
        assert_eq!(r.version, None);
        assert!(r.options.is_empty());
    }

    #[test]
    fn parses_field_version_and_options() {
        let r = StoreRef::parse("store://v/app/db#password?version=3&region=eu&ttl=5m").unwrap();
        assert_eq!(r.field.as_deref(), Some("password"));
        assert_eq!(r.version.as_deref(), Some("3"));
        assert_eq!(r.options.get("region").map(String::as_str), Some("eu"));
        assert_eq!(r.options.get("ttl").map(String::as_str), Some("5m"));
        assert!(!r.options.contains_key("version"), "version must be hoisted");
    }

    #[test]
    fn canonical_form_sorts_keys_and_reencodes_version() {
        let r = StoreRef::new("v", "app/db")
            .with_version("3")
            .with_option("zeta", "1")
            .with_option("alpha", "x y");
        assert_eq!(r.to_string(), "store://v/app/db?alpha=x+y&version=3&zeta=1");
    }

    #[test]
    fn path_slashes_are_emitted_verbatim() {
        let r = StoreRef::new("vault", "secret/data/team/app");
        assert_eq!(r.to_string(), "store://vault/secret/data/team/app");
    }

    #[rstest]
    #[case("store://vault/db/creds")]
    #[case("store://vault/db/creds#password")]
    #[case("store://vault/db/creds?version=2")]
    #[case("store://v/p#f?a=1&b=2&version=7")]
    #[case("store://onepassword/Private/github#token?vault=Work")]
    fn store_ref_round_trips(#[case] input: &str) {
        let parsed = StoreRef::parse(input).unwrap();
        let reparsed = StoreRef::parse(&parsed.to_string()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn round_trip_is_exact_with_encoded_values() {
        let r = StoreRef::new("s", "p").with_option("note", "a&b=c d");
        let reparsed = StoreRef::parse(&r.to_string()).unwrap();
        assert_eq!(r, reparsed);
    }

    #[rstest]
    #[case("", "empty")]
    #[case("vault://x/y", "must start with")]
    #[case("store://", "missing a path")]
    #[case("store:///path", "missing a store name")]
    #[case("store://vault", "missing a path")]
    #[case("store://vault/", "missing a path")]
    #[case("store://v/p#", "empty field selector")]
    #[case("store://v/p#a#b", "more than one '#'")]
    #[case("store://v/p?novalue", "malformed query")]
    #[case("store://v/p?=x", "empty query key")]
    fn store_ref_rejects_malformed_input(#[case] input: &str, #[case] needle: &str) {
        let err = StoreRef::parse(input).unwrap_err();
        assert!(
            matches!(err.kind(), umbra_error::ErrorKind::Validation { .. }),
            "expected Validation for {input}, got {err:?}"
        );
        assert!(
            err.to_string().contains(needle),
            "message for {input:?} should mention {needle:?}: {err}"
        );
    }

    #[test]
    fn parses_service_ref_with_principal() {
        let r = ServiceRef::parse("svc://postgres/prod-db?kind=password&principal=app").unwrap();
        assert_eq!(r.service_type, "postgres");
        assert_eq!(r.instance, "prod-db");
        assert_eq!(r.kind, "password");
        assert_eq!(r.principal.as_deref(), Some("app"));
        assert!(r.options.is_empty());
    }

    #[test]
    fn service_ref_requires_kind() {
        let err = ServiceRef::parse("svc://postgres/prod-db?principal=app").unwrap_err();
        assert!(err.to_string().contains("kind"));
    }

    #[rstest]
    #[case("svc://postgres/prod-db?kind=password")]
    #[case("svc://postgres/prod-db?kind=password&principal=app")]
    #[case("svc://github/org/repo?kind=deploy-key&scope=read")]
    fn service_ref_round_trips(#[case] input: &str) {
        let parsed = ServiceRef::parse(input).unwrap();
        let reparsed = ServiceRef::parse(&parsed.to_string()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn service_instance_may_contain_slashes() {
        let r = ServiceRef::parse("svc://github/org/repo?kind=token").unwrap();
        assert_eq!(r.service_type, "github");
        assert_eq!(r.instance, "org/repo");
    }

    #[test]
    fn adapter_to_store_ref_is_deterministic() {
        let svc = ServiceRef::new("postgres", "prod-db", "password").with_principal("app");
        let r = svc.to_store_ref("vault");
        assert_eq!(r.store, "vault");
        assert_eq!(r.path, "postgres/prod-db/password");
        assert_eq!(r.options.get("principal").map(String::as_str), Some("app"));
    }

    #[test]
    fn serde_round_trips_through_canonical_string() {
        let r = StoreRef::new("v", "p").with_field("f").with_version("2");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"store://v/p#f?version=2\"");
        let back: StoreRef = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
