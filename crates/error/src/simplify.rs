//! Conversion of opaque runtime errors into user-facing taxonomy kinds.
//!
//! `simplify` is called at user-visible surfaces only; internal code keeps
//! the original error so the chain stays intact for debugging.

use crate::error::{ErrorKind, UmbraError};

/// Install hints for external binaries the CLI-wrapped backends shell out to.
const INSTALL_HINTS: &[(&str, &str)] = &[
    ("op", "install the 1Password CLI: https://developer.1password.com/docs/cli/get-started"),
    ("bw", "install the Bitwarden CLI: npm install -g @bitwarden/cli"),
    ("doppler", "install the Doppler CLI: https://docs.doppler.com/docs/install-cli"),
    ("pass", "install pass: https://www.passwordstore.org (apt install pass / brew install pass)"),
    ("vault", "install the Vault CLI: https://developer.hashicorp.com/vault/install"),
    ("node", "install Node.js: https://nodejs.org"),
    ("docker", "install Docker: https://docs.docker.com/get-docker"),
    ("git", "install git: https://git-scm.com/downloads"),
    ("python", "install Python: https://www.python.org/downloads"),
    ("go", "install Go: https://go.dev/dl"),
];

/// The install hint for a known binary, if we have one.
pub fn install_hint(command: &str) -> Option<&'static str> {
    INSTALL_HINTS
        .iter()
        .find(|(cmd, _)| *cmd == command)
        .map(|(_, hint)| *hint)
}

/// Wrap a failed spawn of `command` as a `Command` error with an install hint.
pub fn wrap_command_not_found(
    command: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> UmbraError {
    let err = UmbraError::command(
        command,
        None,
        format!("command not found: {command}"),
    )
    .with_source(source);
    match install_hint(command) {
        Some(hint) => err.with_suggestion(hint),
        None => err.with_suggestion(format!("make sure '{command}' is installed and on PATH")),
    }
}

/// Map well-known opaque error messages onto `Config`/`User` kinds with
/// curated suggestions. Taxonomy errors that are already specific pass
/// through untouched.
pub fn simplify(err: UmbraError) -> UmbraError {
    // Already human-shaped; nothing to improve.
    match err.kind() {
        ErrorKind::Provider { .. } | ErrorKind::User { .. } => {}
        _ => return err,
    }

    let text = err.chain_text();
    let lower = text.to_lowercase();

    if lower.contains("did not find expected")
        || lower.contains("mapping values are not allowed")
        || lower.contains("while parsing a block")
    {
        return UmbraError::config("config", format!("YAML syntax error: {text}"))
            .with_suggestion("check indentation and quoting near the reported line");
    }
    if lower.contains("expected value at line") || lower.contains("eof while parsing") {
        return UmbraError::config("config", format!("JSON syntax error: {text}"))
            .with_suggestion("check for trailing commas or unclosed braces");
    }
    if lower.contains("permission denied") {
        return UmbraError::user(text)
            .with_suggestion("check file ownership and mode, or rerun with appropriate privileges");
    }
    if lower.contains("no such file or directory") {
        return UmbraError::user(text)
            .with_suggestion("check that the path exists and is spelled correctly");
    }
    if lower.contains("connection refused") {
        return UmbraError::user(text)
            .with_suggestion("is the backend service running and reachable from this host?");
    }

    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_binary_gets_specific_hint() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = wrap_command_not_found("bw", io);
        assert!(err.render().contains("npm install -g @bitwarden/cli"));
        assert!(matches!(err.kind(), ErrorKind::Command { command, .. } if command == "bw"));
    }

    #[test]
    fn unknown_binary_gets_generic_hint() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = wrap_command_not_found("frobnicate", io);
        assert!(err.render().contains("on PATH"));
    }

    #[test]
    fn yaml_parse_noise_becomes_config_error() {
        let yaml = std::io::Error::other("mapping values are not allowed in this context at line 4");
        let err = simplify(UmbraError::provider("config", "load", yaml));
        assert!(matches!(err.kind(), ErrorKind::Config { .. }));
        assert!(err.suggestion().unwrap().contains("indentation"));
    }

    #[test]
    fn permission_denied_becomes_user_error() {
        let io = std::io::Error::other("open /etc/secret: permission denied");
        let err = simplify(UmbraError::provider("file", "resolve", io));
        assert!(matches!(err.kind(), ErrorKind::User { .. }));
    }

    #[test]
    fn specific_taxonomy_errors_pass_through() {
        let original = UmbraError::not_found("vault", "db/creds");
        let simplified = simplify(original.clone());
        assert_eq!(simplified.to_string(), original.to_string());
    }
}
