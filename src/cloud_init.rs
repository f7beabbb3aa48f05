//! Cloud-init user-data rendering for real backends.
//!
//! Nodes boot from a `#cloud-config` document that installs the layer's SSH
//! public key and drops the run-list where the configuration agent picks it
//! up. The run-list is opaque here; it is written verbatim.

use thiserror::Error;

use crate::model::RunList;

/// Path on the node where the run-list lands.
pub const RUN_LIST_PATH: &str = "/etc/strata/run_list";

/// Errors raised while rendering cloud-init user-data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CloudInitError {
    /// Raised when the SSH public key is blank or spans several lines.
    #[error("ssh public key must be a single non-empty line")]
    InvalidPublicKey,
    /// Raised when a value cannot be quoted for YAML.
    #[error("failed to encode cloud-init value: {0}")]
    Encode(String),
}

/// Renders the `#cloud-config` document for a node.
///
/// Scalars are emitted as JSON strings, which YAML accepts as double-quoted
/// scalars, so run-lists containing brackets, commas or colons stay intact.
///
/// # Errors
///
/// Returns [`CloudInitError::InvalidPublicKey`] for a blank or multi-line
/// key and [`CloudInitError::Encode`] when quoting fails.
pub fn render(
    hostname: &str,
    run_list: &RunList,
    ssh_public_key: Option<&str>,
) -> Result<String, CloudInitError> {
    let mut doc = String::from("#cloud-config\n");
    doc.push_str(&format!("hostname: {}\n", quote(hostname)?));

    if let Some(key) = ssh_public_key {
        validate_public_key(key)?;
        doc.push_str("ssh_authorized_keys:\n");
        doc.push_str(&format!("  - {}\n", quote(key.trim())?));
    }

    doc.push_str("write_files:\n");
    doc.push_str(&format!("  - path: {}\n", quote(RUN_LIST_PATH)?));
    doc.push_str("    permissions: \"0644\"\n");
    doc.push_str(&format!("    content: {}\n", quote(run_list.as_str())?));
    Ok(doc)
}

/// Checks that an SSH public key is one non-empty line.
pub(crate) fn validate_public_key(key: &str) -> Result<(), CloudInitError> {
    let trimmed = key.trim();
    if trimmed.is_empty() || trimmed.contains(['\n', '\r']) {
        return Err(CloudInitError::InvalidPublicKey);
    }
    Ok(())
}

fn quote(value: &str) -> Result<String, CloudInitError> {
    serde_json::to_string(value).map_err(|err| CloudInitError::Encode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn renders_run_list_and_key() {
        let doc = render(
            "autotest-runtime-1",
            &RunList::from("recipe[deis::runtime],role[base]"),
            Some("ssh-rsa AAAA user@host"),
        )
        .expect("render");
        assert!(doc.starts_with("#cloud-config\n"));
        assert!(doc.contains("hostname: \"autotest-runtime-1\"\n"));
        assert!(doc.contains("  - \"ssh-rsa AAAA user@host\"\n"));
        assert!(doc.contains("content: \"recipe[deis::runtime],role[base]\"\n"));
    }

    #[rstest]
    fn omits_authorized_keys_without_a_key() {
        let doc = render("n", &RunList::from("recipe[x]"), None).expect("render");
        assert!(!doc.contains("ssh_authorized_keys"));
        assert!(doc.contains(RUN_LIST_PATH));
    }

    #[rstest]
    fn escapes_quotes_in_run_list() {
        let doc = render("n", &RunList::from("say \"hi\""), None).expect("render");
        assert!(doc.contains(r#"content: "say \"hi\"""#));
    }

    #[rstest]
    #[case("   ")]
    #[case("ssh-rsa AAAA\nssh-rsa BBBB")]
    fn rejects_unusable_public_keys(#[case] key: &str) {
        let err = render("n", &RunList::default(), Some(key)).expect_err("bad key");
        assert_eq!(err, CloudInitError::InvalidPublicKey);
    }
}
