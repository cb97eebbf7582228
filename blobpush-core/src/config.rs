//! Run configuration values: settings file contents, account credentials, the
//! destination container and the orchestrator options.
//!
//! Everything here is plain data built once at startup and handed to the
//! components that need it. How each value is sourced (flags, environment,
//! settings file) is decided by [`AccountCredentials::resolve_with`] and by the
//! CLI crate, not by the components themselves.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::UploadError;

/// Environment variable holding the storage account name.
pub const ACCOUNT_NAME_ENV: &str = "BLOBPUSH_ACCOUNT_NAME";
/// Environment variable holding the storage account key.
pub const ACCOUNT_KEY_ENV: &str = "BLOBPUSH_ACCOUNT_KEY";
/// Settings file name, looked up in the working directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Number of upload workers when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Contents of `settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// File extension (`.svg` or `svg`) to MIME type. Wins over guessing by extension.
    #[serde(default)]
    pub mimes: HashMap<String, String>,
    /// Fallback credentials when neither flags nor environment provide them.
    #[serde(default)]
    pub storage_account: Option<StorageAccountSection>,
    /// Blob service base URL, e.g. `http://127.0.0.1:10000/devstoreaccount1` for Azurite.
    #[serde(default)]
    pub blob_endpoint: Option<String>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StorageAccountSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl fmt::Debug for StorageAccountSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccountSection")
            .field("name", &self.name)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Settings {
    /// Parses settings JSON. Any parse failure is a configuration error.
    pub fn from_json(content: &str) -> Result<Self, UploadError> {
        let settings: Settings = serde_json::from_str(content)
            .map_err(|e| UploadError::Configuration(format!("invalid settings file: {e}")))?;
        settings.trace_loaded();
        Ok(settings)
    }

    pub fn trace_loaded(&self) {
        info!(
            mimes = self.mimes.len(),
            has_account_section = self.storage_account.is_some(),
            custom_endpoint = self.blob_endpoint.is_some(),
            "Loaded settings"
        );
        debug!(?self, "Settings loaded (full debug)");
    }
}

/// Storage account name and key, both non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    pub name: String,
    pub key: String,
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl AccountCredentials {
    /// Resolves credentials from flags, then the process environment, then settings.
    pub fn resolve(
        account_name: Option<String>,
        account_key: Option<String>,
        settings: &Settings,
    ) -> Result<Self, UploadError> {
        Self::resolve_with(account_name, account_key, settings, |var| {
            std::env::var(var).ok()
        })
    }

    /// Like [`AccountCredentials::resolve`], with an injectable environment lookup.
    pub fn resolve_with<F>(
        account_name: Option<String>,
        account_key: Option<String>,
        settings: &Settings,
        lookup: F,
    ) -> Result<Self, UploadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = settings.storage_account.as_ref();
        let name = first_non_empty([
            account_name,
            lookup(ACCOUNT_NAME_ENV),
            section.and_then(|s| s.name.clone()),
        ])
        .ok_or_else(|| missing("--account-name", ACCOUNT_NAME_ENV))?;
        let key = first_non_empty([
            account_key,
            lookup(ACCOUNT_KEY_ENV),
            section.and_then(|s| s.key.clone()),
        ])
        .ok_or_else(|| missing("--account-key", ACCOUNT_KEY_ENV))?;

        Ok(Self { name, key })
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn missing(flag: &str, env: &str) -> UploadError {
    UploadError::Configuration(format!(
        "Missing parameter \"{flag}\", and environment variable \"{env}\". \
         Provide one of them to resolve this error."
    ))
}

/// Where blobs go: a container plus an optional virtual-folder prefix.
///
/// `--container-name site/assets` uploads into container `site` under `assets/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub container: String,
    pub prefix: String,
}

impl Destination {
    pub fn parse(container_name: &str) -> Result<Self, UploadError> {
        let (container, prefix) = match container_name.split_once('/') {
            Some((container, prefix)) => (container, prefix),
            None => (container_name, ""),
        };
        validate_container_name(container)?;
        Ok(Self {
            container: container.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

/// Azure container naming: 3-63 chars of lowercase letters, digits and single
/// hyphens, starting and ending with a letter or digit.
fn validate_container_name(name: &str) -> Result<(), UploadError> {
    let invalid = |why: &str| {
        UploadError::InvalidArgument(format!("invalid container name `{name}`: {why}"))
    };
    if name.len() < 3 || name.len() > 63 {
        return Err(invalid("must be between 3 and 63 characters long"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("only lowercase letters, digits and hyphens are allowed"));
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(invalid("hyphens must be single and surrounded by letters or digits"));
    }
    Ok(())
}

/// Options for one orchestrated upload run.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub container: String,
    /// Upper bound on uploads in flight.
    pub concurrency: usize,
    /// Overwrite existing blobs (and, at the CLI level, ignore the ledger).
    pub force: bool,
    /// Keep going after a failed file instead of aborting the run.
    pub continue_on_failure: bool,
    /// Pause each worker takes between two uploads.
    pub sleep: Duration,
}

impl UploadOptions {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            concurrency: DEFAULT_CONCURRENCY,
            force: false,
            continue_on_failure: true,
            sleep: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |var| {
            pairs
                .iter()
                .find(|(k, _)| *k == var)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn settings_parse_mimes_and_defaults() {
        let settings = Settings::from_json(r#"{"mimes": {".svg": "image/svg+xml"}}"#).unwrap();
        assert_eq!(settings.mimes.get(".svg").map(String::as_str), Some("image/svg+xml"));
        assert!(settings.storage_account.is_none());

        let empty = Settings::from_json("{}").unwrap();
        assert!(empty.mimes.is_empty());
    }

    #[test]
    fn settings_parse_error_is_configuration_error() {
        let err = Settings::from_json("{ not json").unwrap_err();
        assert!(matches!(err, UploadError::Configuration(_)));
    }

    #[test]
    fn flags_win_over_environment_and_settings() {
        let settings = Settings {
            storage_account: Some(StorageAccountSection {
                name: Some("from-settings".into()),
                key: Some("settings-key".into()),
            }),
            ..Settings::default()
        };
        let creds = AccountCredentials::resolve_with(
            Some("from-flag".into()),
            None,
            &settings,
            env_of(&[(ACCOUNT_KEY_ENV, "env-key")]),
        )
        .unwrap();
        assert_eq!(creds.name, "from-flag");
        assert_eq!(creds.key, "env-key");
    }

    #[test]
    fn settings_section_is_last_resort() {
        let settings = Settings {
            storage_account: Some(StorageAccountSection {
                name: Some("acct".into()),
                key: Some("k".into()),
            }),
            ..Settings::default()
        };
        let creds =
            AccountCredentials::resolve_with(None, None, &settings, env_of(&[])).unwrap();
        assert_eq!(creds.name, "acct");
        assert_eq!(creds.key, "k");
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = AccountCredentials::resolve_with(
            Some("   ".into()),
            Some("key".into()),
            &Settings::default(),
            env_of(&[(ACCOUNT_NAME_ENV, "")]),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--account-name"), "{msg}");
        assert!(msg.contains(ACCOUNT_NAME_ENV), "{msg}");
    }

    #[test]
    fn debug_output_redacts_key() {
        let creds = AccountCredentials {
            name: "acct".into(),
            key: "super-secret".into(),
        };
        assert!(!format!("{creds:?}").contains("super-secret"));
    }

    #[test]
    fn destination_splits_folder_prefix() {
        let dest = Destination::parse("site/assets/img").unwrap();
        assert_eq!(dest.container, "site");
        assert_eq!(dest.prefix, "assets/img");

        let plain = Destination::parse("backups").unwrap();
        assert_eq!(plain.prefix, "");
    }

    #[test]
    fn destination_rejects_bad_container_names() {
        for bad in ["", "ab", "Upper", "bad--name", "-lead", "/prefix-only"] {
            assert!(
                matches!(Destination::parse(bad), Err(UploadError::InvalidArgument(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn upload_options_defaults() {
        let options = UploadOptions::new("site");
        assert_eq!(options.concurrency, DEFAULT_CONCURRENCY);
        assert!(options.continue_on_failure);
        assert!(!options.force);
    }
}
