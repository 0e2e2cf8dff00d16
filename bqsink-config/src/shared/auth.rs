use secrecy::SecretString;
use serde::Deserialize;

/// Passphrase Google issues for every downloaded PKCS12 service account key.
pub const DEFAULT_PRIVATE_KEY_PASSPHRASE: &str = "notasecret";

fn default_private_key_passphrase() -> SecretString {
    SecretString::new(DEFAULT_PRIVATE_KEY_PASSPHRASE.to_owned())
}

/// Credential settings for reaching BigQuery.
///
/// `method` is one of `private_key`, `compute_engine`, `json_key` or `application_default`.
/// Which of the remaining fields are required depends on it; the writer checks this when it is
/// constructed.
///
/// This intentionally does not implement `Serialize` to avoid leaking key material.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    /// Textual strategy tag.
    pub method: String,
    /// Service account email, used with `private_key`.
    #[serde(default)]
    pub email: Option<String>,
    /// Path to a PKCS12 key file, used with `private_key`.
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// Passphrase protecting the PKCS12 file.
    #[serde(default = "default_private_key_passphrase")]
    pub private_key_passphrase: SecretString,
    /// Either the inline JSON key or a path to a file containing it, used with `json_key`.
    #[serde(default)]
    pub json_key: Option<SecretString>,
}

impl AuthConfig {
    /// Creates a config for the given method with every optional field unset.
    pub fn with_method(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            email: None,
            private_key_path: None,
            private_key_passphrase: default_private_key_passphrase(),
            json_key: None,
        }
    }
}
