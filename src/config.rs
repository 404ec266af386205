use crate::models::UserProfile;
use anyhow::{Context, Result};
use keyring::Entry;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const SUPPORTED_MODELS: &[&str] = &["gpt-4", "gpt-4o", "gpt-3.5-turbo"];
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const KEYRING_SERVICE: &str = "termchat_api_key";

/// Where the SQLite database lives. Overridable with TERMCHAT_DB.
pub fn db_path() -> PathBuf {
    std::env::var_os("TERMCHAT_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("termchat.sqlite"))
}

/// Base URL of the completion service. Overridable with TERMCHAT_BASE_URL.
pub fn openai_base_url() -> String {
    std::env::var("TERMCHAT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

// --- API Key Retrieval ---

/// Resolves the account's stored key reference to an actual API key.
///
/// The `api_key_ref` column holds either a literal key, `env:VAR_NAME` to
/// read an environment variable, or `keyring` to read the OS keyring. A
/// reference that resolves to nothing yields `None` rather than an error;
/// a session without a key is usable until a send is attempted.
pub fn resolve_api_key(profile: &UserProfile) -> Option<String> {
    match profile.api_key_ref.as_deref() {
        Some(ref_str) if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            match std::env::var(env_var_name) {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!(
                        "Environment variable '{}' is not set; continuing without an API key",
                        env_var_name
                    );
                    None
                }
            }
        }
        Some("keyring") => {
            log::debug!("Retrieving API key from keyring for user: {}", profile.username);
            match Entry::new(KEYRING_SERVICE, &profile.username)
                .and_then(|entry| entry.get_password())
            {
                Ok(value) => Some(value),
                Err(e) => {
                    log::warn!(
                        "No keyring API key for '{}' ({}); continuing without an API key",
                        profile.username,
                        e
                    );
                    None
                }
            }
        }
        Some("") | None => None,
        // Anything else is the key itself, stored directly on the account
        Some(literal) => Some(literal.to_string()),
    }
}

/// Stores an API key in the OS keyring under the given account name.
pub fn set_api_key_in_keyring(username: &str, api_key: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, username)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for user: {}", username);
    entry
        .set_password(api_key)
        .context(format!("Failed to set API key in keyring for '{}'", username))
}
