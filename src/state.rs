use crate::api::CompletionGateway;
use crate::config;
use crate::models::{SessionCredentials, UserProfile};
use crate::session::ChatSession;
use crate::themes::{self, Theme};
use std::sync::Arc;

// Everything one signed-in user works with: their profile, their display
// theme, and the chat engine holding the conversation.
pub struct Session {
    pub profile: UserProfile,
    pub theme: &'static Theme,
    pub chat: Arc<ChatSession>,
}

impl Session {
    /// Builds the per-login session: resolves the stored key reference into
    /// usable credentials and starts an empty conversation.
    pub fn start(profile: UserProfile, gateway: Arc<dyn CompletionGateway>) -> Self {
        let api_key = config::resolve_api_key(&profile);
        if api_key.is_none() {
            log::warn!("Session for '{}' starts without an API key", profile.username);
        }

        let credentials = SessionCredentials {
            api_key,
            model: profile.model.clone(),
        };
        let theme = themes::lookup(profile.theme.as_deref().unwrap_or(themes::DEFAULT_THEME));
        log::info!(
            "Session started for '{}' (model: {}, theme: {})",
            profile.username,
            credentials.model,
            theme.name
        );

        Session {
            profile,
            theme,
            chat: Arc::new(ChatSession::new(gateway, credentials)),
        }
    }
}
