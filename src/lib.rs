// Declare the modules
pub mod api;
pub mod config;
pub mod models;
pub mod repl;
pub mod session;
pub mod state;
pub mod storage;
pub mod themes;

use crate::api::{CompletionGateway, OpenAICompatibleGateway};
use crate::state::Session;
use crate::storage::StorageManager;
use anyhow::Result;
use std::sync::Arc;

/// Wires storage and the completion gateway together, signs a user in, and
/// hands control to the interactive loop.
pub async fn run() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let storage = StorageManager::new(&config::db_path()).await?;
    storage.add_default_admin_if_none().await?;

    let gateway: Arc<dyn CompletionGateway> =
        Arc::new(OpenAICompatibleGateway::new(config::openai_base_url()));

    let mut lines = repl::input_lines();
    let Some(profile) = repl::login(&storage, &mut lines).await? else {
        return Ok(());
    };

    let mut session = Session::start(profile, gateway);
    repl::run(&storage, &mut session, &mut lines).await
}
