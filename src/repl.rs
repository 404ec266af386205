use crate::config;
use crate::models::UserProfile;
use crate::state::Session;
use crate::storage::StorageManager;
use crate::themes;
use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write as _;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use uuid::Uuid;

pub type InputLines = Lines<BufReader<Stdin>>;

pub fn input_lines() -> InputLines {
    BufReader::new(tokio::io::stdin()).lines()
}

// Prints a prompt and reads one trimmed line. None means end of input.
// Generic over the reader so command flows can be driven by scripted input.
async fn prompt_line<R>(lines: &mut Lines<R>, prompt: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    print!("{prompt}");
    std::io::stdout().flush().context("Failed to flush stdout")?;
    let line = lines
        .next_line()
        .await
        .context("Failed to read from stdin")?;
    Ok(line.map(|l| l.trim().to_string()))
}

/// Asks for a username and password until a stored account matches.
/// Returns None if input ends before anyone signs in.
pub async fn login<R>(
    storage: &StorageManager,
    lines: &mut Lines<R>,
) -> Result<Option<UserProfile>>
where
    R: AsyncBufRead + Unpin,
{
    println!("🔐 termchat login");
    loop {
        let Some(username) = prompt_line(lines, "username: ").await? else {
            return Ok(None);
        };
        let Some(password) = prompt_line(lines, "password: ").await? else {
            return Ok(None);
        };
        if username.is_empty() {
            continue;
        }
        match storage.authenticate(&username, &password).await? {
            Some(profile) => return Ok(Some(profile)),
            None => println!("Login failed"),
        }
    }
}

/// The interactive loop. Plain lines become chat prompts; lines starting
/// with '/' are commands.
pub async fn run<R>(
    storage: &StorageManager,
    session: &mut Session,
    lines: &mut Lines<R>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    print_banner(session);
    loop {
        let prompt = session.theme.paint_accent("you> ");
        let Some(line) = prompt_line(lines, &prompt).await? else {
            break;
        };
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            match dispatch_command(command, storage, session, lines).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => println!("❌ {err:#}"),
            }
        } else {
            stream_turn(session, &line).await;
        }
    }
    println!("bye");
    Ok(())
}

// Banner lines carry the theme's banner palette; everything else stays in
// the terminal's own colors.
fn print_banner(session: &Session) {
    let theme = session.theme;
    let welcome = format!("🤖 termchat: welcome, {}", session.profile.username);
    let status = format!("Theme: {} | Model: {}", theme.name, session.chat.model());
    println!("{}", theme.paint_banner(&welcome));
    println!("{}", theme.paint_banner(&status));
    println!("Type a prompt to chat, or /help for commands.");
}

// Returns Ok(false) when the session should end.
async fn dispatch_command<R>(
    command: &str,
    storage: &StorageManager,
    session: &mut Session,
    lines: &mut Lines<R>,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return Ok(false),
        "help" => print_help(),
        "history" => show_history(session).await,
        "theme" => switch_theme(session, arg),
        "uploads" => show_uploads(storage).await?,
        "upload" => record_upload(storage, arg).await?,
        "setkey" => set_key(storage, session, lines).await?,
        "users" => list_users(storage, session).await?,
        "adduser" => add_user(storage, session, lines).await?,
        "deluser" => delete_user(storage, session, arg).await?,
        other => println!("Unknown command: /{other} (try /help)"),
    }
    Ok(true)
}

fn print_help() {
    println!("  /history          show the conversation, newest first");
    println!("  /theme [name]     switch theme, or list themes");
    println!("  /uploads          list recorded uploads, newest first");
    println!("  /upload <name>    record an upload");
    println!("  /setkey           store an API key in the OS keyring");
    println!("  /users            list accounts (admin)");
    println!("  /adduser          create an account (admin)");
    println!("  /deluser <name>   delete an account (admin)");
    println!("  /quit             sign out");
}

// Relays one prompt through the session engine, rendering the partial
// response as it grows.
async fn stream_turn(session: &Session, prompt: &str) {
    let chat = session.chat.clone();
    let mut live = chat.subscribe_live();

    let send_task = {
        let chat = chat.clone();
        let prompt = prompt.to_string();
        tokio::spawn(async move { chat.send(&prompt).await })
    };

    print!("{}", session.theme.paint_accent("termchat: "));
    let _ = std::io::stdout().flush();

    // Published partials only ever grow by appending, so printing the tail
    // past what we already wrote renders the stream incrementally.
    let mut printed = 0;
    while live.changed().await.is_ok() {
        let partial = live.borrow_and_update().clone();
        match partial {
            Some(text) => {
                if text.len() > printed {
                    print!("{}", &text[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = text.len();
                }
            }
            // The live view clears once the turn commits.
            None => break,
        }
    }

    if let Err(err) = send_task.await {
        log::error!("Send task failed: {}", err);
    }

    let history = chat.history().await;
    match history.last() {
        Some(turn) if turn.is_error() => {
            if printed > 0 {
                println!();
            }
            println!("{}", turn.response);
        }
        Some(turn) => {
            // Watch updates can coalesce; print whatever tail we missed.
            if turn.response.len() > printed {
                print!("{}", &turn.response[printed..]);
            }
            println!();
        }
        None => println!(),
    }
    println!();
}

async fn show_history(session: &Session) {
    let history = session.chat.history().await;
    if history.is_empty() {
        println!("(no messages yet)");
        return;
    }
    for turn in history.iter().rev() {
        println!("You: {}", turn.prompt);
        println!(
            "{}{}",
            session.theme.paint_accent("termchat: "),
            turn.response
        );
        println!();
    }
}

fn switch_theme(session: &mut Session, name: &str) {
    if name.is_empty() {
        println!("Themes:");
        for theme_name in themes::theme_names() {
            let marker = if theme_name == session.theme.name {
                "*"
            } else {
                " "
            };
            println!(" {marker} {theme_name}");
        }
        return;
    }
    match themes::find(name) {
        Some(theme) => {
            session.theme = theme;
            println!("Theme set to {}", theme.name);
        }
        None => println!("Unknown theme: {name} (use /theme to list)"),
    }
}

async fn show_uploads(storage: &StorageManager) -> Result<()> {
    let uploads = storage.list_uploads().await?;
    if uploads.is_empty() {
        println!("(no uploads recorded)");
        return Ok(());
    }
    for upload in uploads {
        println!(
            "{}  {}  {}",
            upload.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
            upload.id,
            upload.filename
        );
    }
    Ok(())
}

async fn record_upload(storage: &StorageManager, filename: &str) -> Result<()> {
    if filename.is_empty() {
        println!("usage: /upload <filename>");
        return Ok(());
    }
    let id = Uuid::new_v4();
    storage.insert_upload(id, filename).await?;
    println!("Recorded upload {id}");
    Ok(())
}

async fn set_key<R>(
    storage: &StorageManager,
    session: &Session,
    lines: &mut Lines<R>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let Some(api_key) = prompt_line(lines, "api key: ").await? else {
        return Ok(());
    };
    if api_key.is_empty() {
        println!("No key entered");
        return Ok(());
    }
    config::set_api_key_in_keyring(&session.profile.username, &api_key)?;
    storage
        .update_api_key_ref(&session.profile.username, Some("keyring"))
        .await?;
    println!("Key stored in the OS keyring; it takes effect at your next login.");
    Ok(())
}

async fn list_users(storage: &StorageManager, session: &Session) -> Result<()> {
    if !session.profile.is_admin {
        println!("🚫 Admin only");
        return Ok(());
    }
    for username in storage.list_usernames().await? {
        println!("{username}");
    }
    Ok(())
}

async fn add_user<R>(
    storage: &StorageManager,
    session: &Session,
    lines: &mut Lines<R>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    if !session.profile.is_admin {
        println!("🚫 Admin only");
        return Ok(());
    }
    let Some(username) = prompt_line(lines, "new username: ").await? else {
        return Ok(());
    };
    if username.is_empty() {
        println!("Username required");
        return Ok(());
    }
    let Some(password) = prompt_line(lines, "password: ").await? else {
        return Ok(());
    };
    let Some(api_key) =
        prompt_line(lines, "api key (blank for none; env:VAR and keyring work): ").await?
    else {
        return Ok(());
    };
    // The model must come from the supported list; blank takes the default.
    let model_prompt = format!(
        "model [{}] ({}): ",
        config::DEFAULT_MODEL,
        config::SUPPORTED_MODELS.join(", ")
    );
    let model = loop {
        let Some(entry) = prompt_line(lines, &model_prompt).await? else {
            return Ok(());
        };
        if entry.is_empty() {
            break config::DEFAULT_MODEL.to_string();
        }
        if config::SUPPORTED_MODELS.contains(&entry.as_str()) {
            break entry;
        }
        println!(
            "Unsupported model: {entry} (choose one of: {})",
            config::SUPPORTED_MODELS.join(", ")
        );
    };
    let Some(theme) = prompt_line(lines, &format!("theme [{}]: ", themes::DEFAULT_THEME)).await?
    else {
        return Ok(());
    };
    let Some(admin_answer) = prompt_line(lines, "admin? [y/N]: ").await? else {
        return Ok(());
    };

    let profile = UserProfile {
        username,
        password,
        api_key_ref: (!api_key.is_empty()).then_some(api_key),
        model,
        theme: (!theme.is_empty()).then_some(theme),
        is_admin: admin_answer.eq_ignore_ascii_case("y"),
        created_at: Utc::now(),
    };
    storage.create_user(&profile).await?;
    println!("✅ User '{}' created", profile.username);
    Ok(())
}

async fn delete_user(storage: &StorageManager, session: &Session, username: &str) -> Result<()> {
    if !session.profile.is_admin {
        println!("🚫 Admin only");
        return Ok(());
    }
    if username.is_empty() {
        println!("usage: /deluser <username>");
        return Ok(());
    }
    if username == session.profile.username {
        println!("🚫 You cannot delete the account you are signed in with");
        return Ok(());
    }
    storage.delete_user(username).await?;
    println!("🗑️ Deleted '{username}'");
    Ok(())
}
