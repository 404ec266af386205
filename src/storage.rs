use crate::models::{UploadRecord, UserProfile};
use anyhow::Context;
use chrono::Utc;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};
use std::path::Path;
use uuid::Uuid;

// Define the database schema using CREATE TABLE IF NOT EXISTS statements
const MIGRATIONS_SQL: &str = "
-- Users Table
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY NOT NULL,
    password TEXT NOT NULL,
    api_key_ref TEXT, -- 'keyring', 'env:MY_API_KEY', a literal key, or null
    model TEXT NOT NULL,
    theme TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL -- Unix Timestamp (seconds)
);

-- Uploads Table
CREATE TABLE IF NOT EXISTS uploads (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    filename TEXT NOT NULL,
    uploaded_at INTEGER NOT NULL -- Unix Timestamp (seconds)
);
CREATE INDEX IF NOT EXISTS idx_uploads_uploaded_at ON uploads(uploaded_at);
";

#[derive(Debug)]
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// Creates a new StorageManager, connects to the database, and runs migrations.
    pub async fn new(db_path: &Path) -> Result<Self, anyhow::Error> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        // Create the database file if it doesn't exist
        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        // Connect to the database
        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        // Run migrations
        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies the database schema migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), anyhow::Error> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    /// Looks up the account matching the supplied login. Returns None when
    /// the username/password pair matches no account.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserProfile>, anyhow::Error> {
        log::debug!("Authenticating user: {}", username);
        let row = sqlx::query(
            r#"
            SELECT username, password, api_key_ref, model, theme, is_admin, created_at
            FROM users
            WHERE username = ? AND password = ?
            "#,
        )
        .bind(username)
        .bind(password)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query user for login")?;

        match row {
            Some(row) => {
                let profile = user_from_row(&row)?;
                log::info!("User '{}' authenticated", profile.username);
                Ok(Some(profile))
            }
            None => {
                log::warn!("Login failed for user: {}", username);
                Ok(None)
            }
        }
    }

    /// Creates a new account. Fails if the username is already taken.
    pub async fn create_user(&self, profile: &UserProfile) -> Result<(), anyhow::Error> {
        log::info!("Creating user: {}", profile.username);
        if self.user_exists(&profile.username).await? {
            return Err(anyhow::anyhow!("User '{}' already exists", profile.username));
        }

        let created_at_ts = profile.created_at.timestamp();
        sqlx::query(
            r#"
            INSERT INTO users (username, password, api_key_ref, model, theme, is_admin, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.username)
        .bind(&profile.password)
        .bind(profile.api_key_ref.as_deref())
        .bind(&profile.model)
        .bind(profile.theme.as_deref())
        .bind(profile.is_admin)
        .bind(created_at_ts)
        .execute(&self.pool)
        .await
        .context("Failed to insert new user into database")?;

        log::info!("Successfully created user '{}'", profile.username);
        Ok(())
    }

    /// Deletes an account.
    pub async fn delete_user(&self, username: &str) -> Result<(), anyhow::Error> {
        log::warn!("Deleting user: {}", username);
        let result = sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await
            .context("Failed to delete user from database")?;

        if result.rows_affected() == 0 {
            log::warn!("Attempted to delete non-existent user: {}", username);
            return Err(anyhow::anyhow!("User '{}' not found", username));
        }

        log::info!("Successfully deleted user '{}'", username);
        Ok(())
    }

    /// Fetches all usernames, alphabetically.
    pub async fn list_usernames(&self) -> Result<Vec<String>, anyhow::Error> {
        log::debug!("Fetching all usernames from database");
        let names: Vec<String> =
            sqlx::query_scalar("SELECT username FROM users ORDER BY username ASC")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch usernames from database")?;

        log::info!("Fetched {} users", names.len());
        Ok(names)
    }

    /// Points an account's stored key reference somewhere new. Takes effect
    /// at the next login.
    pub async fn update_api_key_ref(
        &self,
        username: &str,
        api_key_ref: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        log::info!("Updating API key reference for user: {}", username);
        let result = sqlx::query("UPDATE users SET api_key_ref = ? WHERE username = ?")
            .bind(api_key_ref)
            .bind(username)
            .execute(&self.pool)
            .await
            .context("Failed to update API key reference in database")?;

        if result.rows_affected() == 0 {
            log::warn!("Attempted to update key reference for non-existent user: {}", username);
            return Err(anyhow::anyhow!("User '{}' not found", username));
        }

        Ok(())
    }

    /// Adds the default admin account if no accounts exist.
    pub async fn add_default_admin_if_none(&self) -> Result<(), anyhow::Error> {
        log::debug!("Checking for existing user accounts");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;

        if count == 0 {
            log::info!("No users found, adding the default admin account.");
            let admin = UserProfile {
                username: "admin".to_string(),
                password: "admin".to_string(),
                // Resolved from the environment at login
                api_key_ref: Some("env:OPENAI_API_KEY".to_string()),
                model: crate::config::DEFAULT_MODEL.to_string(),
                theme: None,
                is_admin: true,
                created_at: Utc::now(),
            };
            self.create_user(&admin).await?;
            log::info!("Default admin account added (username: admin)");
        } else {
            log::debug!("Found {} existing users, skipping default admin.", count);
        }
        Ok(())
    }

    /// Records one upload's metadata.
    pub async fn insert_upload(&self, id: Uuid, filename: &str) -> Result<(), anyhow::Error> {
        log::debug!("Recording upload {} ({})", id, filename);
        let id_text = id.to_string();
        let uploaded_at_ts = Utc::now().timestamp();

        sqlx::query("INSERT INTO uploads (id, filename, uploaded_at) VALUES (?, ?, ?)")
            .bind(&id_text)
            .bind(filename)
            .bind(uploaded_at_ts)
            .execute(&self.pool)
            .await
            .context("Failed to insert upload into database")?;

        log::info!("Recorded upload {} ({})", id, filename);
        Ok(())
    }

    /// Fetches all recorded uploads, newest first.
    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>, anyhow::Error> {
        log::debug!("Fetching all uploads from database");
        // rowid breaks ties between uploads recorded in the same second
        let rows = sqlx::query(
            "SELECT id, filename, uploaded_at FROM uploads ORDER BY uploaded_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch uploads from database")?;

        let uploads = rows
            .iter()
            .map(upload_from_row)
            .collect::<Result<Vec<UploadRecord>, anyhow::Error>>()?;

        log::info!("Fetched {} uploads", uploads.len());
        Ok(uploads)
    }

    async fn user_exists(&self, username: &str) -> Result<bool, anyhow::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users by name")?;
        Ok(count > 0)
    }
}

// Timestamps are stored as INTEGER (Unix seconds) and need converting back
// to DateTime<Utc>; UUIDs are stored as TEXT and need parsing.
fn user_from_row(row: &SqliteRow) -> Result<UserProfile, anyhow::Error> {
    let created_at_ts: i64 = row.try_get("created_at").context("Failed to read created_at")?;
    Ok(UserProfile {
        username: row.try_get("username").context("Failed to read username")?,
        password: row.try_get("password").context("Failed to read password")?,
        api_key_ref: row
            .try_get("api_key_ref")
            .context("Failed to read api_key_ref")?,
        model: row.try_get("model").context("Failed to read model")?,
        theme: row.try_get("theme").context("Failed to read theme")?,
        is_admin: row
            .try_get::<i64, _>("is_admin")
            .context("Failed to read is_admin")?
            == 1,
        created_at: chrono::DateTime::from_timestamp(created_at_ts, 0)
            .context("Invalid created_at timestamp")?,
    })
}

fn upload_from_row(row: &SqliteRow) -> Result<UploadRecord, anyhow::Error> {
    let id_text: String = row.try_get("id").context("Failed to read upload id")?;
    let uploaded_at_ts: i64 = row
        .try_get("uploaded_at")
        .context("Failed to read uploaded_at")?;
    Ok(UploadRecord {
        id: Uuid::parse_str(&id_text).context("Failed to parse upload ID")?,
        filename: row.try_get("filename").context("Failed to read filename")?,
        uploaded_at: chrono::DateTime::from_timestamp(uploaded_at_ts, 0)
            .context("Invalid uploaded_at timestamp")?,
    })
}
