//! Named backend connections persisted in SQLite
//!
//! Each connection records the organization URL, project and personal access
//! token needed to reach one Azure DevOps project. One connection can be
//! marked as the default used when a caller does not name one.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection as SqliteConnection, OptionalExtension, Row};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

const DEFAULT_CONNECTION_KEY: &str = "default_connection";

const SELECT_COLUMNS: &str = "name, org_url, project, token, created_at, modified_at";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Connection '{0}' not found")]
    NotFound(String),

    #[error("Connection '{0}' already exists")]
    Duplicate(String),

    #[error("Invalid connection: {0}")]
    InvalidInput(String),

    #[error("Database schema version {found} is not supported, expected {expected}")]
    SchemaVersion { found: i32, expected: i32 },

    #[error("Registry lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored backend connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub name: String,
    pub org_url: String,
    pub project: String,
    pub token: SecretString,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Connection {
    /// Listing view with the token masked
    pub fn summary(&self, is_default: bool) -> ConnectionSummary {
        ConnectionSummary {
            name: self.name.clone(),
            org_url: self.org_url.clone(),
            project: self.project.clone(),
            token: mask_token(self.token.expose_secret()),
            is_default,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// What listings and API responses show of a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub name: String,
    pub org_url: String,
    pub project: String,
    pub token: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConnection {
    pub name: String,
    pub org_url: String,
    pub project: String,
    pub token: String,
}

/// Partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub org_url: Option<String>,
    pub project: Option<String>,
    pub token: Option<String>,
}

/// Shows the last four characters of a token
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "********".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("********{}", tail)
}

fn validate_org_url(org_url: &str) -> Result<String, RegistryError> {
    let trimmed = org_url.trim().trim_end_matches('/');
    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| RegistryError::InvalidInput(format!("organization URL '{}': {}", org_url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RegistryError::InvalidInput(format!(
            "organization URL '{}' must use http or https",
            org_url
        )));
    }
    Ok(trimmed.to_string())
}

fn require(field: &str, value: &str) -> Result<String, RegistryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_connection(row: &Row<'_>) -> rusqlite::Result<Connection> {
    let token: String = row.get(3)?;
    Ok(Connection {
        name: row.get(0)?,
        org_url: row.get(1)?,
        project: row.get(2)?,
        token: SecretString::from(token),
        created_at: parse_timestamp(row, 4)?,
        modified_at: parse_timestamp(row, 5)?,
    })
}

/// SQLite-backed connection store
pub struct ConnectionRegistry {
    path: PathBuf,
    conn: Mutex<SqliteConnection>,
}

impl ConnectionRegistry {
    /// Opens (creating if needed) the registry database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = SqliteConnection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(path, conn)
    }

    /// Opens a throwaway registry that lives only as long as the value
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = SqliteConnection::open_in_memory()?;
        Self::init(PathBuf::from(":memory:"), conn)
    }

    fn init(path: PathBuf, conn: SqliteConnection) -> Result<Self, RegistryError> {
        let current_version: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .unwrap_or(0);

        if current_version == 0 {
            conn.execute_batch(include_str!("schema.sql"))?;
        } else if current_version != SCHEMA_VERSION {
            return Err(RegistryError::SchemaVersion {
                found: current_version,
                expected: SCHEMA_VERSION,
            });
        }

        tracing::debug!(path = %path.display(), "Opened connection registry");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteConnection>, RegistryError> {
        self.conn.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    fn exists(conn: &SqliteConnection, name: &str) -> Result<bool, RegistryError> {
        let found: Option<i64> = conn
            .query_row("SELECT id FROM connections WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Stores a new connection; names are unique
    pub fn add(&self, new: NewConnection) -> Result<Connection, RegistryError> {
        let name = require("name", &new.name)?;
        let org_url = validate_org_url(&new.org_url)?;
        let project = require("project", &new.project)?;
        let token = require("token", &new.token)?;
        let now = Utc::now();

        let conn = self.lock()?;
        if Self::exists(&conn, &name)? {
            return Err(RegistryError::Duplicate(name));
        }
        conn.execute(
            "INSERT INTO connections (name, org_url, project, token, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![name, org_url, project, token, now.to_rfc3339()],
        )?;

        tracing::info!(connection = %name, "Added connection");
        Ok(Connection {
            name,
            org_url,
            project,
            token: SecretString::from(token),
            created_at: now,
            modified_at: now,
        })
    }

    pub fn get(&self, name: &str) -> Result<Connection, RegistryError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM connections WHERE name = ?1", SELECT_COLUMNS),
            params![name],
            row_to_connection,
        )
        .optional()?
        .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All connections, ordered by name
    pub fn list(&self) -> Result<Vec<Connection>, RegistryError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM connections ORDER BY name", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], row_to_connection)?;
        let mut connections = Vec::new();
        for row in rows {
            connections.push(row?);
        }
        Ok(connections)
    }

    /// Listing view of every connection, tokens masked
    pub fn summaries(&self) -> Result<Vec<ConnectionSummary>, RegistryError> {
        let default = self.default_name()?;
        Ok(self
            .list()?
            .iter()
            .map(|c| c.summary(default.as_deref() == Some(c.name.as_str())))
            .collect())
    }

    pub fn update(&self, name: &str, update: ConnectionUpdate) -> Result<Connection, RegistryError> {
        let mut current = self.get(name)?;

        if let Some(org_url) = update.org_url {
            current.org_url = validate_org_url(&org_url)?;
        }
        if let Some(project) = update.project {
            current.project = require("project", &project)?;
        }
        if let Some(token) = update.token {
            current.token = SecretString::from(require("token", &token)?);
        }
        current.modified_at = Utc::now();

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE connections SET org_url = ?1, project = ?2, token = ?3, modified_at = ?4
             WHERE name = ?5",
            params![
                current.org_url,
                current.project,
                current.token.expose_secret(),
                current.modified_at.to_rfc3339(),
                name
            ],
        )?;
        if changed == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        tracing::info!(connection = %name, "Updated connection");
        Ok(current)
    }

    /// Removes a connection, clearing the default if it pointed here
    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM connections WHERE name = ?1", params![name])?;
        if removed == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        conn.execute(
            "DELETE FROM settings WHERE key = ?1 AND value = ?2",
            params![DEFAULT_CONNECTION_KEY, name],
        )?;

        tracing::info!(connection = %name, "Deleted connection");
        Ok(())
    }

    pub fn set_default(&self, name: &str) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        if !Self::exists(&conn, name)? {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![DEFAULT_CONNECTION_KEY, name],
        )?;
        Ok(())
    }

    pub fn clear_default(&self) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![DEFAULT_CONNECTION_KEY])?;
        Ok(())
    }

    fn default_name(&self) -> Result<Option<String>, RegistryError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![DEFAULT_CONNECTION_KEY],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// The default connection, if one is set
    pub fn default_connection(&self) -> Result<Option<Connection>, RegistryError> {
        match self.default_name()? {
            Some(name) => self.get(&name).map(Some),
            None => Ok(None),
        }
    }

    /// Looks up `name`, or the default connection when `name` is `None`
    pub fn resolve(&self, name: Option<&str>) -> Result<Connection, RegistryError> {
        match name {
            Some(name) => self.get(name),
            None => self
                .default_connection()?
                .ok_or_else(|| RegistryError::NotFound("<default>".to_string())),
        }
    }
}
