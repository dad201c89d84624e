//! Per-user external provider credentials.
//!
//! One row per (user, provider). Token refresh responses from some
//! providers omit the refresh token; the upsert keeps the stored one in
//! that case so the connection survives.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use valet_store::Store;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS oauth_tokens (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       TEXT NOT NULL,
            provider      TEXT NOT NULL,
            access_token  TEXT NOT NULL,
            refresh_token TEXT,
            expires_at    TEXT,
            scopes        TEXT,
            account_id    TEXT,
            updated_at    TEXT NOT NULL,
            UNIQUE(user_id, provider)
        );",
    )
}

#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<String>,
    pub account_id: Option<String>,
}

#[derive(Clone)]
pub struct OAuthTokenStore {
    store: Store,
}

impl OAuthTokenStore {
    pub fn new(store: Store) -> Result<Self> {
        store.with(init_db)?;
        Ok(Self { store })
    }

    /// Insert or update the token row for (user, provider). A `None`
    /// refresh token on update preserves the existing value.
    pub fn upsert(&self, token: &OAuthToken) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let expires = token.expires_at.map(|t| t.to_rfc3339());
        self.store.with(|c| {
            c.execute(
                "INSERT INTO oauth_tokens
                    (user_id, provider, access_token, refresh_token,
                     expires_at, scopes, account_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, provider) DO UPDATE SET
                    access_token  = excluded.access_token,
                    refresh_token = COALESCE(excluded.refresh_token,
                                             oauth_tokens.refresh_token),
                    expires_at    = excluded.expires_at,
                    scopes        = excluded.scopes,
                    account_id    = COALESCE(excluded.account_id,
                                             oauth_tokens.account_id),
                    updated_at    = excluded.updated_at",
                params![
                    token.user_id,
                    token.provider,
                    token.access_token,
                    token.refresh_token,
                    expires,
                    token.scopes,
                    token.account_id,
                    now,
                ],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, user_id: &str, provider: &str) -> Result<Option<OAuthToken>> {
        let row = self.store.with(|c| {
            c.query_row(
                "SELECT user_id, provider, access_token, refresh_token,
                        expires_at, scopes, account_id
                 FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider],
                |r| {
                    let expires: Option<String> = r.get(4)?;
                    Ok(OAuthToken {
                        user_id: r.get(0)?,
                        provider: r.get(1)?,
                        access_token: r.get(2)?,
                        refresh_token: r.get(3)?,
                        expires_at: expires
                            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                            .map(|t| t.with_timezone(&Utc)),
                        scopes: r.get(5)?,
                        account_id: r.get(6)?,
                    })
                },
            )
            .optional()
        })?;
        Ok(row)
    }

    pub fn delete(&self, user_id: &str, provider: &str) -> Result<bool> {
        let n = self.store.with(|c| {
            c.execute(
                "DELETE FROM oauth_tokens WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider],
            )
        })?;
        Ok(n > 0)
    }
}
