//! The `user_progress` table on Supabase, through its PostgREST endpoint.

use postgrest::Postgrest;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{Credentials, ProgressRow, RemoteTable},
    error::RemoteError,
    level::ItemId,
};

const TABLE: &str = "user_progress";
const COLUMNS: &str = "user_id,kanji_id,progress_level,is_archived";
const PLACEHOLDER_URL: &str = "https://placeholder.supabase.co";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl SupabaseConfig {
    /// Builds without real credentials ship a placeholder project, which must never be talked to.
    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && self.supabase_url.trim_end_matches('/') != PLACEHOLDER_URL
    }
}

pub struct SupabaseTable {
    client: Postgrest,
    anon_key: String,
}

impl SupabaseTable {
    /// `None` if the config is not usable, which keeps every learner on device storage.
    pub fn new(config: &SupabaseConfig) -> Option<Self> {
        if !config.is_configured() {
            log::warn!("Supabase is not configured; progress will only be kept on this device");
            return None;
        }
        let url = config.supabase_url.trim_end_matches('/');
        let client = Postgrest::new(format!("{url}/rest/v1"))
            .insert_header("apikey", config.supabase_anon_key.clone());
        Some(Self {
            client,
            anon_key: config.supabase_anon_key.clone(),
        })
    }

    /// Row-level security needs the learner's own token; the anon key is the fallback.
    fn table(&self, credentials: &Credentials) -> postgrest::Builder {
        let token = credentials
            .access_token
            .as_deref()
            .unwrap_or(&self.anon_key);
        self.client.from(TABLE).auth(token)
    }

    /// Run a request and return the body of a successful response.
    async fn send(request: postgrest::Builder) -> Result<String, RemoteError> {
        let response = request
            .execute()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn fetch_rows(request: postgrest::Builder) -> Result<Vec<ProgressRow>, RemoteError> {
        let body = Self::send(request).await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode {
            message: e.to_string(),
            body,
        })
    }
}

impl RemoteTable for SupabaseTable {
    async fn select_all(&self, credentials: &Credentials) -> Result<Vec<ProgressRow>, RemoteError> {
        let request = self
            .table(credentials)
            .select(COLUMNS)
            .eq("user_id", credentials.user_id.as_str());
        Self::fetch_rows(request).await
    }

    async fn select_items(
        &self,
        credentials: &Credentials,
        item_ids: &[ItemId],
    ) -> Result<Vec<ProgressRow>, RemoteError> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self
            .table(credentials)
            .select(COLUMNS)
            .eq("user_id", credentials.user_id.as_str())
            .in_("kanji_id", item_ids.iter().map(|item_id| item_id.to_string()));
        Self::fetch_rows(request).await
    }

    async fn upsert(
        &self,
        credentials: &Credentials,
        rows: &[ProgressRow],
    ) -> Result<(), RemoteError> {
        if rows.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_string(rows)
            .map_err(|e| RemoteError::Transport(format!("failed to encode rows: {e}")))?;
        let request = self
            .table(credentials)
            .upsert(body)
            .on_conflict("user_id,kanji_id");
        Self::send(request).await.map(|_| ())
    }

    async fn delete_all(&self, credentials: &Credentials) -> Result<(), RemoteError> {
        let request = self
            .table(credentials)
            .delete()
            .eq("user_id", credentials.user_id.as_str());
        Self::send(request).await.map(|_| ())
    }
}
