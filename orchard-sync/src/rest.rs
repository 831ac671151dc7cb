//! REST-backed remote source.

use crate::client::{ClientError, RestClient};
use async_trait::async_trait;
use orchard_core::{CacheableEntity, EntityId, Orchard, OrchardResult, RemoteError};
use orchard_store::RemoteSource;
use std::marker::PhantomData;

/// Serves entities of one table through [`RestClient::select`].
pub struct RestRemoteSource<T = Orchard> {
    client: RestClient,
    table: String,
    id_column: String,
    owner_column: String,
    status_column: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> RestRemoteSource<T> {
    pub fn new(client: RestClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            id_column: "id".to_string(),
            owner_column: "user_id".to_string(),
            status_column: "status".to_string(),
            _entity: PhantomData,
        }
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_owner_column(mut self, column: impl Into<String>) -> Self {
        self.owner_column = column.into();
        self
    }

    pub fn with_status_column(mut self, column: impl Into<String>) -> Self {
        self.status_column = column.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl<T> std::fmt::Debug for RestRemoteSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRemoteSource")
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .field("owner_column", &self.owner_column)
            .field("status_column", &self.status_column)
            .finish()
    }
}

#[async_trait]
impl<T: CacheableEntity> RemoteSource for RestRemoteSource<T> {
    type Entity = T;

    async fn fetch_entity(&self, id: &EntityId) -> OrchardResult<Option<T>> {
        let rows: Vec<T> = self
            .client
            .select(&self.table, &[(self.id_column.as_str(), id.as_str())])
            .await
            .map_err(|e| remote_error("fetch_entity", e))?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_entities_by_owner(&self, owner_id: &str) -> OrchardResult<Vec<T>> {
        let rows = self
            .client
            .select(&self.table, &[(self.owner_column.as_str(), owner_id)])
            .await
            .map_err(|e| remote_error("fetch_entities_by_owner", e))?;
        tracing::debug!(table = %self.table, owner_id, rows = rows.len(), "Fetched owner rows");
        Ok(rows)
    }

    async fn fetch_entities_by_status(&self, status: &str) -> OrchardResult<Vec<T>> {
        let rows = self
            .client
            .select(&self.table, &[(self.status_column.as_str(), status)])
            .await
            .map_err(|e| remote_error("fetch_entities_by_status", e))?;
        tracing::debug!(table = %self.table, status, rows = rows.len(), "Fetched status rows");
        Ok(rows)
    }
}

fn remote_error(operation: &str, err: ClientError) -> RemoteError {
    let operation = operation.to_string();
    match err {
        ClientError::Status { status, body } => RemoteError::Status {
            operation,
            status,
            body,
        },
        ClientError::Serde(e) => RemoteError::Decode {
            operation,
            reason: e.to_string(),
        },
        ClientError::Http(e) if e.is_decode() => RemoteError::Decode {
            operation,
            reason: e.to_string(),
        },
        other => RemoteError::Transport {
            operation,
            reason: other.to_string(),
        },
    }
}
