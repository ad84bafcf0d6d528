//! Documents API.

use crate::api::{id_path, require_id};
use crate::client::CodeGptClient;
use crate::error::Result;
use crate::types::{Document, confirmation_message};

/// Documents API client.
pub struct DocumentsApi {
    client: CodeGptClient,
}

impl DocumentsApi {
    pub(crate) fn new(client: CodeGptClient) -> Self {
        Self { client }
    }

    /// List all documents.
    pub async fn list(&self) -> Result<Vec<Document>> {
        self.client.get("document").await
    }

    /// Get a document by ID.
    pub async fn get(&self, id: &str) -> Result<Document> {
        require_id("document id", id)?;
        self.client.get(&id_path("document", id)).await
    }

    /// Delete a document, returning the server's confirmation.
    pub async fn delete(&self, id: &str) -> Result<String> {
        require_id("document id", id)?;
        let body = self.client.delete(&id_path("document", id)).await?;
        Ok(confirmation_message(&body))
    }
}
