//! Agents API.

use crate::api::{id_path, require_id};
use crate::client::CodeGptClient;
use crate::error::{Error, Result};
use crate::types::{Agent, AgentDocumentsRequest, AgentLookup, AgentRequest, confirmation_message};

/// Agents API client.
pub struct AgentsApi {
    client: CodeGptClient,
}

impl AgentsApi {
    pub(crate) fn new(client: CodeGptClient) -> Self {
        Self { client }
    }

    /// List all agents.
    pub async fn list(&self) -> Result<Vec<Agent>> {
        self.client.get("agent").await
    }

    /// Get an agent by ID.
    pub async fn get(&self, id: &str) -> Result<Agent> {
        require_id("agent id", id)?;
        let lookup: AgentLookup = self.client.get(&id_path("agent", id)).await?;
        match lookup {
            AgentLookup::One(agent) => Ok(agent),
            AgentLookup::Many(agents) => agents
                .into_iter()
                .next()
                .ok_or_else(|| Error::api(404, Some(format!("agent {} not found", id)))),
        }
    }

    /// Create a new agent.
    ///
    /// `name`, `model`, `prompt`, `topk` and `welcome` must all be set.
    pub async fn create(&self, request: AgentRequest) -> Result<Agent> {
        let missing = request.missing_required();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "missing agent fields: {}",
                missing.join(", ")
            )));
        }
        self.client.post("agent", &request).await
    }

    /// Update some fields of an agent.
    pub async fn update(&self, id: &str, request: AgentRequest) -> Result<Agent> {
        require_id("agent id", id)?;
        if request.is_empty() {
            return Err(Error::Validation("no agent fields to update".to_string()));
        }
        self.client.patch(&id_path("agent", id), &request).await
    }

    /// Delete an agent, returning the server's confirmation.
    pub async fn delete(&self, id: &str) -> Result<String> {
        require_id("agent id", id)?;
        let body = self.client.delete(&id_path("agent", id)).await?;
        Ok(confirmation_message(&body))
    }

    /// Replace the documents attached to an agent.
    pub async fn update_documents(&self, id: &str, document_ids: Vec<String>) -> Result<Agent> {
        require_id("agent id", id)?;
        if document_ids.is_empty() {
            return Err(Error::Validation("document ids must not be empty".to_string()));
        }
        if let Some(blank) = document_ids.iter().position(|d| d.trim().is_empty()) {
            return Err(Error::Validation(format!("document id at index {} is blank", blank)));
        }

        let request = AgentDocumentsRequest {
            agent_documents: document_ids,
        };
        self.client
            .patch(&format!("{}/documents", id_path("agent", id)), &request)
            .await
    }
}
