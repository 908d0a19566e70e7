//! SQLite agent profile repository.

use agentflow_core::repository::AgentRepository;
use agentflow_types::agent::Agent;
use agentflow_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::store::{
    SqliteWorkflowStore, db_error, format_datetime, from_json, parse_datetime, parse_status,
    parse_uuid, to_json,
};

const COLUMNS: &str = "id, name, description, provider, model, system_prompt, tools, \
    temperature, max_tokens, max_iterations, tags, created_at, updated_at";

struct AgentRow {
    id: String,
    name: String,
    description: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    tools: String,
    temperature: Option<f64>,
    max_tokens: Option<i64>,
    max_iterations: Option<i64>,
    tags: String,
    created_at: String,
    updated_at: String,
}

impl AgentRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
            system_prompt: row.try_get("system_prompt")?,
            tools: row.try_get("tools")?,
            temperature: row.try_get("temperature")?,
            max_tokens: row.try_get("max_tokens")?,
            max_iterations: row.try_get("max_iterations")?,
            tags: row.try_get("tags")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_agent(self) -> Result<Agent, RepositoryError> {
        Ok(Agent {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            provider: self.provider.as_deref().map(parse_status).transpose()?,
            model: self.model,
            system_prompt: self.system_prompt,
            tools: from_json("tools", &self.tools)?,
            temperature: self.temperature,
            max_tokens: self.max_tokens.map(|n| n as u32),
            max_iterations: self.max_iterations.map(|n| n as u32),
            tags: from_json("tags", &self.tags)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

impl AgentRepository for SqliteWorkflowStore {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO agents ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.provider.map(|p| p.to_string()))
        .bind(&agent.model)
        .bind(&agent.system_prompt)
        .bind(to_json(&agent.tools)?)
        .bind(agent.temperature)
        .bind(agent.max_tokens.map(i64::from))
        .bind(agent.max_iterations.map(i64::from))
        .bind(to_json(&agent.tags)?)
        .bind(format_datetime(&agent.created_at))
        .bind(format_datetime(&agent.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update_agent(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE agents SET name = ?, description = ?, provider = ?, model = ?,
               system_prompt = ?, tools = ?, temperature = ?, max_tokens = ?,
               max_iterations = ?, tags = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(agent.provider.map(|p| p.to_string()))
        .bind(&agent.model)
        .bind(&agent.system_prompt)
        .bind(to_json(&agent.tools)?)
        .bind(agent.temperature)
        .bind(agent.max_tokens.map(i64::from))
        .bind(agent.max_iterations.map(i64::from))
        .bind(to_json(&agent.tags)?)
        .bind(format_datetime(&agent.updated_at))
        .bind(agent.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_agent(&self, id: &Uuid) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM agents WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_error)?;

        row.map(|row| AgentRow::from_row(&row).map_err(db_error)?.into_agent())
            .transpose()
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM agents ORDER BY name"))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|row| AgentRow::from_row(row).map_err(db_error)?.into_agent())
            .collect()
    }

    async fn delete_agent(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::agent::AgentSpec;
    use agentflow_types::llm::ProviderKind;
    use chrono::Utc;

    use crate::sqlite::store::test_store;

    fn agent(name: &str) -> Agent {
        Agent::from_spec(
            AgentSpec {
                name: name.into(),
                provider: Some(ProviderKind::Anthropic),
                model: Some("claude-haiku".into()),
                system_prompt: Some("Answer support tickets.".into()),
                tools: vec!["calculator".into()],
                temperature: Some(0.4),
                max_iterations: Some(4),
                tags: vec!["support".into()],
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let (store, _dir) = test_store().await;
        let a = agent("support");
        store.insert_agent(&a).await.unwrap();

        let loaded = store.get_agent(&a.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "support");
        assert_eq!(loaded.provider, Some(ProviderKind::Anthropic));
        assert_eq!(loaded.system_prompt, a.system_prompt);
        assert_eq!(loaded.tools, vec!["calculator".to_string()]);
        assert_eq!(loaded.temperature, Some(0.4));
        assert_eq!(loaded.max_iterations, Some(4));
        assert_eq!(loaded.tags, vec!["support".to_string()]);
        assert!(store.get_agent(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (store, _dir) = test_store().await;
        store.insert_agent(&agent("support")).await.unwrap();

        let err = store.insert_agent(&agent("support")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_update_list_delete() {
        let (store, _dir) = test_store().await;
        let mut a = agent("writer");
        store.insert_agent(&a).await.unwrap();
        store.insert_agent(&agent("editor")).await.unwrap();

        a.provider = None;
        a.tools.clear();
        store.update_agent(&a).await.unwrap();
        let loaded = store.get_agent(&a.id).await.unwrap().unwrap();
        assert!(loaded.provider.is_none());
        assert!(loaded.tools.is_empty());

        let names: Vec<String> = store
            .list_agents()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["editor", "writer"]);

        assert!(store.delete_agent(&a.id).await.unwrap());
        assert!(!store.delete_agent(&a.id).await.unwrap());
        let err = store.update_agent(&a).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
