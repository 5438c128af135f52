//! Tasks (task v2 API).

use serde_json::{Map, Value, json};

use crate::config::TaskConfig;
use crate::feishu::client::{FeishuClient, list_field, segment};
use crate::feishu::models::{Task, TaskDraft, TaskDue, TaskMember, TaskPatch};
use crate::{CoreError, Result};

const TASKS_PATH: &str = "/task/v2/tasks";

/// One page of tasks.
#[derive(Debug, Clone)]
pub struct TaskPage {
    /// Tasks on this page.
    pub items: Vec<Task>,
    /// Token for the next page, if any.
    pub page_token: Option<String>,
}

/// Task API wrapper.
#[derive(Debug, Clone)]
pub struct TaskClient {
    client: FeishuClient,
    config: TaskConfig,
}

impl TaskClient {
    /// Wrap an authorized client.
    #[must_use]
    pub const fn new(client: FeishuClient, config: TaskConfig) -> Self {
        Self { client, config }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &FeishuClient {
        &self.client
    }

    /// Create a task.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an empty title, or token,
    /// transport and platform errors.
    pub async fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        let open_id = self.client.credentials()?.open_id.clone();
        let body = create_body(draft, self.config, open_id.as_deref())?;
        let data = self
            .client
            .post(TASKS_PATH, &[("user_id_type", "open_id".to_string())], &body)
            .await?;
        let task = task_field(data)?;
        log::info!("created task {}", task.guid);
        Ok(task)
    }

    /// List tasks. `list_type` narrows the listing (e.g. `my_tasks`).
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn list_tasks(
        &self,
        page_size: Option<u32>,
        page_token: Option<&str>,
        list_type: Option<&str>,
    ) -> Result<TaskPage> {
        let size = page_size.unwrap_or(self.config.page_size).clamp(1, 100);
        let mut query = vec![
            ("page_size", size.to_string()),
            ("user_id_type", "open_id".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        if let Some(list_type) = list_type {
            query.push(("type", list_type.to_string()));
        }

        let data = self.client.get(TASKS_PATH, &query).await?;
        let items = list_field(&data, "items")?;
        let page_token = if data["has_more"].as_bool().unwrap_or(false) {
            data["page_token"].as_str().map(str::to_string)
        } else {
            None
        };
        Ok(TaskPage { items, page_token })
    }

    /// Fetch one task.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn get_task(&self, guid: &str) -> Result<Task> {
        let data = self
            .client
            .get(&task_path(guid), &[("user_id_type", "open_id".to_string())])
            .await?;
        task_field(data)
    }

    /// Mark a task completed now.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn complete_task(&self, guid: &str) -> Result<Task> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let body = json!({
            "task": { "completed_at": now_ms.to_string() },
            "update_fields": ["completed_at"],
        });
        let data = self.client.patch(&task_path(guid), &[], &body).await?;
        log::info!("completed task {guid}");
        task_field(data)
    }

    /// Apply `patch` to a task.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an empty patch, or token,
    /// transport and platform errors.
    pub async fn update_task(&self, guid: &str, patch: &TaskPatch) -> Result<Task> {
        let body = update_body(patch)?;
        let data = self.client.patch(&task_path(guid), &[], &body).await?;
        task_field(data)
    }

    /// Delete a task.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn delete_task(&self, guid: &str) -> Result<()> {
        self.client.delete(&task_path(guid), &[]).await?;
        log::info!("deleted task {guid}");
        Ok(())
    }
}

fn create_body(draft: TaskDraft, config: TaskConfig, self_open_id: Option<&str>) -> Result<Value> {
    let summary = draft.summary.trim();
    if summary.is_empty() {
        return Err(CoreError::Validation("task summary is empty".to_string()));
    }

    let mut body = Map::new();
    body.insert("summary".into(), json!(summary));
    if let Some(description) = draft.description.filter(|d| !d.is_empty()) {
        body.insert("description".into(), json!(description));
    }
    if let Some(ms) = draft.due_ms {
        body.insert("due".into(), json!(TaskDue::at_millis(ms)));
    }

    let mut members = draft.members;
    if members.is_empty() && config.assign_self_by_default {
        match self_open_id {
            Some(open_id) => members.push(TaskMember::assignee(open_id)),
            None => log::warn!("no members given and no open_id configured"),
        }
    }
    if !members.is_empty() {
        body.insert("members".into(), json!(members));
    }

    Ok(Value::Object(body))
}

fn update_body(patch: &TaskPatch) -> Result<Value> {
    let mut task = Map::new();
    let mut fields = Vec::new();
    if let Some(summary) = &patch.summary {
        task.insert("summary".into(), json!(summary));
        fields.push("summary");
    }
    if let Some(description) = &patch.description {
        task.insert("description".into(), json!(description));
        fields.push("description");
    }
    if let Some(ms) = patch.due_ms {
        task.insert("due".into(), json!(TaskDue::at_millis(ms)));
        fields.push("due");
    }

    if fields.is_empty() {
        return Err(CoreError::Validation(
            "nothing to change: give a summary, description or due time".to_string(),
        ));
    }
    Ok(json!({ "task": task, "update_fields": fields }))
}

fn task_path(guid: &str) -> String {
    format!("{TASKS_PATH}/{}", segment(guid))
}

fn task_field(mut data: Value) -> Result<Task> {
    Ok(serde_json::from_value(data["task"].take())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> TaskDraft {
        TaskDraft {
            summary: "Write report".to_string(),
            ..TaskDraft::default()
        }
    }

    #[test]
    fn assigns_self_when_no_members() {
        let body = create_body(draft(), TaskConfig::default(), Some("ou_me")).expect("body");
        assert_eq!(
            body["members"],
            json!([{"id": "ou_me", "type": "user", "role": "assignee"}])
        );
        assert!(body.get("due").is_none());
    }

    #[test]
    fn due_is_in_milliseconds() {
        let mut d = draft();
        d.due_ms = Some(1_718_000_000_000);
        let body = create_body(d, TaskConfig::default(), None).expect("body");
        assert_eq!(body["due"], json!({"timestamp": "1718000000000", "is_all_day": false}));
        assert!(body.get("members").is_none());
    }

    #[test]
    fn self_assignment_can_be_disabled() {
        let config = TaskConfig {
            assign_self_by_default: false,
            ..TaskConfig::default()
        };
        let body = create_body(draft(), config, Some("ou_me")).expect("body");
        assert!(body.get("members").is_none());
    }

    #[test]
    fn update_fields_follow_patch() {
        let patch = TaskPatch {
            summary: Some("New".to_string()),
            due_ms: Some(5),
            ..TaskPatch::default()
        };
        let body = update_body(&patch).expect("body");
        assert_eq!(body["update_fields"], json!(["summary", "due"]));
        assert_eq!(body["task"]["summary"], "New");
        assert_eq!(body["task"]["due"]["timestamp"], "5");
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(matches!(
            update_body(&TaskPatch::default()),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn empty_summary_is_rejected() {
        let d = TaskDraft::default();
        assert!(create_body(d, TaskConfig::default(), None).is_err());
    }
}
