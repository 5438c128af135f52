//! Drive files, documents and sharing.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{Value, json};

use crate::feishu::client::{FeishuClient, list_field, segment};
use crate::feishu::models::{DriveFile, DriveNodeKind, MemberPermission};
use crate::{CoreError, Result};

const FILES_PATH: &str = "/drive/v1/files";

/// Result of creating a folder, document, sheet or bitable.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedNode {
    /// What was created.
    pub kind: &'static str,
    /// Token of the new node.
    pub token: String,
    /// Web URL. Built from the token when the API omits it.
    pub url: String,
}

/// Drive API wrapper.
#[derive(Debug, Clone)]
pub struct DriveClient {
    client: FeishuClient,
}

impl DriveClient {
    /// Wrap an authorized client.
    #[must_use]
    pub const fn new(client: FeishuClient) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &FeishuClient {
        &self.client
    }

    /// Create a node named `name` under `parent` (root when empty).
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn create_node(
        &self,
        kind: DriveNodeKind,
        name: &str,
        parent: &str,
    ) -> Result<CreatedNode> {
        let (path, body) = create_request(kind, name, parent);
        let data = self.client.post(path, &[], &body).await?;
        let node = created_node(kind, &data)?;
        log::info!("created {kind} {}", node.token);
        Ok(node)
    }

    /// Upload a local file into `parent` (root when empty) and return its token.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` when the file cannot be read, or token,
    /// transport and platform errors.
    pub async fn upload_file(&self, path: &Path, parent: &str) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::Validation(format!("not a file: {}", path.display())))?;
        let size = bytes.len();
        let parent = parent.to_string();
        log::debug!("uploading {file_name} ({size} bytes)");

        let data = self
            .client
            .post_multipart(&format!("{FILES_PATH}/upload_all"), || {
                Form::new()
                    .text("file_name", file_name.clone())
                    .text("parent_type", "explorer")
                    .text("parent_node", parent.clone())
                    .text("size", size.to_string())
                    .part("file", Part::bytes(bytes.clone()).file_name(file_name.clone()))
            })
            .await?;

        data["file_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::Api("upload response has no file_token".to_string()))
    }

    /// Files in `folder` (root when empty).
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn list_files(&self, folder: &str) -> Result<Vec<DriveFile>> {
        let data = self
            .client
            .get(FILES_PATH, &[("folder_token", folder.to_string())])
            .await?;
        list_field(&data, "files")
    }

    /// Delete a file of type `file_type` (file, docx, sheet, bitable, folder).
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn delete_file(&self, token: &str, file_type: &str) -> Result<()> {
        self.client
            .delete(&file_path(token), &[("type", file_type.to_string())])
            .await?;
        log::info!("deleted {file_type} {token}");
        Ok(())
    }

    /// Rename a file.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn rename_file(&self, token: &str, name: &str, file_type: &str) -> Result<()> {
        self.client
            .patch(
                &file_path(token),
                &[],
                &json!({ "name": name, "type": file_type }),
            )
            .await?;
        Ok(())
    }

    /// Move a file into `folder`.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn move_file(&self, token: &str, folder: &str, file_type: &str) -> Result<()> {
        self.client
            .post(
                &format!("{}/move", file_path(token)),
                &[],
                &json!({ "type": file_type, "folder_token": folder }),
            )
            .await?;
        Ok(())
    }

    /// Append a paragraph to the end of a document.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn append_text(&self, document_id: &str, content: &str) -> Result<()> {
        let id = segment(document_id);
        self.client
            .post(
                &format!("/docx/v1/documents/{id}/blocks/{id}/children"),
                &[],
                &text_block_body(content),
            )
            .await?;
        Ok(())
    }

    /// Grant `member` access to a resource of type `resource_type`.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn add_member(
        &self,
        token: &str,
        resource_type: &str,
        member: &MemberPermission,
    ) -> Result<()> {
        self.client
            .post(
                &format!("/drive/v1/permissions/{}/members", segment(token)),
                &[("type", resource_type.to_string())],
                &serde_json::to_value(member)?,
            )
            .await?;
        log::info!("granted {} to {}", member.perm, member.member_id);
        Ok(())
    }
}

/// Guess the member type of a collaborator id: emails contain `@`,
/// everything else is treated as an `open_id`.
///
/// # Errors
///
/// Returns `CoreError::Validation` for phone numbers, which the permission
/// API does not accept.
pub fn infer_member_type(member_id: &str) -> Result<&'static str> {
    if member_id.contains('@') {
        Ok("email")
    } else if member_id.len() > 10 && member_id.chars().all(|c| c.is_ascii_digit()) {
        Err(CoreError::Validation(
            "phone numbers cannot be shared with directly; use an open_id, user_id or email"
                .to_string(),
        ))
    } else {
        Ok("openid")
    }
}

fn create_request(kind: DriveNodeKind, name: &str, parent: &str) -> (&'static str, Value) {
    match kind {
        DriveNodeKind::Folder => (
            "/drive/v1/files/create_folder",
            json!({ "name": name, "folder_token": parent }),
        ),
        DriveNodeKind::Docx => (
            "/docx/v1/documents",
            json!({ "title": name, "folder_token": parent }),
        ),
        DriveNodeKind::Sheet => (
            "/sheets/v3/spreadsheets",
            json!({ "title": name, "folder_token": parent }),
        ),
        DriveNodeKind::Bitable => (
            "/bitable/v1/apps",
            json!({ "name": name, "folder_token": parent }),
        ),
    }
}

fn created_node(kind: DriveNodeKind, data: &Value) -> Result<CreatedNode> {
    let (node, token_key, url_prefix) = match kind {
        DriveNodeKind::Folder => (data, "token", "https://feishu.cn/drive/folder"),
        DriveNodeKind::Docx => (&data["document"], "document_id", "https://feishu.cn/docx"),
        DriveNodeKind::Sheet => (
            &data["spreadsheet"],
            "spreadsheet_token",
            "https://feishu.cn/sheets",
        ),
        DriveNodeKind::Bitable => (&data["app"], "app_token", "https://feishu.cn/base"),
    };

    let token = node[token_key]
        .as_str()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CoreError::Api(format!("create {kind} response has no {token_key}")))?
        .to_string();
    let url = node["url"]
        .as_str()
        .filter(|u| !u.is_empty())
        .map_or_else(|| format!("{url_prefix}/{token}"), str::to_string);

    Ok(CreatedNode {
        kind: kind.name(),
        token,
        url,
    })
}

fn text_block_body(content: &str) -> Value {
    json!({
        "children": [{
            "block_type": 2,
            "text": { "elements": [{ "text_run": { "content": content } }] }
        }],
        "index": -1
    })
}

fn file_path(token: &str) -> String {
    format!("{FILES_PATH}/{}", segment(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docs_and_sheets_use_title() {
        let (path, body) = create_request(DriveNodeKind::Docx, "Notes", "fld1");
        assert_eq!(path, "/docx/v1/documents");
        assert_eq!(body, json!({"title": "Notes", "folder_token": "fld1"}));

        let (path, body) = create_request(DriveNodeKind::Bitable, "Tracker", "");
        assert_eq!(path, "/bitable/v1/apps");
        assert_eq!(body["name"], "Tracker");
    }

    #[test]
    fn created_node_builds_missing_urls() {
        let data = json!({"document": {"document_id": "doxcn1", "title": "Notes"}});
        let node = created_node(DriveNodeKind::Docx, &data).expect("node");
        assert_eq!(node.token, "doxcn1");
        assert_eq!(node.url, "https://feishu.cn/docx/doxcn1");

        let data = json!({"token": "fld9", "url": "https://example.feishu.cn/drive/folder/fld9"});
        let node = created_node(DriveNodeKind::Folder, &data).expect("node");
        assert_eq!(node.url, "https://example.feishu.cn/drive/folder/fld9");
    }

    #[test]
    fn created_node_requires_token() {
        let err = created_node(DriveNodeKind::Sheet, &json!({"spreadsheet": {}})).expect_err("no token");
        assert!(matches!(err, CoreError::Api(_)));
    }

    #[test]
    fn infers_member_types() {
        assert_eq!(infer_member_type("a@b.com").expect("email"), "email");
        assert_eq!(infer_member_type("ou_abc").expect("openid"), "openid");
        assert!(infer_member_type("13800138000").is_err());
    }

    #[test]
    fn appends_text_at_end() {
        let body = text_block_body("hello");
        assert_eq!(body["index"], -1);
        assert_eq!(body["children"][0]["block_type"], 2);
        assert_eq!(body["children"][0]["text"]["elements"][0]["text_run"]["content"], "hello");
    }
}
