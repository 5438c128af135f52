//! Data models for the open platform APIs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A calendar visible to the app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    /// Calendar id.
    pub calendar_id: String,
    /// Display name.
    #[serde(default)]
    pub summary: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Caller's role on the calendar (owner, writer, reader, ...).
    #[serde(default)]
    pub role: String,
}

/// A point in time as the calendar API encodes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventTime {
    /// Unix seconds, as a string.
    #[serde(default)]
    pub timestamp: String,
    /// Date for all-day events (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl EventTime {
    /// Wrap unix seconds.
    #[must_use]
    pub fn from_unix(secs: i64) -> Self {
        Self {
            timestamp: secs.to_string(),
            date: None,
        }
    }

    /// Unix seconds, `0` when missing.
    #[must_use]
    pub fn unix(&self) -> i64 {
        self.timestamp.parse().unwrap_or(0)
    }
}

/// A calendar event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Event id.
    pub event_id: String,
    /// Title.
    #[serde(default)]
    pub summary: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Start time.
    #[serde(default)]
    pub start_time: EventTime,
    /// End time.
    #[serde(default)]
    pub end_time: EventTime,
}

/// A new calendar event.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    /// Title.
    pub summary: String,
    /// Start, unix seconds.
    pub start: i64,
    /// End, unix seconds.
    pub end: i64,
    /// Attendee `open_id`s. Empty means "apply the configured default".
    pub attendees: Vec<String>,
    /// Description. `None` means "render the configured template".
    pub description: Option<String>,
    /// Target calendar. `None` means the app's first calendar.
    pub calendar_id: Option<String>,
}

/// Changes to an existing event.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    /// New title.
    pub summary: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New start, unix seconds.
    pub start: Option<i64>,
    /// New length in minutes.
    pub duration_minutes: Option<u32>,
}

impl EventPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.description.is_none()
            && self.start.is_none()
            && self.duration_minutes.is_none()
    }
}

/// Kinds of drive nodes that can be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveNodeKind {
    /// Folder.
    Folder,
    /// Document (docx).
    Docx,
    /// Spreadsheet.
    Sheet,
    /// Multi-dimensional table.
    Bitable,
}

impl DriveNodeKind {
    /// All creatable kinds.
    pub const ALL: [Self; 4] = [Self::Folder, Self::Docx, Self::Sheet, Self::Bitable];

    /// API type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Docx => "docx",
            Self::Sheet => "sheet",
            Self::Bitable => "bitable",
        }
    }
}

impl fmt::Display for DriveNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriveNodeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("doc") {
            return Ok(Self::Docx);
        }
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "unknown type '{s}' (expected folder, docx, sheet or bitable)"
                ))
            })
    }
}

/// A file or folder in drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveFile {
    /// File token.
    pub token: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Resource type (file, docx, sheet, folder, ...).
    #[serde(rename = "type", default)]
    pub file_type: String,
    /// Parent folder token.
    #[serde(default)]
    pub parent_token: String,
    /// Web URL.
    #[serde(default)]
    pub url: String,
}

/// A collaborator grant on a drive resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberPermission {
    /// How `member_id` is interpreted (openid, userid, unionid, email, chatid, ...).
    pub member_type: String,
    /// The collaborator.
    pub member_id: String,
    /// Role: view, edit or `full_access`.
    pub perm: String,
}

impl MemberPermission {
    /// Full access for an `open_id`.
    #[must_use]
    pub fn full_access(open_id: impl Into<String>) -> Self {
        Self {
            member_type: "openid".to_string(),
            member_id: open_id.into(),
            perm: "full_access".to_string(),
        }
    }
}

/// A task due date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDue {
    /// Unix milliseconds, as a string.
    pub timestamp: String,
    /// Whether only the date matters.
    #[serde(default)]
    pub is_all_day: bool,
}

impl TaskDue {
    /// A timed due date.
    #[must_use]
    pub fn at_millis(ms: i64) -> Self {
        Self {
            timestamp: ms.to_string(),
            is_all_day: false,
        }
    }
}

/// A task member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskMember {
    /// Member id (`open_id`).
    pub id: String,
    /// Member kind, normally `user`.
    #[serde(rename = "type", default = "default_member_type")]
    pub member_type: String,
    /// Role: assignee or follower.
    #[serde(default = "default_member_role")]
    pub role: String,
}

fn default_member_type() -> String {
    "user".to_string()
}

fn default_member_role() -> String {
    "assignee".to_string()
}

impl TaskMember {
    /// An assignee.
    #[must_use]
    pub fn assignee(open_id: impl Into<String>) -> Self {
        Self {
            id: open_id.into(),
            member_type: default_member_type(),
            role: default_member_role(),
        }
    }
}

/// A task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task guid.
    pub guid: String,
    /// Title.
    #[serde(default)]
    pub summary: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Due date.
    #[serde(default)]
    pub due: Option<TaskDue>,
    /// Completion time in unix milliseconds, `"0"` while open.
    #[serde(default)]
    pub completed_at: String,
    /// Members.
    #[serde(default)]
    pub members: Vec<TaskMember>,
    /// Web URL.
    #[serde(default)]
    pub url: String,
}

impl Task {
    /// Whether the task has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !self.completed_at.is_empty() && self.completed_at != "0"
    }
}

/// A new task.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    /// Title.
    pub summary: String,
    /// Description.
    pub description: Option<String>,
    /// Due time, unix milliseconds.
    pub due_ms: Option<i64>,
    /// Members. Empty means "apply the configured default".
    pub members: Vec<TaskMember>,
}

/// Changes to a task.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title.
    pub summary: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New due time, unix milliseconds.
    pub due_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_drive_kinds() {
        assert_eq!("DOCX".parse::<DriveNodeKind>().expect("kind"), DriveNodeKind::Docx);
        assert_eq!("doc".parse::<DriveNodeKind>().expect("kind"), DriveNodeKind::Docx);
        assert!("mindnote".parse::<DriveNodeKind>().is_err());
    }

    #[test]
    fn task_completion_flag() {
        let task: Task = serde_json::from_str(r#"{"guid":"g1","summary":"s","completed_at":"0"}"#)
            .expect("task");
        assert!(!task.is_completed());
        let task: Task = serde_json::from_str(r#"{"guid":"g1","completed_at":"1718000000000"}"#)
            .expect("task");
        assert!(task.is_completed());
    }

    #[test]
    fn event_time_defaults_to_zero() {
        let event: CalendarEvent =
            serde_json::from_str(r#"{"event_id":"e1","start_time":{"timestamp":"1700000000"}}"#)
                .expect("event");
        assert_eq!(event.start_time.unix(), 1_700_000_000);
        assert_eq!(event.end_time.unix(), 0);
    }
}
