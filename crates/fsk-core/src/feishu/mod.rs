//! Feishu (Lark) open platform client.
//!
//! - `auth`: tenant token exchange and the per-tenant token session
//! - `client`: authorized requests and response envelope handling
//! - one module per API family built on top of the client

pub mod auth;
pub mod calendar;
pub mod card;
pub mod client;
pub mod contact;
pub mod drive;
pub mod models;
pub mod task;

pub use auth::{Clock, HttpTokenExchanger, SessionToken, SystemClock, TokenExchanger, TokenGrant, TokenSession};
pub use calendar::CalendarClient;
pub use card::{CardClient, build_card};
pub use client::FeishuClient;
pub use drive::{CreatedNode, DriveClient};
pub use models::{
    Calendar, CalendarEvent, DriveFile, DriveNodeKind, EventDraft, EventPatch, MemberPermission,
    Task, TaskDraft, TaskMember, TaskPatch,
};
pub use task::{TaskClient, TaskPage};
