//! Calendar events.
//!
//! With a tenant token the `primary` alias is not available, so operations
//! that are not given a calendar id use the first calendar the app can see.

use serde_json::{Map, Value, json};

use crate::config::CalendarConfig;
use crate::feishu::client::{FeishuClient, list_field, segment};
use crate::feishu::models::{Calendar, CalendarEvent, EventDraft, EventPatch, EventTime};
use crate::{CoreError, Result};

const CALENDARS_PATH: &str = "/calendar/v4/calendars";

/// Calendar API wrapper.
#[derive(Debug, Clone)]
pub struct CalendarClient {
    client: FeishuClient,
    config: CalendarConfig,
}

impl CalendarClient {
    /// Wrap an authorized client.
    #[must_use]
    pub const fn new(client: FeishuClient, config: CalendarConfig) -> Self {
        Self { client, config }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &FeishuClient {
        &self.client
    }

    /// Calendars visible to the app.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn list_calendars(&self) -> Result<Vec<Calendar>> {
        let data = self.client.get(CALENDARS_PATH, &[]).await?;
        list_field(&data, "calendar_list")
    }

    /// Id of the app's first calendar.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` when the app has no calendar.
    pub async fn primary_calendar_id(&self) -> Result<String> {
        let calendars = self.list_calendars().await?;
        let first = calendars.into_iter().next().ok_or_else(|| {
            CoreError::Config("the app has no calendar; pass a calendar id".to_string())
        })?;
        log::debug!("using calendar {} ({})", first.calendar_id, first.summary);
        Ok(first.calendar_id)
    }

    /// `explicit` if given, the first calendar otherwise.
    ///
    /// # Errors
    ///
    /// See [`Self::primary_calendar_id`].
    pub async fn resolve_calendar_id(&self, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => self.primary_calendar_id().await,
        }
    }

    /// Events between `start` and `end` (unix seconds), ordered by start time.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn list_events(
        &self,
        calendar_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<CalendarEvent>> {
        let data = self
            .client
            .get(
                &events_path(calendar_id),
                &[("start_time", start.to_string()), ("end_time", end.to_string())],
            )
            .await?;
        let mut events: Vec<CalendarEvent> = list_field(&data, "event_list")?;
        events.sort_by_key(|e| e.start_time.unix());
        Ok(events)
    }

    /// Fetch one event.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<CalendarEvent> {
        let data = self.client.get(&event_path(calendar_id, event_id), &[]).await?;
        event_field(data)
    }

    /// Create an event and invite its attendees.
    ///
    /// Attendees are added in a second call; a failure there is logged and
    /// the created event is still returned.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an empty title or a non-positive
    /// duration, or token, transport and platform errors.
    pub async fn create_event(&self, draft: EventDraft) -> Result<CalendarEvent> {
        let credentials = self.client.credentials()?;
        let prepared = prepare_event(draft, &self.config, credentials.open_id.as_deref())?;
        let calendar_id = self
            .resolve_calendar_id(prepared.calendar_id.as_deref())
            .await?;

        let data = self
            .client
            .post(&events_path(&calendar_id), &[], &prepared.body)
            .await?;
        let event = event_field(data)?;
        log::info!("created event {}", event.event_id);

        if !prepared.attendees.is_empty()
            && let Err(e) = self
                .add_attendees(&calendar_id, &event.event_id, &prepared.attendees)
                .await
        {
            log::warn!("event {} created but adding attendees failed: {e}", event.event_id);
        }

        Ok(event)
    }

    /// Invite users (by `open_id`) to an event.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn add_attendees(
        &self,
        calendar_id: &str,
        event_id: &str,
        open_ids: &[String],
    ) -> Result<()> {
        let attendees: Vec<Value> = open_ids
            .iter()
            .map(|id| json!({ "type": "user", "user_id": id }))
            .collect();
        self.client
            .post(
                &format!("{}/attendees", event_path(calendar_id, event_id)),
                &[("user_id_type", "open_id".to_string())],
                &json!({ "attendees": attendees, "need_notification": true }),
            )
            .await?;
        log::debug!("added {} attendees to {event_id}", open_ids.len());
        Ok(())
    }

    /// Apply `patch` to an event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an empty patch, or token,
    /// transport and platform errors.
    pub async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent> {
        if patch.is_empty() {
            return Err(CoreError::Validation(
                "nothing to change: give a summary, description, start or duration".to_string(),
            ));
        }

        let current_start = if patch.start.is_none() && patch.duration_minutes.is_some() {
            Some(self.get_event(calendar_id, event_id).await?.start_time.unix())
        } else {
            None
        };

        let body = patch_body(patch, current_start, self.config.default_duration);
        let data = self
            .client
            .patch(&event_path(calendar_id, event_id), &[], &body)
            .await?;
        event_field(data)
    }

    /// Delete an event.
    ///
    /// # Errors
    ///
    /// Returns token, transport or platform errors.
    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()> {
        self.client
            .delete(&event_path(calendar_id, event_id), &[])
            .await?;
        log::info!("deleted event {event_id}");
        Ok(())
    }
}

#[derive(Debug)]
struct PreparedEvent {
    calendar_id: Option<String>,
    body: Value,
    attendees: Vec<String>,
}

fn prepare_event(
    draft: EventDraft,
    config: &CalendarConfig,
    self_open_id: Option<&str>,
) -> Result<PreparedEvent> {
    let summary = draft.summary.trim();
    if summary.is_empty() {
        return Err(CoreError::Validation("event summary is empty".to_string()));
    }
    if draft.end <= draft.start {
        return Err(CoreError::Validation(
            "event must end after it starts".to_string(),
        ));
    }

    let mut attendees = draft.attendees;
    if attendees.is_empty() && config.add_self_as_attendee {
        match self_open_id {
            Some(open_id) => {
                log::info!("no attendees given, inviting {open_id}");
                attendees.push(open_id.to_string());
            }
            None => log::warn!("no attendees given and no open_id configured"),
        }
    }

    let description = draft
        .description
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| config.render_description(summary));

    let body = json!({
        "summary": summary,
        "description": description,
        "start_time": EventTime::from_unix(draft.start),
        "end_time": EventTime::from_unix(draft.end),
        "need_notification": true,
    });

    Ok(PreparedEvent {
        calendar_id: draft.calendar_id,
        body,
        attendees,
    })
}

/// Build the `PATCH` body. A new start moves both ends; a duration alone
/// keeps `current_start` and moves the end.
fn patch_body(patch: &EventPatch, current_start: Option<i64>, default_duration: u32) -> Value {
    let mut body = Map::new();
    if let Some(summary) = &patch.summary {
        body.insert("summary".into(), json!(summary));
    }
    if let Some(description) = &patch.description {
        body.insert("description".into(), json!(description));
    }

    let start = patch.start.or(current_start);
    if let Some(start) = start {
        let minutes = patch.duration_minutes.unwrap_or(default_duration);
        let end = start + i64::from(minutes) * 60;
        if patch.start.is_some() {
            body.insert("start_time".into(), json!(EventTime::from_unix(start)));
        }
        body.insert("end_time".into(), json!(EventTime::from_unix(end)));
    }

    Value::Object(body)
}

fn events_path(calendar_id: &str) -> String {
    format!("{CALENDARS_PATH}/{}/events", segment(calendar_id))
}

fn event_path(calendar_id: &str, event_id: &str) -> String {
    format!("{}/{}", events_path(calendar_id), segment(event_id))
}

fn event_field(mut data: Value) -> Result<CalendarEvent> {
    Ok(serde_json::from_value(data["event"].take())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(summary: &str) -> EventDraft {
        EventDraft {
            summary: summary.to_string(),
            start: 1_700_000_000,
            end: 1_700_003_600,
            ..EventDraft::default()
        }
    }

    #[test]
    fn defaults_to_self_and_templated_description() {
        let prepared =
            prepare_event(draft("Standup"), &CalendarConfig::default(), Some("ou_me")).expect("ok");
        assert_eq!(prepared.attendees, vec!["ou_me".to_string()]);
        assert_eq!(
            prepared.body["description"],
            "Meeting topic: Standup\nScheduled automatically."
        );
        assert_eq!(prepared.body["start_time"]["timestamp"], "1700000000");
        assert_eq!(prepared.body["end_time"]["timestamp"], "1700003600");
    }

    #[test]
    fn explicit_values_win_over_defaults() {
        let mut d = draft("Review");
        d.attendees = vec!["ou_other".to_string()];
        d.description = Some("agenda".to_string());
        let prepared = prepare_event(d, &CalendarConfig::default(), Some("ou_me")).expect("ok");
        assert_eq!(prepared.attendees, vec!["ou_other".to_string()]);
        assert_eq!(prepared.body["description"], "agenda");
    }

    #[test]
    fn self_invite_can_be_disabled() {
        let config = CalendarConfig {
            add_self_as_attendee: false,
            ..CalendarConfig::default()
        };
        let prepared = prepare_event(draft("Focus"), &config, Some("ou_me")).expect("ok");
        assert!(prepared.attendees.is_empty());
    }

    #[test]
    fn rejects_bad_drafts() {
        let config = CalendarConfig::default();
        assert!(matches!(
            prepare_event(draft("  "), &config, None),
            Err(CoreError::Validation(_))
        ));
        let mut d = draft("Backwards");
        d.end = d.start;
        assert!(matches!(prepare_event(d, &config, None), Err(CoreError::Validation(_))));
    }

    #[test]
    fn new_start_sets_both_ends() {
        let patch = EventPatch {
            start: Some(1_000),
            ..EventPatch::default()
        };
        let body = patch_body(&patch, None, 60);
        assert_eq!(body["start_time"]["timestamp"], "1000");
        assert_eq!(body["end_time"]["timestamp"], "4600");

        let patch = EventPatch {
            start: Some(1_000),
            duration_minutes: Some(90),
            ..EventPatch::default()
        };
        assert_eq!(patch_body(&patch, None, 60)["end_time"]["timestamp"], "6400");
    }

    #[test]
    fn duration_alone_keeps_start() {
        let patch = EventPatch {
            duration_minutes: Some(30),
            ..EventPatch::default()
        };
        let body = patch_body(&patch, Some(2_000), 60);
        assert!(body.get("start_time").is_none());
        assert_eq!(body["end_time"]["timestamp"], "3800");
    }

    #[test]
    fn text_only_patch_leaves_times_alone() {
        let patch = EventPatch {
            summary: Some("Renamed".to_string()),
            ..EventPatch::default()
        };
        let body = patch_body(&patch, None, 60);
        assert_eq!(body, json!({"summary": "Renamed"}));
    }

    #[test]
    fn missing_lists_are_empty() {
        let events: Vec<CalendarEvent> = list_field(&json!({"has_more": false}), "event_list")
            .expect("empty");
        assert!(events.is_empty());
    }

    #[test]
    fn escapes_calendar_ids_in_paths() {
        assert_eq!(
            event_path("feishu.cn_x@group.calendar.feishu.cn", "e1_0"),
            "/calendar/v4/calendars/feishu.cn_x%40group.calendar.feishu.cn/events/e1_0"
        );
    }
}
