//! IPC protocol types and validation for budget-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_SYNC_VIEWS: usize = 4096;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    GetBudget,
    SetDailyLimit,
    ResetBudget,
    SyncViews,
    TakeRedirects,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ViewEventType {
    ViewActivated,
    ViewDeactivated,
    ViewContentSettled,
    ViewClosed,
}

/// One view-layer notification.
///
/// `url` is required for `view_content_settled` and optional for
/// `view_activated`, where it refreshes the daemon's idea of what the view
/// shows. `complete` is only meaningful for `view_content_settled`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ViewEventEnvelope {
    pub event_id: String,
    pub recorded_at: String,
    pub event_type: ViewEventType,
    #[serde(default)]
    pub view_id: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub complete: Option<bool>,
}

impl ViewEventEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.event_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_event_id", "event_id is required"));
        }
        if self.event_id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_event_id",
                "event_id must be 128 characters or fewer",
            ));
        }

        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }

        require_view_id(&self.view_id)?;

        match self.event_type {
            ViewEventType::ViewContentSettled => {
                require_string(&self.url, "url")?;
                require_bool(&self.complete, "complete")?;
            }
            ViewEventType::ViewActivated => {
                if let Some(url) = &self.url {
                    if url.trim().is_empty() {
                        return Err(ErrorInfo::new("invalid_params", "url must not be empty"));
                    }
                }
            }
            ViewEventType::ViewDeactivated | ViewEventType::ViewClosed => {}
        }

        Ok(())
    }
}

pub fn parse_event(params: Value) -> Result<ViewEventEnvelope, ErrorInfo> {
    let envelope: ViewEventEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("event payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SetDailyLimitParams {
    pub daily_limit_seconds: i64,
}

/// Shape check only. Range validation happens in the daemon against the
/// configured maximum.
pub fn parse_set_daily_limit(params: Option<Value>) -> Result<SetDailyLimitParams, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))?;
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("set_daily_limit params are invalid: {}", err),
        )
    })
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncedView {
    pub view_id: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncViewsParams {
    pub views: Vec<SyncedView>,
}

impl SyncViewsParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.views.len() > MAX_SYNC_VIEWS {
            return Err(ErrorInfo::new(
                "invalid_params",
                format!("at most {} views may be synced", MAX_SYNC_VIEWS),
            ));
        }
        if self.views.iter().filter(|view| view.active).count() > 1 {
            return Err(ErrorInfo::new(
                "invalid_params",
                "at most one view may be active",
            ));
        }
        for view in &self.views {
            require_view_id(&Some(view.view_id))?;
        }
        let mut ids: Vec<u64> = self.views.iter().map(|view| view.view_id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ErrorInfo::new("invalid_params", "view_id values must be unique"));
        }
        Ok(())
    }
}

pub fn parse_sync_views(params: Option<Value>) -> Result<SyncViewsParams, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))?;
    let parsed: SyncViewsParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("sync_views params are invalid: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(parsed)
}

/// A queued instruction for the view layer to navigate `view_id` away.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RedirectAction {
    pub view_id: u64,
    pub target: String,
}

fn require_view_id(view_id: &Option<u64>) -> Result<(), ErrorInfo> {
    match view_id {
        Some(0) | None => Err(ErrorInfo::new("invalid_view_id", "view_id is required")),
        Some(_) => Ok(()),
    }
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn require_bool(value: &Option<bool>, field: &str) -> Result<(), ErrorInfo> {
    match value {
        Some(_) => Ok(()),
        None => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_event(event_type: ViewEventType) -> ViewEventEnvelope {
        ViewEventEnvelope {
            event_id: "evt-1".to_string(),
            recorded_at: "2026-01-30T12:00:00Z".to_string(),
            event_type,
            view_id: Some(12),
            url: None,
            complete: None,
        }
    }

    #[test]
    fn validates_focus_events_without_url() {
        assert!(base_event(ViewEventType::ViewActivated).validate().is_ok());
        assert!(base_event(ViewEventType::ViewDeactivated).validate().is_ok());
        assert!(base_event(ViewEventType::ViewClosed).validate().is_ok());
    }

    #[test]
    fn settled_requires_url_and_completion() {
        let mut event = base_event(ViewEventType::ViewContentSettled);
        let err = event.validate().unwrap_err();
        assert_eq!(err.code, "missing_field");

        event.url = Some("https://youtube.com".to_string());
        assert!(event.validate().is_err());

        event.complete = Some(false);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn rejects_missing_or_zero_view_id() {
        let mut event = base_event(ViewEventType::ViewClosed);
        event.view_id = None;
        assert_eq!(event.validate().unwrap_err().code, "invalid_view_id");
        event.view_id = Some(0);
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_blank_activation_url() {
        let mut event = base_event(ViewEventType::ViewActivated);
        event.url = Some("  ".to_string());
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_bad_timestamp() {
        let mut event = base_event(ViewEventType::ViewClosed);
        event.recorded_at = "not-a-time".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_long_event_id() {
        let mut event = base_event(ViewEventType::ViewClosed);
        event.event_id = "a".repeat(256);
        assert!(event.validate().is_err());
    }

    #[test]
    fn parse_event_rejects_unknown_fields() {
        let err = parse_event(json!({
            "event_id": "evt-2",
            "recorded_at": "2026-01-30T12:00:00Z",
            "event_type": "view_closed",
            "view_id": 3,
            "session_id": "nope"
        }))
        .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn parses_set_daily_limit() {
        let params = parse_set_daily_limit(Some(json!({"daily_limit_seconds": 1800}))).unwrap();
        assert_eq!(params.daily_limit_seconds, 1800);
        assert!(parse_set_daily_limit(None).is_err());
        assert!(parse_set_daily_limit(Some(json!({"daily_limit_seconds": "30m"}))).is_err());
    }

    #[test]
    fn sync_views_allows_one_active_view() {
        let ok = parse_sync_views(Some(json!({
            "views": [
                {"view_id": 1, "url": "https://youtube.com", "active": true},
                {"view_id": 2}
            ]
        })))
        .unwrap();
        assert_eq!(ok.views.len(), 2);
        assert!(!ok.views[1].active);

        let err = parse_sync_views(Some(json!({
            "views": [
                {"view_id": 1, "active": true},
                {"view_id": 2, "active": true}
            ]
        })))
        .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn sync_views_rejects_duplicate_ids() {
        assert!(parse_sync_views(Some(json!({
            "views": [{"view_id": 4}, {"view_id": 4}]
        })))
        .is_err());
    }

    #[test]
    fn empty_sync_is_valid() {
        assert!(parse_sync_views(Some(json!({"views": []}))).is_ok());
    }
}
