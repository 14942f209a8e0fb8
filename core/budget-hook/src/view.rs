//! View-layer reports: focus changes, navigations, closes and the full
//! snapshot sent when the browser integration (re)starts.

use budget_protocol::{parse_sync_views, SyncViewsParams, ViewEventType};
use serde_json::Value;
use std::io::{self, Read};

use crate::daemon_client::{self, ViewReport};

pub fn report(report: ViewReport) -> Result<Value, String> {
    tracing::debug!(
        event_type = ?report.event_type,
        view_id = report.view_id,
        url = ?report.url,
        complete = ?report.complete,
        "Reporting view event"
    );
    daemon_client::send_view_event(&report).map_err(|err| err.to_string())
}

pub fn activated(view_id: u64, url: Option<String>) -> ViewReport {
    ViewReport {
        event_type: ViewEventType::ViewActivated,
        view_id,
        url,
        complete: None,
    }
}

pub fn deactivated(view_id: u64) -> ViewReport {
    ViewReport {
        event_type: ViewEventType::ViewDeactivated,
        view_id,
        url: None,
        complete: None,
    }
}

pub fn settled(view_id: u64, url: String, loading: bool) -> ViewReport {
    ViewReport {
        event_type: ViewEventType::ViewContentSettled,
        view_id,
        url: Some(url),
        complete: Some(!loading),
    }
}

pub fn closed(view_id: u64) -> ViewReport {
    ViewReport {
        event_type: ViewEventType::ViewClosed,
        view_id,
        url: None,
        complete: None,
    }
}

/// Reads the open-view snapshot from stdin and sends it.
pub fn sync() -> Result<Value, String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;

    let params = parse_snapshot(&input)?;
    tracing::info!(views = params.views.len(), "Sending view snapshot");
    daemon_client::sync_views(&params).map_err(|err| err.to_string())
}

/// Accepts either `{"views": [...]}` or a bare array of views. Empty input
/// means no views are open.
fn parse_snapshot(input: &str) -> Result<SyncViewsParams, String> {
    if input.trim().is_empty() {
        return Ok(SyncViewsParams { views: Vec::new() });
    }

    let value: Value =
        serde_json::from_str(input).map_err(|e| format!("Failed to parse snapshot: {}", e))?;
    let value = match value {
        Value::Array(views) => serde_json::json!({ "views": views }),
        other => other,
    };
    parse_sync_views(Some(value)).map_err(|err| format!("{}: {}", err.code, err.message))
}
