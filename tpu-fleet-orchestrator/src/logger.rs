use uuid::Uuid;

/// Action logger for remediation steps. Every action gets an id so its
/// completion line can be matched with its start line.
pub fn log_event(action_type: &str, status: &str, instance: &str, error_message: Option<&str>) -> Uuid {
    log_event_with_metadata(action_type, status, instance, error_message, None)
}

/// Log event with metadata (context info)
pub fn log_event_with_metadata(
    action_type: &str,
    status: &str,
    instance: &str,
    error_message: Option<&str>,
    metadata: Option<serde_json::Value>,
) -> Uuid {
    let log_id = Uuid::new_v4();
    let metadata = metadata.unwrap_or(serde_json::Value::Null);
    match error_message {
        Some(err) => tracing::warn!(
            %log_id, action_type, status, instance, error = err, %metadata,
            "action"
        ),
        None => tracing::info!(%log_id, action_type, status, instance, %metadata, "action"),
    }
    log_id
}

/// Log event completion with duration
pub fn log_event_complete(
    log_id: Uuid,
    action_type: &str,
    status: &str,
    duration_ms: u64,
    error_message: Option<&str>,
) {
    match error_message {
        Some(err) => tracing::error!(
            %log_id, action_type, status, duration_ms, error = err,
            "action complete"
        ),
        None => tracing::info!(%log_id, action_type, status, duration_ms, "action complete"),
    }
}

/// Quick log for one-off events
pub fn log_quick(action_type: &str, instance: &str, details: Option<&str>) {
    tracing::info!(action_type, status = "success", instance, details = details.unwrap_or(""), "action");
}
