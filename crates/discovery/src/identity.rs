use types::{DecodedEvent, DeviceIdentity};

/// Derives the device identity for an event.
///
/// `{model}_{id}` when an `id` key is present (whatever its value), otherwise
/// `{model}_{channel}_{message}` when `channel` and one of `raw_message` /
/// `message` are present, preferring `raw_message`. Returns `None` when
/// neither rule applies. A missing `model` renders as the empty string.
pub fn resolve(event: &DecodedEvent) -> Option<DeviceIdentity> {
    let model = model_name(event);

    let raw = if let Some(id) = event.get("id") {
        format!("{model}_{id}")
    } else {
        let channel = event.get("channel")?;
        let message = event.get("raw_message").or_else(|| event.get("message"))?;
        format!("{model}_{channel}_{message}")
    };

    Some(DeviceIdentity::new(sanitize(&raw)))
}

/// Lower-cases and turns spaces into underscores. Nothing else is touched.
pub fn sanitize(raw: &str) -> String {
    raw.to_lowercase().replace(' ', "_")
}

pub(crate) fn model_name(event: &DecodedEvent) -> String {
    event
        .get("model")
        .map(|model| model.to_string().trim().to_string())
        .unwrap_or_default()
}
