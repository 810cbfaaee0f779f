pub mod actions;
pub mod approvals;
pub mod classify;
pub mod recipes;
pub mod revisions;

use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Run a blocking store operation off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> recipes_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;
    Ok(result?)
}

/// Parse a JSON object body. Every failure is a 400; a field holding the
/// wrong type is reported under that field's name. Meant for bodies whose
/// fields are all optional, so a one-field object isolates the bad field.
pub(crate) fn json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request("body", format!("invalid JSON: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(AppError::bad_request("body", "expected a JSON object"));
    };

    serde_json::from_value(value.clone()).map_err(|e| {
        let field = object
            .iter()
            .find(|(key, field_value)| {
                let mut single = serde_json::Map::new();
                single.insert((*key).clone(), (*field_value).clone());
                serde_json::from_value::<T>(serde_json::Value::Object(single)).is_err()
            })
            .map_or("body", |(key, _)| key.as_str());
        AppError::bad_request(field, e.to_string())
    })
}

/// Like [`json_body`], but an empty body means `T::default()`.
pub(crate) fn optional_json<T>(body: &[u8]) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    json_body(body)
}
