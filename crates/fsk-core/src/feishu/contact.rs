//! User lookup.

use serde_json::{Value, json};

use crate::Result;
use crate::feishu::client::FeishuClient;

const BATCH_GET_ID_PATH: &str = "/contact/v3/users/batch_get_id";

/// Resolve the `open_id` of the user registered with `mobile`.
///
/// Returns `Ok(None)` when the platform knows no such user.
///
/// # Errors
///
/// Returns token, transport or platform errors.
pub async fn open_id_by_mobile(client: &FeishuClient, mobile: &str) -> Result<Option<String>> {
    let data = client
        .post(
            BATCH_GET_ID_PATH,
            &[("user_id_type", "open_id".to_string())],
            &json!({ "mobiles": [mobile] }),
        )
        .await?;
    Ok(first_user_id(&data))
}

fn first_user_id(data: &Value) -> Option<String> {
    data["user_list"]
        .as_array()?
        .first()?
        .get("user_id")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_user_id() {
        let data = json!({"user_list": [{"mobile": "13800000000", "user_id": "ou_123"}]});
        assert_eq!(first_user_id(&data).as_deref(), Some("ou_123"));
    }

    #[test]
    fn unknown_mobile_has_no_user_id() {
        assert_eq!(first_user_id(&json!({"user_list": [{"mobile": "1"}]})), None);
        assert_eq!(first_user_id(&json!({"user_list": []})), None);
        assert_eq!(first_user_id(&Value::Null), None);
    }
}
