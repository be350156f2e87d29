/*!
 * Serde helpers shared by the envelope and configuration types.
 */

use serde::{Deserialize, Deserializer};

use crate::constants::unknown_if_blank;

/// Deserialize a message-type id that may be missing, null or blank.
///
/// All of these produce `"unknown"`:
///
/// ```json
/// { "message_type_id": null }
/// { "message_type_id": "" }
/// { "message_type_id": "   " }
/// ```
pub fn deserialize_message_type_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(unknown_if_blank(value.as_deref()))
}

/// Default used when the field is absent altogether
pub fn unknown_message_type() -> String {
    unknown_if_blank(None)
}
