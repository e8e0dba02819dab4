use crate::error::AccessError;
use serde::Serialize;
use serde_json::Value;

/// Payload type tag carried by invitation QR codes.
pub const INVITATION_TAG: &str = "INV";

/// Decoded invitation QR payload: `{"t":"INV","e":<eventId>,"g":<guestId>}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub event_id: String,
    pub guest_id: String,
}

#[derive(Serialize)]
struct Wire<'a> {
    t: &'a str,
    e: &'a str,
    g: &'a str,
}

impl QrPayload {
    pub fn new(event_id: impl Into<String>, guest_id: impl Into<String>) -> Self {
        QrPayload {
            event_id: event_id.into(),
            guest_id: guest_id.into(),
        }
    }

    /// Parse and shape-check decoded QR text.
    ///
    /// Valid only when `t == "INV"` and both `e` and `g` are present and
    /// non-empty. Extra keys are tolerated.
    pub fn parse(text: &str) -> Result<Self, AccessError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| AccessError::MalformedPayload(format!("not JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| AccessError::MalformedPayload("not a JSON object".to_string()))?;

        match object.get("t").and_then(Value::as_str) {
            Some(INVITATION_TAG) => {}
            Some(other) => {
                return Err(AccessError::MalformedPayload(format!(
                    "unexpected type tag {other:?}"
                )));
            }
            None => return Err(AccessError::MalformedPayload("missing type tag".to_string())),
        }

        let field = |key: &str| -> Result<String, AccessError> {
            match object.get(key) {
                Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(AccessError::MalformedPayload(format!("missing {key:?}"))),
            }
        };

        Ok(QrPayload {
            event_id: field("e")?,
            guest_id: field("g")?,
        })
    }

    /// Wire form, keys in `t`, `e`, `g` order.
    pub fn encode(&self) -> String {
        let wire = Wire {
            t: INVITATION_TAG,
            e: &self.event_id,
            g: &self.guest_id,
        };
        // Only string fields; serialization cannot fail.
        serde_json::to_string(&wire).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_invitation_payload() {
        let payload = QrPayload::parse(r#"{"t":"INV","e":"evt_1","g":"g_1"}"#).unwrap();
        assert_eq!(payload, QrPayload::new("evt_1", "g_1"));
    }

    #[test]
    fn rejects_other_shapes_without_panicking() {
        for text in [
            r#"{"t":"OTHER"}"#,
            r#"{"t":"INV","e":"evt_1"}"#,
            r#"{"t":"INV","g":"g_1"}"#,
            r#"{"t":"INV","e":"","g":"g_1"}"#,
            r#"{"e":"evt_1","g":"g_1"}"#,
            r#"["INV","evt_1","g_1"]"#,
            "https://example.com",
            "",
        ] {
            assert!(
                matches!(QrPayload::parse(text), Err(AccessError::MalformedPayload(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn tolerates_extra_keys() {
        let payload =
            QrPayload::parse(r#"{"t":"INV","e":"evt_1","g":"g_1","v":2,"n":"Ada"}"#).unwrap();
        assert_eq!(payload.guest_id, "g_1");
    }

    #[test]
    fn encoded_form_is_bit_exact() {
        assert_eq!(
            QrPayload::new("evt_1", "g_1").encode(),
            r#"{"t":"INV","e":"evt_1","g":"g_1"}"#
        );
    }
}
