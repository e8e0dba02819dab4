use crate::models::{Event, Guest};
use crate::qr::QrPayload;
use serde::Serialize;

/// Everything a guest needs to get in: the code to type, the link to open
/// and the text to encode as a QR image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub guest_code: String,
    pub direct_link: String,
    pub qr_payload: String,
}

impl Invitation {
    pub fn for_guest(guest: &Guest, event: &Event, base_url: &str) -> Self {
        Invitation {
            guest_code: guest.id.clone(),
            direct_link: direct_link(base_url, guest),
            qr_payload: QrPayload::new(event.id.as_str(), guest.id.as_str()).encode(),
        }
    }
}

/// `<base>/access?guestId=..&eventId=..`, values url-encoded.
pub fn direct_link(base_url: &str, guest: &Guest) -> String {
    format!(
        "{}/access?guestId={}&eventId={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&guest.id),
        urlencoding::encode(&guest.event_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::DirectLink;
    use crate::models::GuestStatus;

    #[test]
    fn link_round_trips_through_query_parser() {
        let guest = Guest {
            id: "K7Q2".to_string(),
            event_id: "evt 1&2".to_string(),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: None,
            phone: None,
            table_id: None,
            status: GuestStatus::Pending,
            scanned: false,
            scanned_at: None,
        };
        let link = direct_link("https://secura.example/", &guest);
        let (_, query) = link.split_once('?').unwrap();
        let parsed = DirectLink::from_query(query);
        assert_eq!(parsed.guest_id.as_deref(), Some("K7Q2"));
        assert_eq!(parsed.event_id.as_deref(), Some("evt 1&2"));
    }
}
