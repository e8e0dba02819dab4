use crate::config::SmtpConfig;
use crate::invitation::Invitation;
use crate::models::{Event, Guest};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use log::info;
use std::error::Error;

pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
}

impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, Box<dyn Error>> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let tls_parameters = TlsParameters::new(config.host.clone())?;

        let smtp = SmtpTransport::relay(&config.host)?
            .credentials(creds)
            .port(465)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer {
            smtp,
            from: config.from.clone(),
        })
    }

    /// Mail `invitation` to the guest's address.
    pub fn send_invitation(
        &self,
        guest: &Guest,
        event: &Event,
        invitation: &Invitation,
    ) -> Result<(), Box<dyn Error>> {
        let to = guest
            .email
            .as_deref()
            .ok_or_else(|| format!("guest {} has no email address", guest.id))?;

        let email = Message::builder()
            .from(self.from.parse()?)
            .to(to.parse()?)
            .subject(format!("Your invitation to {}", event.name))
            .body(invitation_body(guest, event, invitation))?;

        self.smtp.send(&email)?;
        info!("invitation for {} sent to {}", guest.id, to);
        Ok(())
    }
}

pub fn invitation_body(guest: &Guest, event: &Event, invitation: &Invitation) -> String {
    let mut body = format!(
        "Dear {},\n\nYou are invited to {} on {} at {}, {}.\n\n",
        guest.full_name(),
        event.name,
        event.date,
        event.time,
        event.location
    );
    if let Some(welcome) = &event.welcome_message {
        body.push_str(welcome);
        body.push_str("\n\n");
    }
    body.push_str(&format!(
        "Your access code: {}\nOpen your invitation: {}\n\nQR content: {}\n",
        invitation.guest_code, invitation.direct_link, invitation.qr_payload
    ));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GuestStatus;

    #[test]
    fn body_carries_code_and_link() {
        let event = Event {
            id: "evt_1".to_string(),
            name: "Gala".to_string(),
            date: "2026-11-01".to_string(),
            time: "19:00".to_string(),
            location: "Hall".to_string(),
            welcome_message: Some("Black tie.".to_string()),
            active: true,
        };
        let guest = Guest {
            id: "K7Q2".to_string(),
            event_id: "evt_1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: Some("ada@example.com".to_string()),
            phone: None,
            table_id: None,
            status: GuestStatus::Confirmed,
            scanned: false,
            scanned_at: None,
        };
        let invitation = Invitation::for_guest(&guest, &event, "http://localhost:3000");
        let body = invitation_body(&guest, &event, &invitation);
        assert!(body.contains("Ada Lovelace"));
        assert!(body.contains("Black tie."));
        assert!(body.contains("Your access code: K7Q2"));
        assert!(body.contains("guestId=K7Q2"));
    }
}
