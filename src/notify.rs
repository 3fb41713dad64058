// SPDX-License-Identifier: GPL-3.0-only

//! Alert notification
//!
//! The controller's notify state calls [`Notifier::send_alert`]
//! synchronously; a failure escalates straight to the alarm state, so the
//! transport here is deliberately blocking with an operator-configured
//! timeout.

use crate::config::SmtpConfig;
use crate::errors::{AppError, AppResult};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;
use tracing::info;

/// External notification side effect consumed by the alarm controller.
pub trait Notifier: Send {
    fn send_alert(&self, subject: &str) -> AppResult<()>;
}

/// SMTP mail notifier.
pub struct MailNotifier {
    cfg: SmtpConfig,
}

impl MailNotifier {
    pub fn new(cfg: SmtpConfig) -> Self {
        Self { cfg }
    }

    fn transport(&self) -> AppResult<SmtpTransport> {
        let builder = if self.cfg.tls {
            SmtpTransport::starttls_relay(&self.cfg.server)
                .map_err(|e| AppError::Notify(format!("STARTTLS setup failed: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.cfg.server)
        };
        let mut builder = builder
            .port(self.cfg.port)
            .timeout(Some(Duration::from_secs(self.cfg.timeout)));
        if let (Some(user), Some(password)) = (&self.cfg.user, &self.cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        Ok(builder.build())
    }
}

impl Notifier for MailNotifier {
    fn send_alert(&self, subject: &str) -> AppResult<()> {
        info!(subject, "Sending mail alert");

        let from: Mailbox = self
            .cfg
            .mail_from
            .parse()
            .map_err(|e| AppError::Notify(format!("Bad sender address: {}", e)))?;
        let to: Mailbox = self
            .cfg
            .mail_to
            .parse()
            .map_err(|e| AppError::Notify(format!("Bad recipient address: {}", e)))?;

        let body = self.cfg.mail_template.replacen("%s", subject, 1);
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(format!("Security alert: {}", subject))
            .body(body)
            .map_err(|e| AppError::Notify(format!("Failed to build message: {}", e)))?;

        self.transport()?
            .send(&message)
            .map_err(|e| AppError::Notify(format!("SMTP send failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_subject_once() {
        let cfg = SmtpConfig {
            mail_template: "Alert: %s (%s untouched)".to_string(),
            ..SmtpConfig::default()
        };
        let body = cfg.mail_template.replacen("%s", "Motion detected", 1);
        assert_eq!(body, "Alert: Motion detected (%s untouched)");
    }
}
