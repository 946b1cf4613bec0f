use tracing::warn;

use websheet_core::SheetError;

/// An outbound message produced by the `MAIL` built-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail transport
pub trait Mailer {
    fn send(&mut self, mail: &Mail) -> Result<(), SheetError>;
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&mut self, mail: &Mail) -> Result<(), SheetError> {
        warn!(
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "mail not delivered (sending disabled)"
        );
        Ok(())
    }
}
