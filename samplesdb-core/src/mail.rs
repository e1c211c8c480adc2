use chrono::{DateTime, Utc};

/// Outbound message handed to whatever actually delivers mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Mail-dispatch collaborator. The core never talks SMTP; it hands a finished
/// message to an implementation of this trait.
pub trait Mailer {
    /// # Errors
    /// Fails if the message could not be handed off for delivery.
    fn send(&mut self, message: Message) -> anyhow::Result<()>;
}

/// Collects messages in memory. Used by tests and dev harnesses.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    pub sent: Vec<Message>,
}

impl Mailer for MemoryMailer {
    fn send(&mut self, message: Message) -> anyhow::Result<()> {
        self.sent.push(message);
        Ok(())
    }
}

/// The code must appear in the body in a form the recipient can submit back.
#[must_use]
pub fn verification_message(email: &str, token: &str, expiry: DateTime<Utc>) -> Message {
    Message {
        recipient: email.to_string(),
        subject: "Please verify your e-mail address".to_string(),
        body: format!(
            "Somebody (hopefully you) asked us to verify the address {email}.\n\
             Enter the code below to confirm you control it:\n\n\
             {token}\n\n\
             The code expires at {expiry}. If you did not request this, \
             ignore this message."
        ),
    }
}

#[must_use]
pub fn password_reset_message(email: &str, token: &str, expiry: DateTime<Utc>) -> Message {
    Message {
        recipient: email.to_string(),
        subject: "Password reset request".to_string(),
        body: format!(
            "Somebody (hopefully you) asked to reset the password for the \
             account registered to {email}.\n\
             Enter the code below to choose a new password:\n\n\
             {token}\n\n\
             The code expires at {expiry}. If you did not request this, \
             ignore this message."
        ),
    }
}
