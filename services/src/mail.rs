//! Outgoing mail: the reset code message and the transports that deliver it.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{Config, MailTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

pub fn password_reset_mail(to: &str, code: &str) -> OutgoingMail {
    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Password Reset</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .otp {{ font-size: 24px; letter-spacing: 4px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Password Reset</h2>

        <p>Use the code below to reset your password:</p>

        <p><strong class="otp">{code}</strong></p>

        <p>The code expires in 3 minutes. If you did not ask for a reset, you can ignore this email.</p>

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
    );

    OutgoingMail {
        to: to.to_owned(),
        subject: "Password Reset".to_owned(),
        html_body,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to deliver message: {0}")]
    Transport(String),
}

pub trait Mailer: Clone + Send + Sync + 'static {
    fn send(&self, mail: OutgoingMail) -> impl Future<Output = Result<(), MailError>> + Send;
}

#[derive(Clone)]
enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

#[derive(Clone)]
pub struct LettreMailer {
    transport: Transport,
    from: Mailbox,
}

impl LettreMailer {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = match config.mail_transport() {
            MailTransport::Smtp {
                host,
                port,
                username,
                password,
            } => {
                let smtp = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
                    .port(*port)
                    .credentials(Credentials::new(username.clone(), password.clone()))
                    .build();
                Transport::Smtp(smtp)
            }
            MailTransport::File { dir } => {
                std::fs::create_dir_all(dir)?;
                tracing::info!(dir = %dir.display(), "Writing outgoing mail to files");
                Transport::File(AsyncFileTransport::<Tokio1Executor>::new(dir))
            }
        };

        let from = format!("{} <{}>", config.mail_from_name(), config.mail_from()).parse()?;

        Ok(Self { transport, from })
    }
}

impl Mailer for LettreMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let to: Mailbox = mail.to.parse().map_err(|e: lettre::address::AddressError| {
            MailError::Address {
                address: mail.to.clone(),
                reason: e.to_string(),
            }
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .header(ContentType::TEXT_HTML)
            .body(mail.html_body)
            .map_err(|e| MailError::Build(e.to_string()))?;

        match &self.transport {
            Transport::Smtp(smtp) => {
                smtp.send(message)
                    .await
                    .map_err(|e| MailError::Transport(e.to_string()))?;
            }
            Transport::File(file) => {
                file.send(message)
                    .await
                    .map_err(|e| MailError::Transport(e.to_string()))?;
            }
        }

        tracing::debug!(to = %mail.to, "mail sent");
        Ok(())
    }
}

/// Records every message instead of sending it.
#[derive(Clone, Default)]
pub struct MockMailer {
    outbox: Arc<Mutex<Vec<OutgoingMail>>>,
    failing: Arc<AtomicBool>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.outbox.lock().expect("lock poisoned").clone()
    }

    pub fn last_to(&self, to: &str) -> Option<OutgoingMail> {
        self.sent().into_iter().rev().find(|mail| mail.to == to)
    }
}

impl Mailer for MockMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Transport("mock mailer is failing".to_owned()));
        }
        self.outbox.lock().expect("lock poisoned").push(mail);
        Ok(())
    }
}

/// Pulls the code out of a message built by [`password_reset_mail`].
pub fn extract_reset_code(mail: &OutgoingMail) -> Option<String> {
    let (_, rest) = mail.html_body.split_once(r#"<strong class="otp">"#)?;
    let (code, _) = rest.split_once("</strong>")?;
    Some(code.to_owned())
}
