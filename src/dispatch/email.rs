use anyhow::{Context, Result};
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A rendered message ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Provider verdict for a single send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Accepted,
    /// Worth retrying (5xx-ish provider trouble, network, timeout).
    Transient(String),
    /// Retrying cannot help (bad address, rejected mailbox).
    Permanent(String),
}

#[async_trait::async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult;
    fn name(&self) -> &'static str;
}

pub type DynTransport = Arc<dyn EmailTransport>;

/// SMTP delivery through lettre.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    /// Reads `SMTP_HOST`, `SMTP_USER`, `SMTP_PASS`; `BRIEF_EMAIL_FROM` overrides `default_from`.
    pub fn from_env(default_from: &str) -> Result<Self> {
        let host = std::env::var("SMTP_HOST").context("SMTP_HOST missing")?;
        let user = std::env::var("SMTP_USER").context("SMTP_USER missing")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS missing")?;
        let from_addr =
            std::env::var("BRIEF_EMAIL_FROM").unwrap_or_else(|_| default_from.to_string());

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid sender address")?;

        Ok(Self { mailer, from })
    }

    fn build(&self, email: &OutgoingEmail) -> std::result::Result<Message, DeliveryResult> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryResult::Permanent(format!("invalid address: {e}")))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| DeliveryResult::Permanent(format!("build email: {e}")))
    }
}

#[async_trait::async_trait]
impl EmailTransport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult {
        let msg = match self.build(email) {
            Ok(m) => m,
            Err(verdict) => return verdict,
        };
        match self.mailer.send(msg).await {
            Ok(_) => DeliveryResult::Accepted,
            Err(e) if e.is_permanent() => DeliveryResult::Permanent(e.to_string()),
            Err(e) => DeliveryResult::Transient(e.to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Accepts everything and only logs; used when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LogTransport {
    sent: AtomicUsize,
}

impl LogTransport {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult {
        self.sent.fetch_add(1, Ordering::SeqCst);
        tracing::info!(to = %email.to, subject = %email.subject, "email (log transport)");
        DeliveryResult::Accepted
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
