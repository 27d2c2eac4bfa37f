//! Alert delivery
//!
//! One alert fans out to every channel the recipient enabled:
//! - email, built with `lettre` and handed to a `sendmail` compatible program
//! - apprise, either through the `apprise` CLI or a stateless relay
//!
//! Channels run concurrently and fail independently. Failures are logged
//! and reported, never propagated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSendmailTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use thiserror::Error;

use crate::config::{AppriseConfig, MailConfig};
use crate::invoker::{execute_with_timeout, CliInvoker, InvokeError, Invocation};
use crate::model::{AppriseMode, UserRecord};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to run `{program}`: {source}")]
    Invoke {
        program: String,
        source: InvokeError,
    },

    #[error("`{program}` exited with status {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("invalid email address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        source: AddressError,
    },

    #[error("could not build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("sendmail failed: {0}")]
    Sendmail(#[from] lettre::transport::sendmail::Error),

    #[error("`{program}` timed out after {seconds} seconds")]
    Timeout { program: String, seconds: u64 },

    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stateless mode selected but no relay URL configured")]
    MissingRelayUrl,
}

/// Result of one channel for one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Skipped(String),
    Failed(String),
}

impl ChannelOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub email: ChannelOutcome,
    pub apprise: ChannelOutcome,
}

/// Plain text alert shared by push channels.
pub fn alert_message(aliases: &[String]) -> String {
    format!(
        "🔴 Some repositories need attention !\nList of down repositories :\n {}",
        aliases.join(", ")
    )
}

/// Alert email content, before addresses are validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    pub fn status_alert(recipient: &UserRecord, aliases: &[String], from: &str) -> Self {
        let list: String = aliases.iter().map(|a| format!("  - {}\n", a)).collect();
        let body = format!(
            "Hello {},\n\n\
             These repositories were not backed up within their alert threshold:\n\n\
             {}\n\
             No new alert is sent for them until the cooldown expires.\n",
            recipient.username, list
        );

        Self {
            from: from.to_string(),
            to: recipient.email.clone(),
            subject: format!("[repowatch] {} repositories need attention", aliases.len()),
            body,
        }
    }

    /// Validate both mailboxes and build the MIME message.
    pub fn to_message(&self) -> Result<Message, NotifyError> {
        let from = parse_mailbox(&self.from)?;
        let to = parse_mailbox(&self.to)?;

        Ok(Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())?)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|source| NotifyError::InvalidAddress {
            address: address.to_string(),
            source,
        })
}

/// Mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), NotifyError>;
}

/// Hands messages to a local `sendmail` compatible program.
///
/// Recipients come from the message envelope and are passed as arguments,
/// never read back from the headers.
pub struct SendmailMailer {
    transport: AsyncSendmailTransport<Tokio1Executor>,
    program: String,
    timeout: Duration,
}

impl SendmailMailer {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            transport: AsyncSendmailTransport::new_with_command(config.program.clone()),
            program: config.program.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, message: Message) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(NotifyError::Timeout {
                program: self.program.clone(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

#[derive(Serialize)]
struct StatelessPayload<'a> {
    urls: String,
    body: &'a str,
}

/// Apprise delivery in either package or stateless mode
pub struct AppriseClient {
    invoker: Arc<dyn CliInvoker>,
    http: reqwest::Client,
    config: AppriseConfig,
}

impl AppriseClient {
    pub fn new(invoker: Arc<dyn CliInvoker>, config: AppriseConfig) -> Self {
        Self {
            invoker,
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn via_package(&self, services: &[String], message: &str) -> Result<(), NotifyError> {
        let mut args = vec!["-v".to_string(), "-b".to_string(), message.to_string()];
        args.extend(services.iter().cloned());
        let invocation = Invocation::new(self.config.program.clone(), args);
        run_checked(self.invoker.as_ref(), &invocation, self.config.timeout()).await
    }

    async fn via_stateless(
        &self,
        relay: &str,
        services: &[String],
        message: &str,
    ) -> Result<(), NotifyError> {
        let url = format!("{}/notify", relay.trim_end_matches('/'));
        self.http
            .post(&url)
            .timeout(self.config.timeout())
            .json(&StatelessPayload {
                urls: services.join(" "),
                body: message,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

async fn run_checked(
    invoker: &dyn CliInvoker,
    invocation: &Invocation,
    timeout: Duration,
) -> Result<(), NotifyError> {
    let program = invocation.display_name().to_string();
    let output = execute_with_timeout(invoker, invocation, timeout)
        .await
        .map_err(|source| NotifyError::Invoke {
            program: program.clone(),
            source,
        })?;

    if output.status != 0 {
        return Err(NotifyError::NonZeroExit {
            program,
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Alert sink used by the reconciler
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, recipient: &UserRecord, aliases: &[String]) -> DispatchReport;
}

pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    apprise: AppriseClient,
    mail_from: String,
}

impl NotificationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, apprise: AppriseClient, mail_from: impl Into<String>) -> Self {
        Self {
            mailer,
            apprise,
            mail_from: mail_from.into(),
        }
    }

    async fn email_channel(&self, recipient: &UserRecord, aliases: &[String]) -> ChannelOutcome {
        if !recipient.email_alert {
            return ChannelOutcome::Skipped("email alerts disabled".into());
        }
        if recipient.email.trim().is_empty() {
            tracing::warn!(user = %recipient.username, "email alerts enabled but no address set");
            return ChannelOutcome::Skipped("no email address".into());
        }

        let message = match EmailMessage::status_alert(recipient, aliases, &self.mail_from).to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, user = %recipient.username, "email alert not built");
                return ChannelOutcome::Failed(e.to_string());
            }
        };

        match self.mailer.send(message).await {
            Ok(()) => {
                tracing::info!(
                    user = %recipient.username,
                    repositories = aliases.len(),
                    "email alert sent"
                );
                ChannelOutcome::Sent
            }
            Err(e) => {
                tracing::error!(error = %e, user = %recipient.username, "email alert failed");
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }

    async fn apprise_channel(&self, recipient: &UserRecord, aliases: &[String]) -> ChannelOutcome {
        if !recipient.apprise_alert {
            return ChannelOutcome::Skipped("apprise alerts disabled".into());
        }
        if recipient.apprise_services.is_empty() {
            tracing::warn!(user = %recipient.username, "apprise alerts enabled but no services configured");
            return ChannelOutcome::Skipped("no apprise services".into());
        }

        let message = alert_message(aliases);
        let services = &recipient.apprise_services;
        let result = match recipient.apprise_mode {
            Some(AppriseMode::Package) => self.apprise.via_package(services, &message).await,
            Some(AppriseMode::Stateless) => match recipient.apprise_stateless_url.as_deref() {
                Some(relay) if !relay.trim().is_empty() => {
                    self.apprise.via_stateless(relay, services, &message).await
                }
                _ => Err(NotifyError::MissingRelayUrl),
            },
            other => {
                tracing::warn!(
                    mode = other.map(|m| m.as_str()).unwrap_or("unset"),
                    "No Apprise mode selected or supported"
                );
                return ChannelOutcome::Skipped("unsupported apprise mode".into());
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(services = services.len(), "apprise alert sent");
                ChannelOutcome::Sent
            }
            Err(e) => {
                tracing::error!(error = %e, "Apprise notification failed");
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn dispatch(&self, recipient: &UserRecord, aliases: &[String]) -> DispatchReport {
        let (email, apprise) = tokio::join!(
            self.email_channel(recipient, aliases),
            self.apprise_channel(recipient, aliases)
        );
        DispatchReport { email, apprise }
    }
}
