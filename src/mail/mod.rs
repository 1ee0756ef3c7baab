//! Email Ingestor: poll the mailbox, turn each new message into product
//! requests and match them against the catalogue.

pub mod imap;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use parking_lot::Mutex;

use crate::config::{EmailConfig, LlmConfig};
use crate::error::{AppError, Result};
use crate::llm::extract::extract_requests;
use crate::matcher::match_products;
use crate::models::{EmailCheckResponse, EmailRequest, ProcessedRequest, DEFAULT_MATCH_TOP_K};
use crate::search::SearchClient;
use imap::{ImapError, ImapSession};

/// Message-IDs remembered to avoid handling a message twice.
const SEEN_CAPACITY: usize = 1_000;

/// A raw RFC 822 message and its mailbox UID.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// Where raw messages come from.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Up to `max` unseen messages, oldest first. Fetching leaves them unseen.
    async fn fetch_unseen(&self, max: usize) -> Result<Vec<FetchedMessage>>;

    /// Flag messages as seen once they have been handled.
    async fn mark_seen(&self, uids: &[u32]) -> Result<()>;
}

/// IMAP-backed [`MailSource`] reading `INBOX`.
pub struct ImapSource {
    host: String,
    port: u16,
    tls: bool,
    user: String,
    password: String,
}

impl ImapSource {
    /// `None` when the server or credentials are not configured.
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        Some(Self {
            host: config.server.clone()?,
            port: config.port,
            tls: config.tls,
            user: config.user.clone()?,
            password: config.password.clone()?,
        })
    }

    async fn open_inbox(&self) -> Result<ImapSession> {
        let mut session = ImapSession::connect(&self.host, self.port, self.tls).await?;
        session.login(&self.user, &self.password).await?;
        session.select("INBOX").await?;
        Ok(session)
    }
}

#[async_trait]
impl MailSource for ImapSource {
    async fn fetch_unseen(&self, max: usize) -> Result<Vec<FetchedMessage>> {
        let mut session = self.open_inbox().await?;

        let uids = session.search_unseen().await?;
        tracing::debug!(unseen = uids.len(), "Mailbox searched");

        let mut messages = Vec::new();
        for uid in uids.into_iter().take(max) {
            match session.fetch_message(uid).await {
                Ok(Some(raw)) => messages.push(FetchedMessage { uid, raw }),
                Ok(None) => tracing::warn!(uid, "FETCH returned no message body"),
                // The server refused this one message; the session is still usable.
                Err(ImapError::Protocol(msg)) => {
                    tracing::warn!(uid, "FETCH failed, leaving message unseen: {msg}");
                }
                Err(e) if messages.is_empty() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(uid, "FETCH failed, returning {} fetched messages: {e}", messages.len());
                    return Ok(messages);
                }
            }
        }

        if let Err(e) = session.logout().await {
            tracing::debug!("LOGOUT failed: {e}");
        }
        Ok(messages)
    }

    async fn mark_seen(&self, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut session = self.open_inbox().await?;
        session.store_seen(uids).await?;
        if let Err(e) = session.logout().await {
            tracing::debug!("LOGOUT failed: {e}");
        }
        Ok(())
    }
}

/// Bounded set of recently handled Message-IDs, oldest evicted first.
#[derive(Default)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    /// Record `id`; returns false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

pub struct EmailIngestor {
    source: Option<Arc<dyn MailSource>>,
    search: SearchClient,
    http_client: reqwest::Client,
    llm: LlmConfig,
    max_per_poll: usize,
    seen: Mutex<SeenIds>,
    poll_lock: tokio::sync::Mutex<()>,
}

impl EmailIngestor {
    pub fn new(
        source: Option<Arc<dyn MailSource>>,
        search: SearchClient,
        http_client: reqwest::Client,
        llm: LlmConfig,
        max_per_poll: usize,
    ) -> Self {
        Self {
            source,
            search,
            http_client,
            llm,
            max_per_poll: max_per_poll.max(1),
            seen: Mutex::new(SeenIds::default()),
            poll_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    /// One poll: fetch, parse, extract and match. Polls never overlap.
    pub async fn poll(&self) -> Result<EmailCheckResponse> {
        let source = self.source.as_ref().ok_or_else(|| {
            AppError::Configuration(
                "Mailbox polling needs EMAIL_SERVER, EMAIL_USER and EMAIL_PASSWORD".to_string(),
            )
        })?;

        let _guard = self.poll_lock.lock().await;

        let messages = source.fetch_unseen(self.max_per_poll).await?;
        let handled: Vec<u32> = messages.iter().map(|m| m.uid).collect();
        let mut new_emails = 0;
        let mut failed_emails = 0;
        let mut processed_requests = Vec::new();

        for message in messages {
            let Some(email) = parse_email(&message.raw) else {
                tracing::warn!(uid = message.uid, bytes = message.raw.len(), "Could not parse email");
                failed_emails += 1;
                continue;
            };

            if !self.seen.lock().insert(&email.message_id) {
                tracing::debug!(message_id = %email.message_id, "Email already handled");
                continue;
            }
            new_emails += 1;

            match self.process_email(&email).await {
                Ok(mut processed) => processed_requests.append(&mut processed),
                Err(e) => {
                    tracing::warn!(
                        message_id = %email.message_id,
                        sender = %email.sender,
                        "Failed to process email: {e}"
                    );
                    failed_emails += 1;
                }
            }
        }

        // Messages that failed extraction are flagged too.
        if let Err(e) = source.mark_seen(&handled).await {
            tracing::warn!(count = handled.len(), "Could not flag handled emails as seen: {e}");
        }

        tracing::info!(
            new_emails,
            failed_emails,
            requests = processed_requests.len(),
            "Mailbox poll finished"
        );

        Ok(EmailCheckResponse {
            status: "success".to_string(),
            new_emails,
            failed_emails,
            processed_requests,
        })
    }

    async fn process_email(&self, email: &EmailRequest) -> Result<Vec<ProcessedRequest>> {
        let requests = extract_requests(&self.http_client, &self.llm, email)
            .await
            .map_err(|e| AppError::ExtractionFailure(format!("{e:#}")))?;

        let mut processed = Vec::with_capacity(requests.len());
        for request in requests {
            let matches = match_products(&self.search, &request, DEFAULT_MATCH_TOP_K).await?;
            processed.push(ProcessedRequest {
                sender: email.sender.clone(),
                subject: email.subject.clone(),
                request,
                matches,
            });
        }
        Ok(processed)
    }
}

/// Run [`EmailIngestor::poll`] every `period` until the task is dropped.
pub async fn run_poll_loop(ingestor: Arc<EmailIngestor>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = ingestor.poll().await {
            tracing::warn!("Scheduled mailbox poll failed: {e}");
        }
    }
}

/// Parse a raw message. Falls back to the HTML body when there is no text
/// part, and synthesizes a Message-ID from sender, date and subject when
/// the header is missing.
pub fn parse_email(raw: &[u8]) -> Option<EmailRequest> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|f| f.first())
        .and_then(|a| a.address().map(|s| s.to_string()))
        .unwrap_or_default();
    let subject = parsed.subject().unwrap_or("").to_string();
    let body = parsed
        .body_text(0)
        .or_else(|| parsed.body_html(0))
        .map(|b| b.to_string())
        .unwrap_or_default();
    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    if sender.is_empty() && subject.is_empty() && body.trim().is_empty() {
        return None;
    }

    let message_id = parsed
        .message_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("{sender}|{}|{subject}", received_at.timestamp()));

    Some(EmailRequest {
        message_id,
        sender,
        subject,
        body,
        received_at,
    })
}
