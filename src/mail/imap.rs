//! Minimal IMAP4rev1 client for pulling unseen messages from one mailbox.
//!
//! Only what polling needs is spoken: LOGIN, SELECT, UID SEARCH, UID FETCH,
//! UID STORE and LOGOUT, over plain TCP or TLS.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::error::AppError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ImapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("IMAP protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ImapError>;

impl From<ImapError> for AppError {
    fn from(err: ImapError) -> Self {
        match err {
            ImapError::Auth(msg) => AppError::Authentication(format!("Mailbox login rejected: {msg}")),
            other => AppError::ServiceUnavailable(format!("Mailbox unavailable: {other}")),
        }
    }
}

trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ImapStream for T {}

/// Tagged completion of a command together with what the server sent first.
#[derive(Debug, Default)]
struct Response {
    untagged: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// One piece of a command line. Values that cannot be quoted go out as
/// synchronizing literals.
enum Part<'a> {
    Text(String),
    Literal(&'a [u8]),
}

/// An authenticated-or-not IMAP connection.
pub struct ImapSession {
    stream: BufReader<Box<dyn ImapStream>>,
    next_tag: u32,
}

impl ImapSession {
    /// Connect and read the server greeting.
    pub async fn connect(host: &str, port: u16, tls: bool) -> Result<Self> {
        info!("Connecting to IMAP server {}:{} (tls: {})", host, port, tls);

        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                ImapError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {host}:{port} timed out"),
                ))
            })??;

        let stream: Box<dyn ImapStream> = if tls {
            Box::new(tls_connect(host, tcp).await?)
        } else {
            Box::new(tcp)
        };

        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };

        let greeting = session.read_line().await?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(ImapError::Protocol(format!("Invalid greeting: {}", greeting.trim())));
        }
        debug!("Received greeting: {}", greeting.trim());

        Ok(session)
    }

    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let parts = [
            Part::Text("LOGIN ".to_string()),
            astring(user),
            Part::Text(" ".to_string()),
            astring(password),
        ];
        match self.send(&parts, true).await {
            Ok(_) => Ok(()),
            Err(ImapError::Protocol(msg)) if msg.starts_with("NO") => Err(ImapError::Auth(msg)),
            Err(e) => Err(e),
        }
    }

    pub async fn select(&mut self, mailbox: &str) -> Result<()> {
        self.command(&format!("SELECT {}", quote(mailbox))).await?;
        Ok(())
    }

    /// UIDs of messages without the `\Seen` flag, oldest first.
    pub async fn search_unseen(&mut self) -> Result<Vec<u32>> {
        let response = self.command("UID SEARCH UNSEEN").await?;
        let mut uids: Vec<u32> = response
            .untagged
            .iter()
            .filter_map(|line| line.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Full RFC 822 message for `uid`. `BODY.PEEK[]` leaves `\Seen` unset.
    pub async fn fetch_message(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let response = self.command(&format!("UID FETCH {uid} BODY.PEEK[]")).await?;
        Ok(response.literals.into_iter().next())
    }

    pub async fn store_seen(&mut self, uids: &[u32]) -> Result<()> {
        let set = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        self.command(&format!("UID STORE {set} +FLAGS.SILENT (\\Seen)")).await?;
        Ok(())
    }

    pub async fn logout(mut self) -> Result<()> {
        self.command("LOGOUT").await?;
        Ok(())
    }

    async fn command(&mut self, command: &str) -> Result<Response> {
        self.send(&[Part::Text(command.to_string())], false).await
    }

    /// Send one tagged command and collect untagged lines and literals up to
    /// its completion. `NO`/`BAD` completions become protocol errors.
    /// `redact` keeps the command out of the debug log.
    async fn send(&mut self, parts: &[Part<'_>], redact: bool) -> Result<Response> {
        let tag = format!("a{}", self.next_tag);
        self.next_tag += 1;

        let mut line = format!("{tag} ");
        for part in parts {
            match part {
                Part::Text(text) => line.push_str(text),
                Part::Literal(bytes) => {
                    line.push_str(&format!("{{{}}}", bytes.len()));
                    self.write_line(&line, redact).await?;
                    line.clear();

                    let ready = self.read_line().await?;
                    if !ready.starts_with('+') {
                        return Err(ImapError::Protocol(format!(
                            "Literal refused: {}",
                            ready.trim_end()
                        )));
                    }
                    self.stream.write_all(bytes).await?;
                }
            }
        }
        self.write_line(&line, redact).await?;

        let mut response = Response::default();
        loop {
            let line = self.read_line().await?;
            let trimmed = line.trim_end();

            if let Some(rest) = trimmed.strip_prefix(tag.as_str()).and_then(|r| r.strip_prefix(' ')) {
                let (status, text) = rest.split_once(' ').unwrap_or((rest, ""));
                return match status.to_ascii_uppercase().as_str() {
                    "OK" => Ok(response),
                    _ => Err(ImapError::Protocol(format!("{status} {text}"))),
                };
            }

            if let Some(size) = literal_size(trimmed) {
                if size > MAX_LITERAL_BYTES {
                    return Err(ImapError::Protocol(format!("Literal of {size} bytes is too large")));
                }
                let mut literal = vec![0u8; size];
                self.stream.read_exact(&mut literal).await?;
                response.literals.push(literal);
            }
            response.untagged.push(trimmed.to_string());
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(ImapError::Protocol("Connection closed by server".to_string()));
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        debug!("< {}", line.trim_end());
        Ok(line)
    }

    async fn write_line(&mut self, line: &str, redact: bool) -> Result<()> {
        if redact {
            debug!("> [redacted]");
        } else {
            debug!("> {}", line);
        }
        self.stream.write_all(format!("{line}\r\n").as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

async fn tls_connect(
    host: &str,
    tcp: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(host)
        .map_err(|e| ImapError::Tls(format!("Invalid server name '{host}': {e}")))?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ImapError::Tls(e.to_string()))
}

/// `{123}` at the end of a line announces a literal of that many bytes.
fn literal_size(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].trim_end_matches('+').parse().ok()
}

/// A string argument: quoted when it is 7-bit without CR, LF or NUL,
/// a literal otherwise.
fn astring(value: &str) -> Part<'_> {
    let quotable = value
        .bytes()
        .all(|b| b.is_ascii() && !matches!(b, b'\r' | b'\n' | 0));
    if quotable {
        Part::Text(quote(value))
    } else {
        Part::Literal(value.as_bytes())
    }
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
