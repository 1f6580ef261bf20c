//! Email channel: IMAP polling for inbound, SMTP via lettre for outbound.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::channels::transport::{FetchedMail, MailTransport};
use crate::config::EmailConfig;
use crate::error::ChannelError;

const CHANNEL: &str = "email";
const IO_TIMEOUT: Duration = Duration::from_secs(30);
/// SMTP port that speaks TLS from the first byte; anything else uses STARTTLS.
const SMTPS_PORT: u16 = 465;

// ── Channel ─────────────────────────────────────────────────────────

/// Email channel: IMAP polling (inbound) + SMTP (outbound).
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_smtp(&self) -> Result<SmtpTransport, ChannelError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let builder = if self.config.smtp_port == SMTPS_PORT {
            SmtpTransport::relay(&self.config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
        };
        Ok(builder
            .map_err(|e| send_err(format!("SMTP relay error: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build())
    }
}

#[async_trait]
impl MailTransport for EmailChannel {
    fn name(&self) -> &str {
        CHANNEL
    }

    async fn fetch_unseen(&self) -> Result<Vec<FetchedMail>, ChannelError> {
        let cfg = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen_imap(&cfg))
            .await
            .map_err(|e| fetch_err(format!("IMAP task panicked: {e}")))?
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        let email = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| send_err(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| send_err(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| send_err(format!("Failed to build email: {e}")))?;

        let transport = self.build_smtp()?;
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| send_err(format!("SMTP task panicked: {e}")))?
            .map_err(|e| send_err(format!("SMTP send failed: {e}")))?;

        info!("Email sent to {to}");
        Ok(())
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Reply subject: `Re: <subject>`, without stacking prefixes.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.get(..3).is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:")) {
        subject.to_string()
    } else if subject.is_empty() {
        "Re:".to_string()
    } else {
        format!("Re: {subject}")
    }
}

fn fetch_err(reason: impl Into<String>) -> ChannelError {
    ChannelError::FetchFailed {
        name: CHANNEL.into(),
        reason: reason.into(),
    }
}

fn send_err(reason: impl Into<String>) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL.into(),
        reason: reason.into(),
    }
}

fn connect_err(reason: impl std::fmt::Display) -> ChannelError {
    ChannelError::ConnectFailed {
        name: CHANNEL.into(),
        reason: reason.to_string(),
    }
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Tagged response to one IMAP command.
#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    /// `{n}` literals in arrival order.
    literals: Vec<Vec<u8>>,
    ok: bool,
}

/// Minimal IMAP4rev1 client session over any byte stream.
struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a connected stream and consume the server greeting.
    fn start(stream: S) -> Result<Self, ChannelError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(connect_err(format!("unexpected greeting: {}", greeting.trim_end())));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| fetch_err(format!("IMAP read failed: {e}")))?;
        if n == 0 {
            return Err(fetch_err("IMAP connection closed"));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| fetch_err(format!("IMAP write failed: {e}")))?;

        let done = format!("{tag} ");
        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream
                    .read_exact(&mut literal)
                    .map_err(|e| fetch_err(format!("IMAP literal read failed: {e}")))?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if let Some(status) = line.strip_prefix(&done) {
                response.ok = status.trim_start().starts_with("OK");
                response.lines.push(line);
                return Ok(response);
            }
            response.lines.push(line);
        }
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), ChannelError> {
        let resp = self.command(&format!("LOGIN {} {}", quote(username), quote(password)))?;
        if resp.ok {
            Ok(())
        } else {
            Err(ChannelError::AuthFailed {
                name: CHANNEL.into(),
                reason: resp.lines.last().map(|l| l.trim_end().to_string()).unwrap_or_default(),
            })
        }
    }

    /// Fetch every unseen INBOX message and flag it `\Seen`.
    fn fetch_unseen(&mut self) -> Result<Vec<FetchedMail>, ChannelError> {
        let select = self.command("SELECT \"INBOX\"")?;
        if !select.ok {
            return Err(fetch_err("SELECT INBOX failed"));
        }

        let search = self.command("SEARCH UNSEEN")?;
        if !search.ok {
            return Err(fetch_err("SEARCH UNSEEN failed"));
        }
        let ids = parse_search(&search.lines);
        debug!(count = ids.len(), "Unseen messages");

        let mut fetched = Vec::with_capacity(ids.len());
        for id in ids {
            let resp = self.command(&format!("FETCH {id} RFC822"))?;
            match resp.literals.into_iter().next() {
                Some(raw) if resp.ok => fetched.push(FetchedMail { uid: id.clone(), raw }),
                _ => warn!(id = %id, "IMAP FETCH returned no message body"),
            }

            let store = self.command(&format!("STORE {id} +FLAGS (\\Seen)"))?;
            if !store.ok {
                warn!(id = %id, "Failed to mark message as seen");
            }
        }
        Ok(fetched)
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!("IMAP logout: {e}");
        }
    }
}

/// Length of a trailing `{n}` literal marker, if the line ends with one.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end_matches(['\r', '\n']);
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Message numbers from `* SEARCH` responses.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn connect_tls(config: &EmailConfig) -> Result<TlsStream, ChannelError> {
    let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port)).map_err(connect_err)?;
    tcp.set_read_timeout(Some(IO_TIMEOUT)).map_err(connect_err)?;
    tcp.set_write_timeout(Some(IO_TIMEOUT)).map_err(connect_err)?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
        .map_err(connect_err)?;
    let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(connect_err)?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Fetch unseen emails via IMAP over TLS (blocking, run in spawn_blocking).
fn fetch_unseen_imap(config: &EmailConfig) -> Result<Vec<FetchedMail>, ChannelError> {
    let mut session = ImapSession::start(connect_tls(config)?)?;
    session.login(&config.username, config.password.expose_secret())?;
    let result = session.fetch_unseen();
    session.logout();
    result
}

// ── Tests ───────────────────────────────────────────────────────────
