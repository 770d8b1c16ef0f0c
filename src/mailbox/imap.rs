//! IMAP over TLS (rustls), blocking socket I/O driven from async code.
//!
//! `ImapConnection` speaks the wire protocol synchronously. `ImapSession`
//! owns one connection and moves it onto the blocking pool for each
//! command, so commands on a session never interleave.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::mailbox::{FolderStatus, MailboxConnector, MailboxSession, Uid};

/// Socket connect/read/write timeout.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest literal accepted from the server (64 MiB).
pub const MAX_LITERAL_LEN: usize = 64 * 1024 * 1024;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Wire protocol ───────────────────────────────────────────────────

/// One server response line together with any literals embedded in it.
#[derive(Debug, Clone, Default)]
pub struct ResponseLine {
    /// Line text with literal payloads removed (the `{n}` markers remain).
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// Synchronous IMAP connection over any byte stream.
pub struct ImapConnection<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapConnection<S> {
    /// Wrap `stream` and consume the server greeting.
    pub fn handshake(stream: S) -> Result<Self, MailboxError> {
        let mut conn = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = conn.read_response_line()?;
        let status = greeting
            .text
            .strip_prefix("* ")
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("");
        if !status.eq_ignore_ascii_case("OK") && !status.eq_ignore_ascii_case("PREAUTH") {
            return Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.text
            )));
        }
        Ok(conn)
    }

    fn read_raw_line(&mut self) -> Result<Vec<u8>, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Protocol("IMAP connection closed".into()));
        }
        Ok(buf)
    }

    /// Read one logical response line, pulling in `{n}` literals byte-exact.
    fn read_response_line(&mut self) -> Result<ResponseLine, MailboxError> {
        let mut line = ResponseLine::default();
        loop {
            let raw = self.read_raw_line()?;
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim_end_matches(['\r', '\n']);
            line.text.push_str(text);
            match literal_len(text) {
                Some(len) if len > MAX_LITERAL_LEN => {
                    return Err(MailboxError::Protocol(format!(
                        "literal of {len} bytes exceeds limit of {MAX_LITERAL_LEN}"
                    )));
                }
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.stream.read_exact(&mut literal)?;
                    line.literals.push(literal);
                }
                None => return Ok(line),
            }
        }
    }

    /// Send one tagged command and collect untagged responses until its
    /// completion. A `NO`/`BAD` completion becomes `MailboxError::Command`.
    pub fn command(&mut self, cmd: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let line = self.read_response_line()?;
            if let Some(rest) = line.text.strip_prefix(tag.as_str()).and_then(|r| r.strip_prefix(' ')) {
                let status = rest.split_whitespace().next().unwrap_or("");
                if status.eq_ignore_ascii_case("OK") {
                    return Ok(untagged);
                }
                return Err(MailboxError::Command {
                    command: command_name(cmd),
                    reason: rest.to_string(),
                });
            }
            untagged.push(line);
        }
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        self.command(&format!("LOGIN {} {}", quote(user), quote(password)))
            .map(|_| ())
            .map_err(|e| MailboxError::AuthFailed {
                user: user.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn select(&mut self, folder: &str) -> Result<FolderStatus, MailboxError> {
        let lines = self.command(&format!("SELECT {}", quote(folder)))?;
        Ok(FolderStatus {
            exists: parse_exists(&lines).unwrap_or(0),
        })
    }

    pub fn uid_search_all(&mut self) -> Result<Vec<Uid>, MailboxError> {
        let lines = self.command("UID SEARCH ALL")?;
        Ok(parse_search(&lines))
    }

    /// Fetch the raw RFC 822 message. `BODY.PEEK` leaves `\Seen` untouched.
    pub fn uid_fetch_body(&mut self, uid: Uid) -> Result<Option<Vec<u8>>, MailboxError> {
        let lines = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        Ok(lines
            .into_iter()
            .filter(|l| l.text.to_ascii_uppercase().contains(" FETCH "))
            .find_map(|l| l.literals.into_iter().next()))
    }

    pub fn list(&mut self, name: &str) -> Result<Vec<String>, MailboxError> {
        let lines = self.command(&format!("LIST \"\" {}", quote(name)))?;
        Ok(lines.iter().filter_map(parse_list_name).collect())
    }

    pub fn create(&mut self, name: &str) -> Result<(), MailboxError> {
        self.command(&format!("CREATE {}", quote(name))).map(|_| ())
    }

    pub fn uid_copy(&mut self, uid: Uid, destination: &str) -> Result<(), MailboxError> {
        self.command(&format!("UID COPY {uid} {}", quote(destination)))
            .map(|_| ())
    }

    pub fn uid_flag_deleted(&mut self, uid: Uid) -> Result<(), MailboxError> {
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)"))
            .map(|_| ())
    }

    pub fn expunge(&mut self) -> Result<(), MailboxError> {
        self.command("EXPUNGE").map(|_| ())
    }

    pub fn logout(&mut self) -> Result<(), MailboxError> {
        self.command("LOGOUT").map(|_| ())
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Length of the literal announced at the end of `line` (`{n}` or `{n+}`).
pub fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// Encode `s` as an IMAP quoted string.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Command keyword(s) for error messages. Never includes arguments, so
/// credentials passed to `LOGIN` stay out of logs.
pub fn command_name(cmd: &str) -> String {
    let mut words = cmd.split_whitespace();
    match words.next() {
        Some(first) if first.eq_ignore_ascii_case("UID") => {
            format!("UID {}", words.next().unwrap_or_default())
        }
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

/// Message count from a `* <n> EXISTS` response.
pub fn parse_exists(lines: &[ResponseLine]) -> Option<u32> {
    lines.iter().find_map(|l| {
        let mut words = l.text.strip_prefix("* ")?.split_whitespace();
        let count = words.next()?.parse::<u32>().ok()?;
        words
            .next()
            .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
            .map(|_| count)
    })
}

/// UIDs from `* SEARCH ...` responses.
pub fn parse_search(lines: &[ResponseLine]) -> Vec<Uid> {
    lines
        .iter()
        .filter_map(|l| {
            let rest = l.text.strip_prefix("* ")?;
            let (keyword, ids) = rest.split_once(' ').unwrap_or((rest, ""));
            keyword.eq_ignore_ascii_case("SEARCH").then_some(ids)
        })
        .flat_map(|ids| ids.split_whitespace().filter_map(|id| id.parse().ok()).map(Uid))
        .collect()
}

/// Mailbox name from a `* LIST (flags) delimiter name` response.
pub fn parse_list_name(line: &ResponseLine) -> Option<String> {
    let rest = line.text.strip_prefix("* ")?;
    let (keyword, rest) = rest.split_once(' ')?;
    if !keyword.eq_ignore_ascii_case("LIST") {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('(')?;
    let (_flags, rest) = rest.split_once(')')?;
    let (_delimiter, rest) = next_token(rest.trim_start())?;
    let rest = rest.trim_start();
    if literal_len(rest).is_some() {
        let literal = line.literals.last()?;
        return Some(String::from_utf8_lossy(literal).into_owned());
    }
    next_token(rest).map(|(name, _)| name)
}

/// Split one atom or quoted string off the front of `s`.
fn next_token(s: &str) -> Option<(String, &str)> {
    if let Some(body) = s.strip_prefix('"') {
        let mut out = String::new();
        let mut escaped = false;
        for (i, ch) in body.char_indices() {
            match ch {
                _ if escaped => {
                    out.push(ch);
                    escaped = false;
                }
                '\\' => escaped = true,
                '"' => return Some((out, &body[i + 1..])),
                _ => out.push(ch),
            }
        }
        None
    } else {
        let end = s.find(char::is_whitespace).unwrap_or(s.len());
        (end > 0).then(|| (s[..end].to_string(), &s[end..]))
    }
}

// ── Connection setup ────────────────────────────────────────────────

fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, MailboxError> {
    let connect_err = |reason: String| MailboxError::Connect {
        host: host.to_string(),
        port,
        reason,
    };
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, SOCKET_TIMEOUT) {
            Ok(tcp) => {
                tcp.set_read_timeout(Some(SOCKET_TIMEOUT))?;
                tcp.set_write_timeout(Some(SOCKET_TIMEOUT))?;
                return Ok(tcp);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(connect_err(
        last_err.map_or_else(|| "no addresses resolved".to_string(), |e| e.to_string()),
    ))
}

/// Open a TLS connection and log in (blocking).
fn open_authenticated(config: &MailboxConfig) -> Result<ImapConnection<TlsStream>, MailboxError> {
    let tcp = connect_tcp(&config.host, config.port)?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| MailboxError::Tls(format!("invalid server name {}: {e}", config.host)))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailboxError::Tls(e.to_string()))?;

    let mut imap = ImapConnection::handshake(rustls::StreamOwned::new(conn, tcp))?;
    imap.login(&config.user, config.password.expose_secret())?;
    Ok(imap)
}

/// Connects to the configured IMAP server.
pub struct ImapConnector {
    config: MailboxConfig,
}

impl ImapConnector {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let config = self.config.clone();
        let conn = tokio::task::spawn_blocking(move || open_authenticated(&config))
            .await
            .map_err(|e| MailboxError::Protocol(format!("IMAP connect task panicked: {e}")))??;
        debug!(host = %self.config.host, user = %self.config.user, "IMAP session opened");
        Ok(Box::new(ImapSession::new(conn)))
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Authenticated IMAP session with explicit selected-folder tracking.
pub struct ImapSession {
    conn: Option<ImapConnection<TlsStream>>,
    selected: Option<String>,
}

impl ImapSession {
    fn new(conn: ImapConnection<TlsStream>) -> Self {
        Self {
            conn: Some(conn),
            selected: None,
        }
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The connection is dropped after an I/O or protocol error since the
    /// response stream can no longer be trusted to be in sync.
    async fn run<T, F>(&mut self, f: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapConnection<TlsStream>) -> Result<T, MailboxError> + Send + 'static,
    {
        let mut conn = self.conn.take().ok_or(MailboxError::Disconnected)?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task panicked: {e}")))?;

        match &result {
            Err(MailboxError::Io(_)) | Err(MailboxError::Protocol(_)) => {
                warn!("Dropping IMAP connection after transport error");
                self.selected = None;
            }
            _ => self.conn = Some(conn),
        }
        result
    }

    async fn ensure_selected(&mut self, folder: &str) -> Result<(), MailboxError> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        self.select(folder).await.map(|_| ())
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    async fn select(&mut self, folder: &str) -> Result<FolderStatus, MailboxError> {
        // A failed SELECT leaves no folder selected.
        self.selected = None;
        let name = folder.to_string();
        let status = self.run(move |c| c.select(&name)).await?;
        self.selected = Some(folder.to_string());
        Ok(status)
    }

    async fn list_uids(&mut self, folder: &str) -> Result<Vec<Uid>, MailboxError> {
        self.ensure_selected(folder).await?;
        self.run(|c| c.uid_search_all()).await
    }

    async fn fetch_body(&mut self, folder: &str, uid: Uid) -> Result<Vec<u8>, MailboxError> {
        self.ensure_selected(folder).await?;
        self.run(move |c| c.uid_fetch_body(uid))
            .await?
            .ok_or_else(|| MailboxError::NotFound {
                folder: folder.to_string(),
                uid,
            })
    }

    async fn folder_exists(&mut self, name: &str) -> Result<bool, MailboxError> {
        let wanted = name.to_string();
        let names = self.run(move |c| c.list(&wanted)).await?;
        Ok(names.iter().any(|n| n.eq_ignore_ascii_case(name)))
    }

    async fn create_folder(&mut self, name: &str) -> Result<(), MailboxError> {
        let name = name.to_string();
        self.run(move |c| c.create(&name)).await
    }

    async fn copy(
        &mut self,
        folder: &str,
        uid: Uid,
        destination: &str,
    ) -> Result<(), MailboxError> {
        self.ensure_selected(folder).await?;
        let destination = destination.to_string();
        self.run(move |c| c.uid_copy(uid, &destination)).await
    }

    async fn flag_deleted(&mut self, folder: &str, uid: Uid) -> Result<(), MailboxError> {
        self.ensure_selected(folder).await?;
        self.run(move |c| c.uid_flag_deleted(uid)).await
    }

    async fn expunge(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.ensure_selected(folder).await?;
        self.run(|c| c.expunge()).await
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        let result = self.run(|c| c.logout()).await;
        self.conn = None;
        self.selected = None;
        result
    }
}

// ── Tests ───────────────────────────────────────────────────────────
