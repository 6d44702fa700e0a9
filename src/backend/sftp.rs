//! SFTP client using the ssh2 crate (libssh2 bindings).
//!
//! Provides `SftpClient`, the production `RemoteClient`. Metadata calls
//! (listing, sizes) share one lazily connected session that is re-established
//! after a session-level failure. Every fetch opens its own session(s) and
//! registers their sockets with the transfer's `TransferControl`, so a
//! forced stop can cut a stalled libssh2 call.
//!
//! # Thread safety
//!
//! `libssh2` is **not** thread-safe. A `SftpSession` is only ever used by one
//! thread at a time: the shared metadata session sits behind a `Mutex`, and
//! each directory-fetch worker creates and owns its session.

use std::io::{Seek, SeekFrom};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ssh2::{CheckResult, ErrorCode, FileStat, HashType, KnownHostFileKind, Session, Sftp};

use crate::backend::{
    finish_directory_fetch, DirectoryFetch, EntryKind, FileTask, RemoteClient, RemoteEntry,
};
use crate::config::types::{Credentials, MirrorConfig, Timeouts};
use crate::error::MirrorError;
use crate::transfer::control::TransferControl;
use crate::transfer::copy::fetch_resumable;
use crate::transfer::pool::run_pool;

/// Connection timeout for TCP connection to SFTP server (30 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default SSH port.
const DEFAULT_SSH_PORT: u16 = 22;

/// libssh2's LIBSSH2_ERROR_TIMEOUT.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Connection parameters for `SftpClient`.
#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub timeouts: Timeouts,
}

impl SftpSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            host: config.server.clone(),
            port: config.port,
            credentials: config.credentials.clone(),
            timeouts: config.timeouts,
        }
    }
}

/// One authenticated SSH session with its SFTP channel.
struct SftpSession {
    session: Session,
    sftp: Sftp,
    /// Clone of the session's TCP stream, used to cut the connection.
    socket: TcpStream,
}

// SAFETY: `SftpSession` wraps libssh2 handles, which must never be used from
// two threads at once. Every `SftpSession` is either owned by a single
// worker thread or stored in `SftpClient::primary`, whose `Mutex`
// guarantees exclusive access. Moving it between threads is sound because
// the underlying pointers stay valid for the lifetime of `session`.
unsafe impl Send for SftpSession {}

impl SftpSession {
    /// Run `op` with a per-call blocking timeout, then restore `normal`.
    fn with_timeout<T>(
        &self,
        timeout: Duration,
        normal: Duration,
        op: impl FnOnce(&Sftp) -> Result<T, ssh2::Error>,
    ) -> Result<T, ssh2::Error> {
        self.session.set_timeout(millis(timeout));
        let result = op(&self.sftp);
        self.session.set_timeout(millis(normal));
        result
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<RemoteEntry>, ssh2::Error> {
        let mut entries = Vec::new();
        for (entry_path, stat) in self.sftp.readdir(path)? {
            let Some(name) = entry_name(&entry_path) else {
                continue;
            };
            let kind = match classify(&stat) {
                StatKind::Directory => EntryKind::Directory,
                StatKind::Symlink => match self.sftp.stat(&entry_path) {
                    Ok(target) if target.is_dir() => EntryKind::Directory,
                    _ => EntryKind::File,
                },
                StatKind::File | StatKind::Other => EntryKind::File,
            };
            entries.push(RemoteEntry::new(name, kind));
        }
        Ok(entries)
    }

    /// Sum regular-file bytes under `root`, giving up at `deadline`.
    ///
    /// The root itself is resolved through links, the same way `readdir`
    /// does when the tree is fetched.
    fn disk_usage(&self, root: &Path, deadline: Instant) -> Result<u64, ssh2::Error> {
        if let Some(size) = root_size(&self.sftp.stat(root)?) {
            return Ok(size);
        }

        let mut total = 0u64;
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            if Instant::now() >= deadline {
                return Err(ssh2::Error::new(
                    ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT),
                    "recursive size query exceeded its time budget",
                ));
            }
            for (path, stat) in self.sftp.readdir(&dir)? {
                if entry_name(&path).is_none() {
                    continue;
                }
                match classify(&stat) {
                    StatKind::Directory => pending.push(path),
                    StatKind::Symlink => total += self.link_file_size(&path),
                    StatKind::File => total += stat.size.unwrap_or(0),
                    StatKind::Other => {}
                }
            }
        }
        Ok(total)
    }

    /// Size of a symlink's target when it is a file; directories and
    /// dangling links count as zero.
    fn link_file_size(&self, path: &Path) -> u64 {
        match self.sftp.stat(path) {
            Ok(target) if !target.is_dir() => target.size.unwrap_or(0),
            _ => 0,
        }
    }

    /// Walk the remote tree, create every local directory and return the
    /// files to fetch.
    fn plan_directory(
        &self,
        remote: &Path,
        local: &Path,
        control: &TransferControl,
    ) -> Result<Vec<FileTask>, MirrorError> {
        let mut tasks = Vec::new();
        let mut pending = vec![(remote.to_path_buf(), local.to_path_buf())];
        while let Some((remote_dir, local_dir)) = pending.pop() {
            control.checkpoint()?;
            std::fs::create_dir_all(&local_dir)?;
            let listing = self
                .sftp
                .readdir(&remote_dir)
                .map_err(|e| remote_err(&remote_dir, e))?;
            for (path, stat) in listing {
                let Some(name) = entry_name(&path) else {
                    continue;
                };
                let local_path = local_dir.join(&name);
                match classify(&stat) {
                    StatKind::Directory => pending.push((path, local_path)),
                    StatKind::File => tasks.push(FileTask {
                        remote: path,
                        local: local_path,
                    }),
                    StatKind::Symlink => match self.sftp.stat(&path) {
                        Ok(target) if target.is_dir() => {
                            tracing::debug!(
                                "Not following symlinked directory {}",
                                path.display()
                            );
                        }
                        Ok(_) => tasks.push(FileTask {
                            remote: path,
                            local: local_path,
                        }),
                        Err(e) => {
                            tracing::debug!("Skipping dangling link {}: {}", path.display(), e);
                        }
                    },
                    StatKind::Other => {
                        tracing::debug!("Skipping special file {}", path.display());
                    }
                }
            }
        }
        Ok(tasks)
    }

    /// Fetch one remote file into `local`, continuing a partial copy.
    fn fetch_into(
        &self,
        remote: &Path,
        local: &Path,
        control: &TransferControl,
    ) -> Result<u64, MirrorError> {
        let remote_len = self
            .sftp
            .stat(remote)
            .map_err(|e| remote_err(remote, e))?
            .size
            .unwrap_or(0);

        fetch_resumable(
            |offset| {
                let mut file = self.sftp.open(remote).map_err(|e| remote_err(remote, e))?;
                if offset > 0 {
                    file.seek(SeekFrom::Start(offset))?;
                }
                Ok(file)
            },
            remote_len,
            local,
            control,
        )
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "sftp-mirror done", None);
    }
}

/// SFTP implementation of `RemoteClient`.
pub struct SftpClient {
    settings: SftpSettings,
    primary: Mutex<Option<SftpSession>>,
}

impl SftpClient {
    /// Create a client. No connection is made until the first call.
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            primary: Mutex::new(None),
        }
    }

    fn connection_failed(&self, reason: String) -> MirrorError {
        MirrorError::ConnectionFailed {
            host: self.settings.host.clone(),
            reason,
        }
    }

    fn effective_port(&self) -> u16 {
        if self.settings.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.settings.port
        }
    }

    /// Open a new authenticated session.
    fn connect(&self) -> Result<SftpSession, MirrorError> {
        let host = self.settings.host.as_str();
        let port = self.effective_port();

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| self.connection_failed(format!("Cannot resolve '{}': {}", host, e)))?
            .collect();

        let mut last_error = None;
        let mut connected = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let Some(tcp) = connected else {
            return Err(self.connection_failed(match last_error {
                Some(e) => format!("TCP connection failed: {}", e),
                None => "No addresses resolved".to_string(),
            }));
        };
        let socket = tcp.try_clone()?;

        let mut session = Session::new()
            .map_err(|e| self.connection_failed(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(self.settings.timeouts.network));
        session
            .handshake()
            .map_err(|e| self.connection_failed(format!("SSH handshake failed: {}", e)))?;

        verify_host_key(&session, host, port)?;

        let user = self.settings.credentials.username.as_str();
        session
            .userauth_password(user, &self.settings.credentials.password)
            .map_err(|e| {
                self.connection_failed(format!("Authentication failed for user '{}': {}", user, e))
            })?;
        if !session.authenticated() {
            return Err(self.connection_failed(format!(
                "Authentication failed for user '{}'",
                user
            )));
        }

        let sftp = session
            .sftp()
            .map_err(|e| self.connection_failed(format!("Failed to open SFTP channel: {}", e)))?;

        tracing::debug!("SFTP: connected to {}:{} as {}", host, port, user);
        Ok(SftpSession {
            session,
            sftp,
            socket,
        })
    }

    /// Open a session whose socket `control` can cut.
    fn connect_controlled(&self, control: &TransferControl) -> Result<SftpSession, MirrorError> {
        control.checkpoint()?;
        let session = self.connect()?;
        control.register_socket(session.socket.try_clone()?);
        Ok(session)
    }

    /// Run a metadata operation on the shared session.
    ///
    /// The session is (re)connected on demand and discarded after a
    /// session-level error so the next call starts from a fresh connection.
    fn with_primary<T>(
        &self,
        path: &Path,
        op: impl FnOnce(&SftpSession) -> Result<T, ssh2::Error>,
    ) -> Result<T, MirrorError> {
        let mut slot = self
            .primary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let session = match slot.take() {
            Some(session) => session,
            None => self.connect()?,
        };

        match op(&session) {
            Ok(value) => {
                *slot = Some(session);
                Ok(value)
            }
            Err(e) => {
                if is_session_error(&e) {
                    tracing::debug!("SFTP: dropping session after error: {}", e);
                } else {
                    *slot = Some(session);
                }
                Err(remote_err(path, e))
            }
        }
    }
}

impl RemoteClient for SftpClient {
    fn read_dir(&self, path: &Path) -> Result<Vec<RemoteEntry>, MirrorError> {
        let t = self.settings.timeouts;
        self.with_primary(path, |s| s.with_timeout(t.list, t.network, |_| s.read_dir(path)))
    }

    fn disk_usage(&self, path: &Path) -> Result<u64, MirrorError> {
        let deadline = Instant::now() + self.settings.timeouts.size;
        self.with_primary(path, |s| s.disk_usage(path, deadline))
    }

    fn file_size(&self, path: &Path) -> Result<u64, MirrorError> {
        let t = self.settings.timeouts;
        let stat = self.with_primary(path, |s| {
            s.with_timeout(t.size_fallback, t.network, |sftp| sftp.stat(path))
        })?;
        stat.size.ok_or_else(|| MirrorError::Remote {
            path: path.to_path_buf(),
            reason: "server did not report a size".to_string(),
        })
    }

    fn fetch_file(
        &self,
        remote: &Path,
        local: &Path,
        control: &TransferControl,
    ) -> Result<u64, MirrorError> {
        let session = self.connect_controlled(control)?;
        session.fetch_into(remote, local, control)
    }

    fn fetch_dir(
        &self,
        remote: &Path,
        local: &Path,
        jobs: usize,
        control: &TransferControl,
    ) -> Result<DirectoryFetch, MirrorError> {
        let tasks = {
            let lister = self.connect_controlled(control)?;
            lister.plan_directory(remote, local, control)?
        };
        tracing::debug!(
            "SFTP: {} file(s) under {} with {} worker(s)",
            tasks.len(),
            remote.display(),
            jobs
        );

        let report = run_pool(
            tasks,
            jobs,
            control,
            || self.connect_controlled(control),
            |session, task| session.fetch_into(&task.remote, &task.local, control),
        );
        finish_directory_fetch(remote, report, control)
    }
}

/// Coarse type of a remote stat result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatKind {
    File,
    Directory,
    Symlink,
    Other,
}

fn classify(stat: &FileStat) -> StatKind {
    let file_type = stat.file_type();
    if file_type.is_dir() {
        StatKind::Directory
    } else if file_type.is_symlink() {
        StatKind::Symlink
    } else if file_type.is_file() {
        StatKind::File
    } else {
        StatKind::Other
    }
}

/// Size of a followed root that needs no walk; `None` for a directory.
fn root_size(stat: &FileStat) -> Option<u64> {
    match classify(stat) {
        StatKind::Directory => None,
        StatKind::File | StatKind::Symlink => Some(stat.size.unwrap_or(0)),
        StatKind::Other => Some(0),
    }
}

/// Final path component, or `None` for `.` / `..`.
///
/// Reads the raw last segment; `Path::file_name` folds a trailing `.` into
/// the parent's name.
fn entry_name(path: &Path) -> Option<String> {
    let raw = path.as_os_str().to_string_lossy();
    let name = raw.rsplit('/').next()?;
    match name {
        "" | "." | ".." => None,
        _ => Some(name.to_string()),
    }
}

fn is_session_error(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::Session(_))
}

fn remote_err(path: &Path, e: ssh2::Error) -> MirrorError {
    MirrorError::Remote {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// Host name as written in known_hosts for a given port.
fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Verify the server's host key against `~/.ssh/known_hosts`.
///
/// - `Match`    proceeds silently.
/// - `Mismatch` refuses the connection.
/// - `NotFound` accepts the key, logs its fingerprint and persists it.
///   Runs are unattended, so there is nobody to confirm a prompt.
/// - `Failure`  proceeds with a warning.
fn verify_host_key(session: &Session, host: &str, port: u16) -> Result<(), MirrorError> {
    let (key_bytes, key_type) = session.host_key().ok_or_else(|| MirrorError::ConnectionFailed {
        host: host.to_string(),
        reason: "Server did not provide a host key during handshake.".to_string(),
    })?;

    let mut known_hosts = session.known_hosts().map_err(|e| MirrorError::ConnectionFailed {
        host: host.to_string(),
        reason: format!("Failed to initialise known-hosts store: {}", e),
    })?;

    let Some(known_hosts_path) = dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts"))
    else {
        tracing::warn!("SFTP: no home directory; skipping host key verification for {}", host);
        return Ok(());
    };

    // A missing file is expected on first contact; check() then reports NotFound.
    let file_loaded = known_hosts
        .read_file(&known_hosts_path, KnownHostFileKind::OpenSSH)
        .is_ok();

    match known_hosts.check_port(host, port, key_bytes) {
        CheckResult::Match => {
            tracing::debug!("SFTP: Host key verified for {}:{}", host, port);
            Ok(())
        }
        CheckResult::Mismatch => Err(MirrorError::ConnectionFailed {
            host: host.to_string(),
            reason: format!(
                "Host key mismatch (server presents {}). Remove the stale entry from {} if the key legitimately changed.",
                fingerprint(session),
                known_hosts_path.display()
            ),
        }),
        CheckResult::NotFound => {
            tracing::warn!(
                "SFTP: accepting unknown host key for {} ({})",
                host,
                fingerprint(session)
            );
            let entry = known_hosts_entry(host, port);
            if let Err(e) = known_hosts.add(&entry, key_bytes, host, key_type.into()) {
                tracing::warn!("SFTP: could not record host key for {}: {}", host, e);
                return Ok(());
            }
            if let Some(parent) = known_hosts_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = known_hosts.write_file(&known_hosts_path, KnownHostFileKind::OpenSSH) {
                tracing::warn!(
                    "SFTP: could not write {}: {}",
                    known_hosts_path.display(),
                    e
                );
            }
            Ok(())
        }
        CheckResult::Failure => {
            if file_loaded {
                tracing::warn!("SFTP: host key check failed for {}; proceeding", host);
            } else {
                tracing::warn!(
                    "SFTP: no readable known_hosts at {}; proceeding without verification",
                    known_hosts_path.display()
                );
            }
            Ok(())
        }
    }
}

/// OpenSSH-style `SHA256:<base64>` host key fingerprint.
fn fingerprint(session: &Session) -> String {
    match session.host_key_hash(HashType::Sha256) {
        Some(hash) => format_sha256(hash),
        None => "(fingerprint unavailable)".to_string(),
    }
}

fn format_sha256(hash: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(hash))
}
