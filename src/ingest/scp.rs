//! The legacy `scp -t` / `scp -f` protocol, driven by bytes in and bytes out.
//!
//! The remote side of `scp` is a program speaking a line protocol over the SSH channel:
//!
//! - `C<mode> <size> <name>\n` announces a file, followed by `size` bytes and `\0`
//! - `D<mode> 0 <name>\n` / `E\n` enter and leave a directory (`-r` only)
//! - `T<mtime> 0 <atime> 0\n` carries timestamps (`-p`)
//!
//! Every record is acknowledged with `\0`, or `\x01message\n` (warning) /
//! `\x02message\n` (fatal). [`ScpSession`] implements the remote side against an
//! [`IngestService`], so it can be exercised without any SSH transport.

use std::collections::VecDeque;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use super::service::{ArtifactReader, IngestService, Located, Upload, join_raw};
use crate::error::{Error, Result};
use crate::store::CanonicalPath;

const ACK: u8 = 0;
const WARNING: u8 = 1;
const FATAL: u8 = 2;

/// Longest control record accepted, newline included.
const MAX_RECORD_LEN: usize = 4096;
/// Largest piece of a file body handed out by [`ScpSession::read_body`].
const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpMode {
    /// `scp -t`: the client uploads.
    Sink,
    /// `scp -f`: the client downloads.
    Source,
}

/// The `scp` command line a client asks the server to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpCommand {
    pub mode: ScpMode,
    pub recursive: bool,
    pub target_is_dir: bool,
    pub path: String,
}

impl ScpCommand {
    pub fn parse(command: &str) -> Result<Self> {
        let args = split_args(command);
        let mut args = args.iter().map(String::as_str);

        if args.next() != Some("scp") {
            return Err(Error::BadRequest(format!("only scp is supported, got {command:?}")));
        }

        let mut mode = None;
        let mut recursive = false;
        let mut target_is_dir = false;
        let mut paths = Vec::new();
        let mut options_done = false;

        for arg in args {
            if options_done || !arg.starts_with('-') || arg == "-" {
                paths.push(arg);
                continue;
            }
            if arg == "--" {
                options_done = true;
                continue;
            }
            for flag in arg[1..].chars() {
                match flag {
                    't' => mode = Some(ScpMode::Sink),
                    'f' => mode = Some(ScpMode::Source),
                    'r' => recursive = true,
                    'd' => target_is_dir = true,
                    'p' | 'v' | 'q' | 'E' => {}
                    other => {
                        return Err(Error::BadRequest(format!("unsupported scp flag -{other}")));
                    }
                }
            }
        }

        let mode = mode.ok_or_else(|| Error::BadRequest("scp needs -t or -f".to_string()))?;
        if paths.is_empty() {
            return Err(Error::BadRequest("scp needs a path".to_string()));
        }

        Ok(Self {
            mode,
            recursive,
            target_is_dir,
            path: paths.join(" "),
        })
    }
}

/// Splits a command line on whitespace, honouring single and double quotes.
fn split_args(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_arg = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_arg {
                    args.push(mem::take(&mut current));
                    in_arg = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

enum Outgoing {
    Line(String),
    /// Body of a file found while walking a directory, opened when its turn comes.
    File(Located),
    /// Body of the single file a non-recursive download asked for.
    Open(ArtifactReader),
    Warning(String),
}

struct Body {
    file: ArtifactReader,
    remaining: u64,
}

enum State {
    AwaitRecord,
    ReceiveData {
        upload: Option<Upload>,
        remaining: u64,
        error: Option<String>,
    },
    AwaitDataEnd {
        upload: Option<Upload>,
        error: Option<String>,
    },
    Sending(VecDeque<Outgoing>),
    Done,
}

/// One `scp` invocation on one channel.
pub struct ScpSession {
    service: Arc<IngestService>,
    owner: String,
    command: ScpCommand,
    state: State,
    dirs: Vec<String>,
    input: Vec<u8>,
    body: Option<Body>,
    failed: bool,
}

impl ScpSession {
    pub fn new(service: Arc<IngestService>, owner: impl Into<String>, command: ScpCommand) -> Self {
        Self {
            service,
            owner: owner.into(),
            command,
            state: State::AwaitRecord,
            dirs: Vec::new(),
            input: Vec::new(),
            body: None,
            failed: false,
        }
    }

    /// Bytes to send as soon as the command starts.
    pub async fn start(&mut self) -> Vec<u8> {
        match self.command.mode {
            ScpMode::Sink => {
                info!("{} uploading to {}", self.owner, self.command.path);
                vec![ACK]
            }
            ScpMode::Source => {
                info!("{} downloading {}", self.owner, self.command.path);
                let queue = match self.source_queue().await {
                    Ok(queue) => queue,
                    Err(e) => {
                        warn!("Refusing download of {}: {e}", self.command.path);
                        self.failed = true;
                        VecDeque::from([Outgoing::Warning(format!("{}: {e}", self.command.path))])
                    }
                };
                self.state = State::Sending(queue);
                Vec::new()
            }
        }
    }

    /// Consumes client bytes and returns the reply. When the reply starts a file body,
    /// the body follows through [`ScpSession::read_body`].
    pub async fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        self.input.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            let progressed = match self.command.mode {
                ScpMode::Sink => self.step_sink(&mut out).await,
                ScpMode::Source => self.step_source(&mut out).await,
            };
            if !progressed {
                break;
            }
        }

        out
    }

    /// The next piece of the file body being sent, at most `CHUNK_SIZE` bytes. The
    /// piece after the last byte is the closing `\0`. `None` when no body is in flight.
    pub async fn read_body(&mut self) -> Option<Vec<u8>> {
        let mut body = self.body.take()?;
        if body.remaining == 0 {
            return Some(vec![ACK]);
        }

        let wanted = usize::try_from(body.remaining).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
        let mut chunk = vec![0; wanted];
        let failure = match body.file.reader.read(&mut chunk).await {
            Ok(0) => format!("{} shrank while sending", body.file.canonical),
            Ok(n) => {
                chunk.truncate(n);
                body.remaining -= n as u64;
                self.body = Some(body);
                return Some(chunk);
            }
            Err(e) => format!("{}: {e}", body.file.canonical),
        };

        let mut out = Vec::new();
        self.fatal(&mut out, &failure);
        Some(out)
    }

    /// Called when the client closes its side. Returns the exit status.
    pub fn finish(&mut self) -> u32 {
        if self.body.take().is_some() {
            self.failed = true;
        }
        match mem::replace(&mut self.state, State::Done) {
            State::ReceiveData { upload, .. } | State::AwaitDataEnd { upload, .. } => {
                if let Some(upload) = upload {
                    warn!("Upload of {} interrupted", upload.canonical());
                    upload.abort();
                }
                self.failed = true;
            }
            State::Sending(queue) if !queue.is_empty() => self.failed = true,
            _ => {}
        }
        self.exit_status()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    #[must_use]
    pub fn exit_status(&self) -> u32 {
        u32::from(self.failed)
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self
            .input
            .iter()
            .take(MAX_RECORD_LEN)
            .position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.input.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned())
    }

    /// After [`Self::take_line`] came back empty: no record can end in what is buffered.
    fn line_overflowed(&self) -> bool {
        self.input.len() >= MAX_RECORD_LEN
    }

    fn current_base(&self) -> String {
        self.dirs
            .last()
            .cloned()
            .unwrap_or_else(|| self.command.path.clone())
    }

    fn fatal(&mut self, out: &mut Vec<u8>, message: &str) {
        warn!("scp protocol failure: {message}");
        push_message(out, FATAL, message);
        self.failed = true;
        self.state = State::Done;
    }

    async fn step_sink(&mut self, out: &mut Vec<u8>) -> bool {
        match mem::replace(&mut self.state, State::Done) {
            State::AwaitRecord => {
                let Some(line) = self.take_line() else {
                    if self.line_overflowed() {
                        self.fatal(out, "record line too long");
                    } else {
                        self.state = State::AwaitRecord;
                    }
                    return false;
                };
                self.state = State::AwaitRecord;
                self.handle_record(&line, out).await;
                true
            }
            State::ReceiveData {
                mut upload,
                remaining,
                mut error,
            } => {
                if remaining == 0 {
                    self.state = State::AwaitDataEnd { upload, error };
                    return true;
                }
                if self.input.is_empty() {
                    self.state = State::ReceiveData {
                        upload,
                        remaining,
                        error,
                    };
                    return false;
                }

                let take = remaining.min(self.input.len() as u64) as usize;
                let chunk: Vec<u8> = self.input.drain(..take).collect();

                if let Some(current) = upload.as_mut() {
                    if let Err(e) = current.write_all(&chunk).await {
                        error = Some(format!("{}: {e}", current.canonical()));
                        if let Some(failed) = upload.take() {
                            failed.abort();
                        }
                    }
                }

                self.state = State::ReceiveData {
                    upload,
                    remaining: remaining - take as u64,
                    error,
                };
                true
            }
            State::AwaitDataEnd { upload, mut error } => {
                match self.input.first() {
                    None => {
                        self.state = State::AwaitDataEnd { upload, error };
                        return false;
                    }
                    Some(&ACK) => {
                        self.input.remove(0);
                    }
                    Some(_) => {
                        let Some(line) = self.take_line() else {
                            if self.line_overflowed() {
                                self.fatal(out, "record line too long");
                            } else {
                                self.state = State::AwaitDataEnd { upload, error };
                            }
                            return false;
                        };
                        let reason = line.get(1..).unwrap_or_default().to_string();
                        error.get_or_insert(format!("client aborted: {reason}"));
                    }
                }

                self.state = State::AwaitRecord;
                self.complete_upload(upload, error, out).await;
                true
            }
            State::Sending(queue) => {
                self.state = State::Sending(queue);
                false
            }
            State::Done => false,
        }
    }

    async fn complete_upload(
        &mut self,
        upload: Option<Upload>,
        error: Option<String>,
        out: &mut Vec<u8>,
    ) {
        match (upload, error) {
            (Some(upload), None) => match upload.finish().await {
                Ok(stored) => {
                    info!("Stored {stored} for {}", self.owner);
                    out.push(ACK);
                }
                Err(e) => {
                    self.failed = true;
                    push_message(out, WARNING, &e.to_string());
                }
            },
            (upload, error) => {
                if let Some(upload) = upload {
                    upload.abort();
                }
                self.failed = true;
                let message = error.unwrap_or_else(|| "upload failed".to_string());
                warn!("Upload failed: {message}");
                push_message(out, WARNING, &message);
            }
        }
    }

    async fn handle_record(&mut self, line: &str, out: &mut Vec<u8>) {
        let Some(kind) = line.chars().next() else {
            return self.fatal(out, "empty record");
        };

        match kind {
            'C' => match parse_record(line) {
                Some((size, name)) => self.begin_upload(size, name, out).await,
                None => self.fatal(out, &format!("malformed record {line:?}")),
            },
            'D' => {
                if !self.command.recursive {
                    return self.fatal(out, "received a directory without -r");
                }
                match parse_record(line) {
                    Some((_, name)) if is_plain_name(name) => {
                        let base = self.current_base();
                        let dir = if self.command.target_is_dir && self.dirs.is_empty() {
                            join_raw(&base, name)
                        } else {
                            self.service.enter_directory(&base, name).await
                        };
                        if let Err(e) = self.service.create_directory(&dir, &self.owner).await {
                            return self.fatal(out, &format!("{name}: {e}"));
                        }
                        self.dirs.push(dir);
                        out.push(ACK);
                    }
                    _ => self.fatal(out, &format!("malformed record {line:?}")),
                }
            }
            'E' => {
                if self.dirs.pop().is_none() {
                    return self.fatal(out, "unbalanced directory end");
                }
                out.push(ACK);
            }
            'T' => out.push(ACK),
            '\u{1}' | '\u{2}' => {
                warn!("Client reported: {}", &line[1..]);
                if kind == '\u{2}' {
                    self.failed = true;
                    self.state = State::Done;
                }
            }
            _ => self.fatal(out, &format!("unexpected record {line:?}")),
        }
    }

    async fn begin_upload(&mut self, size: u64, name: &str, out: &mut Vec<u8>) {
        let base = self.current_base();

        // Inside a directory record, or with -d, the target is a directory by contract.
        let target = if self.command.target_is_dir || !self.dirs.is_empty() {
            self.service.target_in_directory(&base, name).await
        } else {
            self.service.choose_target_name(&base, name).await
        };
        let upload = match target {
            Ok(target) => self.service.create(&target, &self.owner).await,
            Err(e) => Err(e),
        };

        match upload {
            Ok(upload) => {
                out.push(ACK);
                self.state = State::ReceiveData {
                    upload: Some(upload),
                    remaining: size,
                    error: None,
                };
            }
            Err(e) => {
                warn!("Rejecting {name} sent to {base}: {e}");
                self.failed = true;
                push_message(out, WARNING, &format!("{name}: {e}"));
            }
        }
    }

    async fn step_source(&mut self, out: &mut Vec<u8>) -> bool {
        if self.body.is_some() {
            return false;
        }
        let State::Sending(mut queue) = mem::replace(&mut self.state, State::Done) else {
            return false;
        };

        // Warnings are not acknowledged by the client, so flush them right away.
        let mut sent_warning = false;
        while let Some(Outgoing::Warning(_)) = queue.front() {
            if let Some(Outgoing::Warning(message)) = queue.pop_front() {
                push_message(out, WARNING, &message);
                sent_warning = true;
            }
        }
        if queue.is_empty() && sent_warning {
            return false;
        }

        let Some(&response) = self.input.first() else {
            self.state = State::Sending(queue);
            return false;
        };

        if response != ACK {
            let Some(line) = self.take_line() else {
                if self.line_overflowed() {
                    self.fatal(out, "record line too long");
                } else {
                    self.state = State::Sending(queue);
                }
                return false;
            };
            warn!("Client refused transfer: {}", line.get(1..).unwrap_or_default());
            self.failed = true;
            if response == FATAL {
                return false;
            }
            if let Some(Outgoing::File(_) | Outgoing::Open(_)) = queue.front() {
                queue.pop_front();
            }
        } else {
            self.input.remove(0);
        }

        let Some(next) = queue.pop_front() else {
            return false;
        };

        match next {
            Outgoing::Line(line) => out.extend_from_slice(line.as_bytes()),
            Outgoing::Warning(message) => push_message(out, WARNING, &message),
            Outgoing::File(located) => match self.service.open_located(&located).await {
                Ok(file) => self.start_body(file),
                Err(e) => {
                    self.fatal(out, &format!("{}: {e}", located.canonical));
                    return false;
                }
            },
            Outgoing::Open(file) => self.start_body(file),
        }

        self.state = State::Sending(queue);
        true
    }

    fn start_body(&mut self, file: ArtifactReader) {
        self.body = Some(Body {
            remaining: file.size,
            file,
        });
    }

    async fn source_queue(&self) -> Result<VecDeque<Outgoing>> {
        let mut queue = VecDeque::new();

        if !self.command.recursive {
            let file = self.service.open_for_read(&self.command.path).await?;
            queue.push_back(file_line(file.canonical.file_name(), file.size));
            queue.push_back(Outgoing::Open(file));
            return Ok(queue);
        }

        let located = self.service.locate(&self.command.path).await?;
        if !located.is_dir {
            queue.push_back(file_line(located.canonical.file_name(), located.size));
            queue.push_back(Outgoing::File(located));
            return Ok(queue);
        }

        enum Walk {
            Enter(PathBuf, String, CanonicalPath),
            Exit,
        }

        let name = located.canonical.file_name().to_string();
        let mut stack = vec![Walk::Enter(located.path, name, located.canonical)];

        while let Some(step) = stack.pop() {
            let (dir, name, canonical_dir) = match step {
                Walk::Exit => {
                    queue.push_back(Outgoing::Line("E\n".to_string()));
                    continue;
                }
                Walk::Enter(dir, name, canonical_dir) => (dir, name, canonical_dir),
            };

            queue.push_back(Outgoing::Line(format!("D0755 0 {name}\n")));
            stack.push(Walk::Exit);

            let mut files = Vec::new();
            let mut subdirs = Vec::new();
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let Ok(entry_name) = entry.file_name().into_string() else {
                    continue;
                };
                let metadata = fs::metadata(entry.path()).await?;
                if metadata.is_dir() {
                    subdirs.push((entry_name, entry.path()));
                } else if metadata.is_file() {
                    files.push((entry_name, entry.path(), metadata.len()));
                }
            }
            files.sort();
            subdirs.sort();

            for (file_name, path, size) in files {
                let Ok(canonical) = canonical_dir.join(&file_name) else {
                    continue;
                };
                queue.push_back(file_line(&file_name, size));
                queue.push_back(Outgoing::File(Located {
                    canonical,
                    path,
                    is_dir: false,
                    size,
                }));
            }
            for (dir_name, path) in subdirs.into_iter().rev() {
                if let Ok(canonical) = canonical_dir.join(&dir_name) {
                    stack.push(Walk::Enter(path, dir_name, canonical));
                }
            }
        }

        Ok(queue)
    }
}

fn file_line(name: &str, size: u64) -> Outgoing {
    Outgoing::Line(format!("C0644 {size} {name}\n"))
}

fn push_message(out: &mut Vec<u8>, level: u8, message: &str) {
    out.push(level);
    out.extend_from_slice(b"scp: ");
    out.extend_from_slice(message.replace('\n', " ").as_bytes());
    out.push(b'\n');
}

/// Parses `C0644 123 name` / `D0755 0 name` into size and name.
fn parse_record(line: &str) -> Option<(u64, &str)> {
    let mut parts = line[1..].splitn(3, ' ');
    let mode = parts.next()?;
    let size = parts.next()?.parse().ok()?;
    let name = parts.next()?;

    if mode.len() != 4 || !mode.chars().all(|c| c.is_digit(8)) {
        return None;
    }
    if !is_plain_name(name) {
        return None;
    }
    Some((size, name))
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PathResolver;
    use tempfile::TempDir;

    const NVRA: &str = "java-1.8.0-openjdk-1.8.0.242.b08-0.fc30.x86_64.rpm";
    const BASE: &str = "java-1.8.0-openjdk/1.8.0.242.b08/0.fc30";

    fn service(temp: &TempDir) -> Arc<IngestService> {
        Arc::new(IngestService::new(temp.path(), PathResolver::default()))
    }

    async fn sink(service: &Arc<IngestService>, command: &str) -> ScpSession {
        let mut session =
            ScpSession::new(service.clone(), "tester", ScpCommand::parse(command).unwrap());
        assert_eq!(session.start().await, [ACK]);
        session
    }

    /// Feeds `input` and collects the reply along with any file body it started.
    async fn exchange(session: &mut ScpSession, input: &[u8]) -> Vec<u8> {
        let mut out = session.feed(input).await;
        while let Some(chunk) = session.read_body().await {
            out.extend(chunk);
        }
        out
    }

    async fn feed_all_acked(session: &mut ScpSession, records: &[&[u8]]) {
        for record in records {
            let reply = session.feed(record).await;
            assert!(
                reply.iter().all(|&b| b == ACK),
                "unexpected reply {:?}",
                String::from_utf8_lossy(&reply)
            );
        }
    }

    #[test]
    fn test_parse_command() {
        let command = ScpCommand::parse("scp -r -d -t -- 'some dir/x'").unwrap();
        assert_eq!(command.mode, ScpMode::Sink);
        assert!(command.recursive);
        assert!(command.target_is_dir);
        assert_eq!(command.path, "some dir/x");

        let command = ScpCommand::parse("scp -pf foo").unwrap();
        assert_eq!(command.mode, ScpMode::Source);
        assert!(!command.recursive);

        assert!(ScpCommand::parse("rm -rf /").is_err());
        assert!(ScpCommand::parse("scp -t").is_err());
        assert!(ScpCommand::parse("scp foo").is_err());
        assert!(ScpCommand::parse("scp -x -t foo").is_err());
    }

    #[tokio::test]
    async fn test_upload_single_file() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -t {NVRA}")).await;

        assert_eq!(session.feed(format!("C0644 5 {NVRA}\n").as_bytes()).await, [ACK]);
        assert!(session.feed(b"hel").await.is_empty());
        assert_eq!(session.feed(b"lo\0").await, [ACK]);
        assert_eq!(session.finish(), 0);

        let stored = temp.path().join(BASE).join("x86_64").join(NVRA);
        assert_eq!(std::fs::read(stored).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_upload_records_in_one_packet() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -p -t garbage/{NVRA}/logs")).await;

        let mut packet = b"T1580000000 0 1580000000 0\n".to_vec();
        packet.extend_from_slice(b"C0644 3 build.log\nlog\0");
        packet.extend_from_slice(b"C0644 0 empty.log\n\0");
        assert_eq!(session.feed(&packet).await, [ACK, ACK, ACK, ACK, ACK]);
        assert_eq!(session.finish(), 0);

        let logs = temp.path().join(BASE).join("data/logs/x86_64");
        assert_eq!(std::fs::read(logs.join("build.log")).unwrap(), b"log");
        assert!(logs.join("empty.log").is_file());
    }

    #[tokio::test]
    async fn test_conflicting_upload_is_refused() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let target = format!("{NVRA}/data/readme.txt");

        let mut first = sink(&service, &format!("scp -t {target}")).await;
        first.feed(b"C0644 2 readme.txt\nv1\0").await;
        assert_eq!(first.finish(), 0);

        let mut second = sink(&service, &format!("scp -t {target}")).await;
        let reply = second.feed(b"C0644 2 readme.txt\n").await;
        assert_eq!(reply[0], WARNING);
        assert!(String::from_utf8_lossy(&reply).contains("already exists"));
        assert_eq!(second.finish(), 1);

        let stored = temp.path().join(BASE).join("data/readme.txt");
        assert_eq!(std::fs::read(stored).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_malformed_target_is_refused_per_file() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, "scp -t incoming").await;

        let reply = session.feed(b"C0644 1 not-a-valid-name\n").await;
        assert_eq!(reply[0], WARNING);

        // the session keeps going for the next file
        let reply = session.feed(format!("C0644 1 {NVRA}\nx\0").as_bytes()).await;
        assert_eq!(reply, [ACK, ACK]);
        assert_eq!(session.finish(), 1);
    }

    #[tokio::test]
    async fn test_recursive_upload_of_data_zone() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -r -t {NVRA}")).await;

        let records: &[&[u8]] = &[
            b"D0755 0 data\n",
            b"C0644 2 readme\nhi\0",
            b"D0755 0 logs\n",
            b"D0755 0 x86_64\n",
            b"C0644 3 build.log\nlog\0",
            b"E\n",
            b"E\n",
            b"E\n",
        ];
        feed_all_acked(&mut session, records).await;
        assert_eq!(session.finish(), 0);

        let base = temp.path().join(BASE);
        assert_eq!(std::fs::read(base.join("data/readme")).unwrap(), b"hi");
        assert_eq!(
            std::fs::read(base.join("data/logs/x86_64/build.log")).unwrap(),
            b"log"
        );
    }

    #[tokio::test]
    async fn test_recursive_upload_of_plain_directories() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -r -t {NVRA}")).await;

        let records: &[&[u8]] = &[
            b"D0755 0 docs\n",
            b"C0644 1 a.txt\na\0",
            b"C0644 1 b.txt\nb\0",
            b"D0755 0 api\n",
            b"C0644 1 c.txt\nc\0",
            b"E\n",
            b"D0755 0 empty\n",
            b"E\n",
            b"E\n",
        ];
        feed_all_acked(&mut session, records).await;
        assert_eq!(session.finish(), 0);

        let docs = temp.path().join(BASE).join("x86_64/docs");
        assert_eq!(std::fs::read(docs.join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(docs.join("b.txt")).unwrap(), b"b");
        assert_eq!(std::fs::read(docs.join("api/c.txt")).unwrap(), b"c");
        assert!(docs.join("empty").is_dir());
    }

    #[tokio::test]
    async fn test_recursive_upload_into_new_name() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let records: &[&[u8]] = &[
            b"D0755 0 docs\n",
            b"C0644 1 a.txt\na\0",
            b"C0644 1 b.txt\nb\0",
            b"E\n",
        ];

        let mut session = sink(&service, &format!("scp -r -t {NVRA}/renamed")).await;
        feed_all_acked(&mut session, records).await;
        assert_eq!(session.finish(), 0);

        let renamed = temp.path().join(BASE).join("x86_64/renamed");
        assert_eq!(std::fs::read(renamed.join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(renamed.join("b.txt")).unwrap(), b"b");

        // the same copy again lands inside the now existing directory
        let mut session = sink(&service, &format!("scp -r -t {NVRA}/renamed")).await;
        feed_all_acked(&mut session, records).await;
        assert_eq!(session.finish(), 0);
        assert_eq!(std::fs::read(renamed.join("docs/b.txt")).unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_target_directory_flag() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -d -t {NVRA}/extras")).await;

        feed_all_acked(&mut session, &[b"C0644 1 one\n1\0", b"C0644 1 two\n2\0"]).await;
        assert_eq!(session.finish(), 0);

        let extras = temp.path().join(BASE).join("x86_64/extras");
        assert_eq!(std::fs::read(extras.join("one")).unwrap(), b"1");
        assert_eq!(std::fs::read(extras.join("two")).unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_endless_record_line_is_fatal() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -t {NVRA}")).await;

        let mut reply = session.feed(b"C0644 1 ").await;
        let garbage = vec![b'x'; 1024];
        for _ in 0..8 {
            if session.is_done() {
                break;
            }
            reply.extend(session.feed(&garbage).await);
        }

        assert!(session.is_done());
        assert_eq!(reply[0], FATAL);
        assert_eq!(session.finish(), 1);
    }

    #[tokio::test]
    async fn test_directory_without_recursive_flag_is_fatal() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -t {NVRA}")).await;

        let reply = session.feed(b"D0755 0 data\n").await;
        assert_eq!(reply[0], FATAL);
        assert!(session.is_done());
    }

    #[tokio::test]
    async fn test_interrupted_upload_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let mut session = sink(&service, &format!("scp -t {NVRA}")).await;

        session.feed(format!("C0644 10 {NVRA}\nabc").as_bytes()).await;
        assert_eq!(session.finish(), 1);
        assert!(!temp.path().join(BASE).join("x86_64").join(NVRA).exists());
    }

    #[tokio::test]
    async fn test_download_single_file() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let stored = temp.path().join(BASE).join("x86_64");
        std::fs::create_dir_all(&stored).unwrap();
        std::fs::write(stored.join(NVRA), b"payload").unwrap();

        let command = ScpCommand::parse(&format!("scp -f {NVRA}")).unwrap();
        let mut session = ScpSession::new(service, "tester", command);
        assert!(session.start().await.is_empty());

        let header = exchange(&mut session, &[ACK]).await;
        assert_eq!(header, format!("C0644 7 {NVRA}\n").as_bytes());
        assert_eq!(exchange(&mut session, &[ACK]).await, b"payload\0");
        assert!(exchange(&mut session, &[ACK]).await.is_empty());
        assert!(session.is_done());
        assert_eq!(session.finish(), 0);
    }

    #[tokio::test]
    async fn test_download_streams_large_file_in_chunks() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let stored = temp.path().join(BASE).join("x86_64");
        std::fs::create_dir_all(&stored).unwrap();
        let content: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(stored.join(NVRA), &content).unwrap();

        let command = ScpCommand::parse(&format!("scp -f {NVRA}")).unwrap();
        let mut session = ScpSession::new(service, "tester", command);
        session.start().await;
        session.feed(&[ACK]).await;

        assert!(session.feed(&[ACK]).await.is_empty());
        let mut received = Vec::new();
        let mut pieces = 0;
        while let Some(chunk) = session.read_body().await {
            assert!(chunk.len() <= CHUNK_SIZE);
            received.extend(chunk);
            pieces += 1;
        }
        assert!(pieces >= 5, "sent in {pieces} pieces");
        assert_eq!(received.pop(), Some(ACK));
        assert_eq!(received, content);
    }

    #[tokio::test]
    async fn test_download_logs_recursively() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let logs = temp.path().join(BASE).join("data/logs/x86_64");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("a.log"), b"a").unwrap();
        std::fs::write(logs.join("b.log"), b"bb").unwrap();

        let command = ScpCommand::parse(&format!("scp -r -f {NVRA}/logs")).unwrap();
        let mut session = ScpSession::new(service, "tester", command);
        session.start().await;

        let mut received = Vec::new();
        for _ in 0..7 {
            received.extend(exchange(&mut session, &[ACK]).await);
        }
        assert_eq!(
            String::from_utf8(received).unwrap(),
            "D0755 0 x86_64\nC0644 1 a.log\na\0C0644 2 b.log\nbb\0E\n"
        );
        assert!(exchange(&mut session, &[ACK]).await.is_empty());
        assert_eq!(session.finish(), 0);
    }

    #[tokio::test]
    async fn test_download_missing_file_warns() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let command = ScpCommand::parse(&format!("scp -f {NVRA}/data/missing")).unwrap();
        let mut session = ScpSession::new(service, "tester", command);
        session.start().await;

        let reply = session.feed(&[ACK]).await;
        assert_eq!(reply[0], WARNING);
        assert_eq!(session.finish(), 1);
    }

    #[test]
    fn test_parse_record() {
        assert_eq!(parse_record("C0644 12 a file.txt"), Some((12, "a file.txt")));
        assert_eq!(parse_record("D0755 0 data"), Some((0, "data")));
        assert_eq!(parse_record("C0644 12 ../escape"), None);
        assert_eq!(parse_record("C0944 1 x"), None);
        assert_eq!(parse_record("C0644 x y"), None);
    }
}
