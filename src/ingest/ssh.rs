use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::server::{Auth, Config, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet};
use russh_keys::PublicKeyBase64;
use russh_keys::key::{KeyPair, PublicKey};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::scp::{ScpCommand, ScpSession};
use super::service::IngestService;
use crate::auth::AuthorizedKeys;
use crate::error::{Error, Result};

const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3600);
const AUTH_REJECTION_DELAY: Duration = Duration::from_secs(1);
/// Client packets buffered per channel before the connection stops reading.
const CHANNEL_BACKLOG: usize = 16;

pub fn load_host_key(path: &Path) -> Result<KeyPair> {
    russh_keys::load_secret_key(path, None)
        .map_err(|e| Error::Config(format!("cannot load host key {}: {e}", path.display())))
}

/// SSH endpoint that only runs `scp` against the repository.
pub struct ScpServer {
    ingest: Arc<IngestService>,
    keys: Arc<AuthorizedKeys>,
    config: Arc<Config>,
}

impl ScpServer {
    pub fn new(ingest: Arc<IngestService>, keys: AuthorizedKeys, host_key: KeyPair) -> Self {
        let config = Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            auth_rejection_time: AUTH_REJECTION_DELAY,
            auth_rejection_time_initial: Some(Duration::ZERO),
            methods: MethodSet::PUBLICKEY,
            keys: vec![host_key],
            ..Default::default()
        };

        Self {
            ingest,
            keys: Arc::new(keys),
            config: Arc::new(config),
        }
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("SCP endpoint listening on {}", listener.local_addr()?);

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept SSH connection: {e}");
                    continue;
                }
            };

            let handler = ScpHandler {
                ingest: self.ingest.clone(),
                keys: self.keys.clone(),
                peer,
                user: None,
                channels: HashMap::new(),
            };
            let config = self.config.clone();

            tokio::spawn(async move {
                let session = match russh::server::run_stream(config, socket, handler).await {
                    Ok(session) => session,
                    Err(e) => {
                        warn!("SSH handshake with {peer} failed: {e}");
                        return;
                    }
                };
                if let Err(e) = session.await {
                    debug!("SSH connection from {peer} ended: {e}");
                }
            });
        }
    }
}

struct ScpHandler {
    ingest: Arc<IngestService>,
    keys: Arc<AuthorizedKeys>,
    peer: SocketAddr,
    user: Option<String>,
    /// Client input of each running `scp`, consumed by its [`run_scp`] task.
    channels: HashMap<ChannelId, mpsc::Sender<Vec<u8>>>,
}

impl ScpHandler {
    fn check_key(&self, user: &str, key: &PublicKey) -> Auth {
        if self.keys.is_authorized(user, &key.public_key_base64()) {
            Auth::Accept
        } else {
            Auth::Reject {
                proceed_with_methods: None,
            }
        }
    }

    fn close_channel(session: &mut Session, channel: ChannelId, exit_status: u32) {
        session.exit_status_request(channel, exit_status);
        session.eof(channel);
        session.close(channel);
    }
}

#[async_trait]
impl Handler for ScpHandler {
    type Error = Error;

    async fn auth_publickey_offered(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        Ok(self.check_key(user, public_key))
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        let auth = self.check_key(user, public_key);
        match auth {
            Auth::Accept => {
                info!("{user} authenticated from {}", self.peer);
                self.user = Some(user.to_string());
            }
            _ => {
                let failure = Error::AuthenticationFailure(format!("{user} from {}", self.peer));
                warn!("{failure}");
            }
        }
        Ok(auth)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        let command = String::from_utf8_lossy(data);
        let owner = self.user.clone().unwrap_or_default();
        session.channel_success(channel);

        let parsed = match ScpCommand::parse(&command) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Refusing {command:?} from {owner}: {e}");
                let message = format!("fakekoji: {e}\n").into_bytes();
                session.extended_data(channel, 1, CryptoVec::from(message));
                Self::close_channel(session, channel, 1);
                return Ok(());
            }
        };

        let scp = ScpSession::new(self.ingest.clone(), owner, parsed);
        let (input, receiver) = mpsc::channel(CHANNEL_BACKLOG);
        self.channels.insert(channel, input);
        tokio::spawn(run_scp(scp, session.handle(), channel, receiver));
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<()> {
        let Some(input) = self.channels.get(&channel) else {
            return Ok(());
        };
        if input.send(data.to_vec()).await.is_err() {
            self.channels.remove(&channel);
        }
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        self.channels.remove(&channel);
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        self.channels.remove(&channel);
        Ok(())
    }
}

/// Drives one `scp` until it is done or the client stops sending, then reports the
/// exit status and closes the channel.
async fn run_scp(
    mut scp: ScpSession,
    handle: Handle,
    channel: ChannelId,
    mut input: mpsc::Receiver<Vec<u8>>,
) {
    let reply = scp.start().await;
    let mut open = send_reply(&handle, channel, &mut scp, reply).await;

    while open && !scp.is_done() {
        let Some(data) = input.recv().await else {
            break;
        };
        let reply = scp.feed(&data).await;
        open = send_reply(&handle, channel, &mut scp, reply).await;
    }

    let status = scp.finish();
    if handle.exit_status_request(channel, status).await.is_err() {
        debug!("Channel {channel:?} went away before scp exited with {status}");
        return;
    }
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

/// Sends `reply`, then any file body it started. False once the channel is gone.
async fn send_reply(
    handle: &Handle,
    channel: ChannelId,
    scp: &mut ScpSession,
    reply: Vec<u8>,
) -> bool {
    if !reply.is_empty() && handle.data(channel, CryptoVec::from(reply)).await.is_err() {
        return false;
    }
    while let Some(chunk) = scp.read_body().await {
        if handle.data(channel, CryptoVec::from(chunk)).await.is_err() {
            return false;
        }
    }
    true
}
