//! SSH transport using russh library

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use log::debug;
use russh::client;
use russh::ChannelStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::timeout;

use crate::error::Error;

/// A single readiness deadline covers TCP connect, key exchange,
/// authentication and the `netconf` subsystem request.
const READY_TIMEOUT: Duration = Duration::from_secs(20);

/// NETCONF over SSH using russh library
pub struct SshTransport {
    stream: Pin<Box<ChannelStream<client::Msg>>>,
    // keeps the SSH connection task alive as long as the channel
    _handle: client::Handle<ClientHandler>,
}

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true) // Accept all server keys for now
    }
}

impl SshTransport {
    /// Connect using username and password and start the `netconf`
    /// subsystem, yielding a duplex byte channel.
    pub async fn connect(
        host: &str,
        port: u16,
        user_name: &str,
        password: &str,
    ) -> Result<SshTransport, Error> {
        timeout(READY_TIMEOUT, SshTransport::open(host, port, user_name, password))
            .await
            .map_err(|_| Error::Timeout("SSH session ready"))?
    }

    async fn open(
        host: &str,
        port: u16,
        user_name: &str,
        password: &str,
    ) -> Result<SshTransport, Error> {
        let config = client::Config {
            // notification streams are long-lived; never idle out
            inactivity_timeout: None,
            ..<_>::default()
        };
        let config = Arc::new(config);
        let handler = ClientHandler;

        debug!("connecting to {}:{}", host, port);
        let mut session = client::connect(config, (host, port), handler).await?;

        let auth_result = session.authenticate_password(user_name, password).await?;
        if !auth_result.success() {
            return Err(Error::Transport("authentication failed".to_owned()));
        }

        let channel = session.channel_open_session().await?;
        channel.request_subsystem(true, "netconf").await?;
        debug!("netconf subsystem ready on {}:{}", host, port);

        Ok(SshTransport {
            stream: Box::pin(channel.into_stream()),
            _handle: session,
        })
    }
}

impl AsyncRead for SshTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for SshTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.stream.as_mut().poll_shutdown(cx)
    }
}
