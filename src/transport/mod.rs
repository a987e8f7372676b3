//! Transports for NETCONF

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(feature = "ssh")]
pub mod ssh;

/// A NETCONF transport: a duplex byte pipe between the client and the
/// server's `netconf` subsystem. The transport neither frames nor parses
/// payload; framing and XML handling happen above it.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}
