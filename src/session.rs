//! NETCONF session engine
//!
//! A [`Session`] owns the transport, runs the hello handshake, assigns
//! `message-id`s, and demultiplexes incoming messages: one reader task
//! drains the framer and routes each decoded message to the request that
//! registered for its `message-id`, or fans `notification` messages out to
//! streaming requests. Requests register before their bytes hit the wire,
//! so a reply can never race its waiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, trace};
use serde_derive::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{DebugLevel, DebugSink};
use crate::error::Error;
use crate::frame::{MessageFramer, DELIMITER};
use crate::stream::Replies;
use crate::transport::Transport;
use crate::value::{Map, Value, ATTRIBUTES};
use crate::xml::{self, MessageKind};

/// Guard for SSH readiness, the hello handshake, the first reply of every
/// request and the close-session exchange. Notification streams have none.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Options handed from the client to the session engine.
#[derive(Clone, Default)]
pub struct SessionOptions {
    pub ignore_attributes: bool,
    pub debug: Option<DebugSink>,
}

/// A raw message paired with its decoded tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub xml: String,
    pub result: Value,
}

pub(crate) struct Waiter {
    pub(crate) tx: mpsc::UnboundedSender<Result<Envelope, Error>>,
    pub(crate) streaming: bool,
    pub(crate) replied: bool,
}

#[derive(Default)]
pub(crate) struct Router {
    pub(crate) closed: Option<Error>,
    pub(crate) waiters: HashMap<u64, Waiter>,
}

/// Diagnostics fan-out: the `log` facade plus the configured sink.
#[derive(Clone, Default)]
pub(crate) struct Diag(Option<DebugSink>);

impl Diag {
    fn emit(&self, level: DebugLevel, message: &str) {
        match level {
            DebugLevel::Info => info!("{}", message),
            DebugLevel::Debug => debug!("{}", message),
            DebugLevel::Trace => trace!("{}", message),
        }
        if let Some(sink) = &self.0 {
            sink(message, level);
        }
    }

    pub(crate) fn info(&self, message: &str) {
        self.emit(DebugLevel::Info, message);
    }

    pub(crate) fn debug(&self, message: &str) {
        self.emit(DebugLevel::Debug, message);
    }

    pub(crate) fn trace(&self, message: &str) {
        self.emit(DebugLevel::Trace, message);
    }
}

/// An established NETCONF session over a byte transport.
pub struct Session {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    router: Arc<StdMutex<Router>>,
    next_message_id: AtomicU64,
    hello: Envelope,
    session_id: i64,
    reader: JoinHandle<()>,
    diag: Diag,
}

impl Session {
    /// Opens a session: sends the client hello, waits for a server hello
    /// carrying a `session-id`, and starts the reader task. The handshake
    /// is guarded by the 20 s timeout.
    pub async fn open(
        transport: impl Transport + 'static,
        options: SessionOptions,
    ) -> Result<Session, Error> {
        let diag = Diag(options.debug.clone());
        let (read_half, write_half) = tokio::io::split(transport);
        let mut writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);

        let hello_xml = xml::encode(&client_hello())?;
        write_message(&mut writer, &hello_xml).await?;
        diag.debug("sent client hello");

        let mut framer = MessageFramer::new();
        let hello = timeout(
            DEFAULT_TIMEOUT,
            read_hello(&mut reader, &mut framer, options.ignore_attributes),
        )
        .await
        .map_err(|_| Error::Timeout("server hello"))??;
        let session_id = hello
            .result
            .get("hello")
            .and_then(|h| h.get("session-id"))
            .and_then(Value::as_int)
            .ok_or_else(|| Error::Hello("server hello carries no session-id".to_owned()))?;
        diag.info(&format!("NETCONF session {} ready", session_id));

        let router = Arc::new(StdMutex::new(Router::default()));
        let reader = tokio::spawn(run_reader(
            reader,
            framer,
            router.clone(),
            options.ignore_attributes,
            diag.clone(),
        ));
        Ok(Session {
            writer: Mutex::new(writer),
            router,
            next_message_id: AtomicU64::new(1),
            hello,
            session_id,
            reader,
            diag,
        })
    }

    /// The server hello captured during the handshake.
    pub fn hello_envelope(&self) -> &Envelope {
        &self.hello
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.router.lock().map(|r| r.closed.is_some()).unwrap_or(true)
    }

    /// Wraps `body` in an `<rpc>` envelope with the next `message-id`,
    /// writes it, and returns the reply sequence. A streaming request
    /// keeps receiving notifications after its reply until cancelled.
    pub async fn send_request(&self, body: Value, streaming: bool) -> Result<Replies, Error> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let request_xml = xml::encode(&rpc_envelope(message_id, body))?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut router = self.router.lock().expect("router lock");
            if let Some(error) = &router.closed {
                return Err(error.clone());
            }
            router.waiters.insert(
                message_id,
                Waiter {
                    tx,
                    streaming,
                    replied: false,
                },
            );
        }
        self.diag
            .debug(&format!("sending rpc message-id={}", message_id));
        self.diag.trace(&request_xml);
        {
            let mut writer = self.writer.lock().await;
            if let Err(error) = write_message(&mut *writer, &request_xml).await {
                fail_waiters(&self.router, error.clone());
                return Err(error);
            }
        }

        // first-reply guard; notifications after the reply are not timed
        let router = self.router.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEFAULT_TIMEOUT).await;
            let mut router = router.lock().expect("router lock");
            let timed_out = router
                .waiters
                .get(&message_id)
                .is_some_and(|waiter| !waiter.replied);
            if timed_out {
                if let Some(waiter) = router.waiters.remove(&message_id) {
                    let _ = waiter.tx.send(Err(Error::Timeout("rpc reply")));
                }
            }
        });
        Ok(Replies::new(rx, self.router.clone(), message_id))
    }

    /// Orderly teardown: best-effort `close-session` RPC under the 20 s
    /// cap, then every pending waiter resolves with "SSH session closed".
    /// Idempotent against an already-closed session.
    pub async fn close(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Ok(());
        }
        self.diag.debug("closing NETCONF session");
        let mut body = Map::new();
        body.insert("close-session".to_owned(), Value::Null);
        match self.send_request(Value::Map(body), false).await {
            Ok(mut replies) => {
                let _ = timeout(DEFAULT_TIMEOUT, replies.next()).await;
            }
            Err(error) => debug!("close-session request failed: {}", error),
        }
        fail_waiters(&self.router, Error::SessionClosed);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        self.reader.abort();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn client_hello() -> Value {
    let mut attributes = Map::new();
    attributes.insert("xmlns".to_owned(), Value::Str(xml::BASE_NS.to_owned()));
    let mut capabilities = Map::new();
    capabilities.insert(
        "capability".to_owned(),
        Value::List(vec![
            Value::Str(xml::BASE_NS.to_owned()),
            Value::Str(xml::BASE_CAPABILITY.to_owned()),
        ]),
    );
    let mut hello = Map::new();
    hello.insert(ATTRIBUTES.to_owned(), Value::Map(attributes));
    hello.insert("capabilities".to_owned(), Value::Map(capabilities));
    let mut root = Map::new();
    root.insert("hello".to_owned(), Value::Map(hello));
    Value::Map(root)
}

fn rpc_envelope(message_id: u64, body: Value) -> Value {
    let mut attributes = Map::new();
    attributes.insert("xmlns".to_owned(), Value::Str(xml::BASE_NS.to_owned()));
    attributes.insert("message-id".to_owned(), Value::Str(message_id.to_string()));
    let mut rpc = Map::new();
    rpc.insert(ATTRIBUTES.to_owned(), Value::Map(attributes));
    if let Value::Map(entries) = body {
        for (key, value) in entries {
            rpc.insert(key, value);
        }
    }
    let mut root = Map::new();
    root.insert("rpc".to_owned(), Value::Map(rpc));
    Value::Map(root)
}

async fn write_message<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    message: &str,
) -> Result<(), Error> {
    writer.write_all(message.as_bytes()).await?;
    writer.write_all(DELIMITER).await?;
    writer.flush().await?;
    Ok(())
}

/// Accumulates frames until one parses as a hello. Any decode failure at
/// this stage is fatal for the handshake.
async fn read_hello<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    framer: &mut MessageFramer,
    ignore_attributes: bool,
) -> Result<Envelope, Error> {
    let mut buffer = [0u8; 8192];
    loop {
        while let Some(message) = framer.extract() {
            let text = String::from_utf8(message)
                .map_err(|_| Error::Hello("hello is not valid UTF-8".to_owned()))?;
            let text = text.trim().to_owned();
            let tree = xml::decode(&text, ignore_attributes)
                .map_err(|error| Error::Hello(error.to_string()))?;
            match xml::classify(&tree) {
                MessageKind::Hello => return Ok(Envelope { xml: text, result: tree }),
                _ => debug!("ignoring pre-hello message"),
            }
        }
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            return Err(Error::Hello("connection closed before hello".to_owned()));
        }
        framer.append(&buffer[..n])?;
    }
}

async fn run_reader(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    mut framer: MessageFramer,
    router: Arc<StdMutex<Router>>,
    ignore_attributes: bool,
    diag: Diag,
) {
    // frames buffered behind the hello are already complete
    while let Some(message) = framer.extract() {
        route_message(message, &router, ignore_attributes, &diag);
    }
    let mut buffer = [0u8; 8192];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                fail_waiters(&router, Error::SessionClosed);
                return;
            }
            Ok(n) => {
                if let Err(error) = framer.append(&buffer[..n]) {
                    fail_waiters(&router, error);
                    return;
                }
                while let Some(message) = framer.extract() {
                    route_message(message, &router, ignore_attributes, &diag);
                }
            }
            Err(error) => {
                fail_waiters(&router, Error::Transport(error.to_string()));
                return;
            }
        }
    }
}

/// Fatal path: every outstanding waiter resolves with the error and the
/// session transitions to closed, exactly once.
fn fail_waiters(router: &Arc<StdMutex<Router>>, error: Error) {
    let Ok(mut router) = router.lock() else { return };
    if router.closed.is_none() {
        router.closed = Some(error.clone());
    }
    for (_, waiter) in router.waiters.drain() {
        let _ = waiter.tx.send(Err(error.clone()));
    }
}

fn route_message(
    message: Vec<u8>,
    router: &Arc<StdMutex<Router>>,
    ignore_attributes: bool,
    diag: &Diag,
) {
    let text = match String::from_utf8(message) {
        Ok(text) => text.trim().to_owned(),
        Err(_) => {
            diag.debug("discarding non-UTF-8 frame");
            return;
        }
    };
    if text.is_empty() {
        return;
    }
    diag.trace(&text);

    // fast path: correlate replies by raw-text message-id before parsing
    if let Some(message_id) = xml::scan_message_id(&text) {
        let registered = router
            .lock()
            .map(|r| r.waiters.contains_key(&message_id))
            .unwrap_or(false);
        if !registered {
            diag.debug(&format!(
                "discarding rpc-reply with unmatched message-id {}",
                message_id
            ));
            return;
        }
        let outcome = xml::decode(&text, ignore_attributes).and_then(|tree| {
            match xml::reply_error(&tree) {
                Some(error) => Err(Error::Rpc(error)),
                None => Ok(tree),
            }
        });
        let Ok(mut router) = router.lock() else { return };
        let Some(waiter) = router.waiters.get_mut(&message_id) else {
            return;
        };
        let keep = waiter.streaming && outcome.is_ok();
        let item = outcome.map(|result| Envelope { xml: text, result });
        let _ = waiter.tx.send(item);
        if keep {
            waiter.replied = true;
        } else {
            router.waiters.remove(&message_id);
        }
        return;
    }

    match xml::decode(&text, ignore_attributes) {
        Ok(tree) if xml::classify(&tree) == MessageKind::Notification => {
            let Ok(router) = router.lock() else { return };
            let mut delivered = false;
            for waiter in router.waiters.values() {
                if waiter.streaming && waiter.replied {
                    let _ = waiter.tx.send(Ok(Envelope {
                        xml: text.clone(),
                        result: tree.clone(),
                    }));
                    delivered = true;
                }
            }
            if !delivered {
                diag.debug("discarding notification with no subscribers");
            }
        }
        Ok(_) => diag.debug("discarding unroutable message"),
        Err(error) => diag.debug(&format!("discarding undecodable message: {}", error)),
    }
}
