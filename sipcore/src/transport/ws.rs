//! SIP over WebSocket (RFC 7118), client side.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Uri};
use tokio_tungstenite::tungstenite::Message;

use super::{KEEPALIVE_REQUEST, KEEPALIVE_RESPONSE, SipTransport, TransportEvent};
use crate::error::{Error, Result};
use crate::timer::Timer;

/// A WebSocket server we may connect to. Servers with a higher `weight`
/// are tried first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
    pub url: String,
    pub weight: u32,
}

impl Socket {
    pub fn new(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight,
        }
    }

    fn host(&self) -> Option<String> {
        let uri: Uri = self.url.parse().ok()?;
        uri.host().map(str::to_owned)
    }

    fn is_secure(&self) -> bool {
        self.url
            .get(..6)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("wss://"))
    }
}

/// A WebSocket connection to one of several servers, reconnecting with an
/// exponential backoff until [`SipTransport::disconnect`] is called.
pub struct WebSocketTransport(Arc<Inner>);

struct Inner {
    this: Weak<Inner>,
    sockets: Vec<Socket>,
    recovery_min: Duration,
    recovery_max: Duration,
    events: UnboundedSender<TransportEvent>,
    state: Mutex<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    /// Index of the socket in use or last tried.
    current: usize,
    /// Sockets that failed since the last reset.
    failed: Vec<bool>,
    /// Queue of the running connection; `None` while down.
    outgoing: Option<UnboundedSender<String>>,
    connecting: bool,
    /// Set by `disconnect`, cleared by `connect`.
    closed: bool,
    recovery_attempts: u32,
    recovery: Timer,
}

impl WebSocketTransport {
    /// Creates a transport over `sockets`, reconnecting after a delay
    /// between `recovery_min` and `recovery_max`. Returns the channel the
    /// transport reports its events on, to be attached to a user agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `sockets` is empty or one of
    /// them has no usable `ws://` or `wss://` URL.
    pub fn new(
        sockets: Vec<Socket>,
        recovery_min: Duration,
        recovery_max: Duration,
    ) -> Result<(Self, UnboundedReceiver<TransportEvent>)> {
        if sockets.is_empty() {
            return Err(Error::configuration("sockets", "[]"));
        }
        for socket in &sockets {
            let scheme_ok = socket.is_secure()
                || socket
                    .url
                    .get(..5)
                    .is_some_and(|scheme| scheme.eq_ignore_ascii_case("ws://"));
            if !scheme_ok || socket.host().is_none() {
                return Err(Error::configuration("sockets", &socket.url));
            }
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let failed = vec![false; sockets.len()];
        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            recovery_min,
            recovery_max: recovery_max.max(recovery_min),
            events,
            state: Mutex::new(ConnectionState {
                current: select_socket(&sockets, &failed),
                failed,
                ..Default::default()
            }),
            sockets,
        });
        Ok((Self(inner), receiver))
    }

    /// The server in use, or the next one to be tried.
    pub fn socket(&self) -> &Socket {
        &self.0.sockets[self.0.lock().current]
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("sockets", &self.0.sockets)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SipTransport for WebSocketTransport {
    async fn connect(&self) {
        {
            let mut state = self.0.lock();
            state.closed = false;
            state.recovery.cancel();
        }
        self.0.open();
    }

    async fn disconnect(&self) {
        let mut state = self.0.lock();
        state.closed = true;
        state.recovery.cancel();
        // Dropping the queue closes the connection.
        state.outgoing = None;
    }

    fn send(&self, message: &str) -> bool {
        let state = self.0.lock();
        let Some(outgoing) = &state.outgoing else {
            log::debug!("unable to send message, transport is not connected");
            return false;
        };
        outgoing.send(message.to_owned()).is_ok()
    }

    fn via_transport(&self) -> String {
        if self.socket().is_secure() {
            "WSS".into()
        } else {
            "WS".into()
        }
    }

    fn sip_uri(&self) -> String {
        let host = self.socket().host().unwrap_or_default();
        format!("sip:{};transport=ws", host)
    }

    fn is_connected(&self) -> bool {
        self.0.lock().outgoing.is_some()
    }
}

impl Inner {
    /// Starts connecting to the selected socket unless a connection is
    /// already up or in progress.
    fn open(&self) {
        let socket = {
            let mut state = self.lock();
            if state.connecting || state.outgoing.is_some() || state.closed {
                return;
            }
            state.connecting = true;
            state.current = select_socket(&self.sockets, &state.failed);
            self.sockets[state.current].clone()
        };
        let Some(this) = self.this.upgrade() else {
            return;
        };

        log::debug!("connecting to WebSocket {}", socket.url);
        tokio::spawn(async move { this.run(socket).await });
    }

    async fn run(self: Arc<Self>, socket: Socket) {
        let mut request = match socket.url.as_str().into_client_request() {
            Ok(request) => request,
            Err(err) => {
                log::warn!("invalid WebSocket URL {}: {}", socket.url, err);
                self.on_closed(true);
                return;
            }
        };
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("sip"));

        let stream = match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                log::warn!("WebSocket {} connection error: {}", socket.url, err);
                self.on_closed(true);
                return;
            }
        };

        let (outgoing, mut queue) = mpsc::unbounded_channel::<String>();
        {
            let mut state = self.lock();
            state.connecting = false;
            if state.closed {
                return;
            }
            let current = state.current;
            state.failed[current] = false;
            state.recovery_attempts = 0;
            state.outgoing = Some(outgoing);
        }
        log::debug!("WebSocket {} connected", socket.url);
        self.emit(TransportEvent::Connected);

        let (mut sink, mut stream) = stream.split();
        let error = loop {
            tokio::select! {
                message = queue.recv() => {
                    let Some(message) = message else {
                        let _ = sink.close().await;
                        break false;
                    };
                    log::trace!("sending WebSocket message:\n{}", message);
                    if let Err(err) = sink.send(Message::Text(message.into())).await {
                        log::warn!("WebSocket {} send error: {}", socket.url, err);
                        break true;
                    }
                }
                frame = stream.next() => {
                    let data = match frame {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(bytes))) => {
                            String::from_utf8_lossy(&bytes).into_owned()
                        }
                        Some(Ok(Message::Close(_))) | None => break false,
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            log::warn!("WebSocket {} error: {}", socket.url, err);
                            break true;
                        }
                    };
                    if data == KEEPALIVE_REQUEST || data == KEEPALIVE_RESPONSE {
                        continue;
                    }
                    self.emit(TransportEvent::Data(data));
                }
            }
        };

        log::debug!("WebSocket {} closed", socket.url);
        self.on_closed(error);
    }

    /// The connection went down or could not be established.
    fn on_closed(&self, error: bool) {
        let closed = {
            let mut state = self.lock();
            state.connecting = false;
            state.outgoing = None;
            if error {
                let current = state.current;
                state.failed[current] = true;
            }
            state.closed
        };

        self.emit(TransportEvent::Disconnected { error });
        if !closed {
            self.recover();
        }
    }

    fn recover(&self) {
        let mut state = self.lock();
        state.recovery_attempts += 1;
        let delay = recovery_delay(
            state.recovery_attempts,
            self.recovery_min,
            self.recovery_max,
        );
        log::debug!(
            "next connection attempt in {:?} (attempt {})",
            delay,
            state.recovery_attempts
        );

        let this = self.this.clone();
        state.recovery.start(delay, move || {
            if let Some(inner) = this.upgrade() {
                inner.open();
            }
        });
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            log::trace!("transport events receiver dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().expect("Lock failed")
    }
}

/// Picks one of the heaviest sockets that did not fail, at random. Once
/// every socket failed they all become candidates again.
fn select_socket(sockets: &[Socket], failed: &[bool]) -> usize {
    let mut candidates: Vec<usize> = (0..sockets.len()).filter(|&i| !failed[i]).collect();
    if candidates.is_empty() {
        candidates = (0..sockets.len()).collect();
    }

    let weight = candidates
        .iter()
        .map(|&i| sockets[i].weight)
        .max()
        .unwrap_or_default();
    candidates.retain(|&i| sockets[i].weight == weight);

    match candidates.len() {
        0 => 0,
        len => candidates[rand::random_range(0..len)],
    }
}

/// A random delay up to `2^attempts - 1` seconds, kept between `min` and
/// `max`.
fn recovery_delay(attempts: u32, min: Duration, max: Duration) -> Duration {
    let ceiling = 2f64.powi(attempts.min(31) as i32) - 1.0;
    let delay = Duration::from_secs_f64((rand::random::<f64>() * ceiling).floor());
    delay.clamp(min, max)
}
