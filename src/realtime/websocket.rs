//! # WebSocket Connections
//!
//! Runs the live-query protocol over one WebSocket per client.
//!
//! [`LiveQueryHub`] holds what connections share (registry, connected
//! sessions, keys); [`Connection`] holds what one socket owns. Protocol
//! handling is synchronous so it can be driven without a socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use super::client::{ClientId, ClientSession, SubscriptionInfo};
use super::errors::{RealtimeError, RealtimeResult};
use super::event::EventKind;
use super::protocol::{
    outbound_channel, send_error, ClientRequest, ConnectRequest, OutboundSender, RequestId,
    SubscribeRequest, OUTBOUND_CAPACITY,
};
use super::registry::SubscriptionRegistry;
use crate::observability::LiveQueryMetrics;
use crate::query::QueryPredicate;

/// Lookups of a predicate before `subscribe` gives up
const ATTACH_ATTEMPTS: usize = 8;

/// Per-socket state
pub struct Connection {
    outbound: OutboundSender,
    session: Option<Arc<ClientSession>>,
}

impl Connection {
    pub fn new(outbound: OutboundSender) -> Self {
        Self {
            outbound,
            session: None,
        }
    }

    /// The session established by `connect`, if any
    pub fn session(&self) -> Option<&Arc<ClientSession>> {
        self.session.as_ref()
    }
}

/// State shared by every live-query connection
pub struct LiveQueryHub {
    app_id: String,
    master_key: Option<String>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<LiveQueryMetrics>,
    clients: DashMap<ClientId, Arc<ClientSession>>,
}

impl LiveQueryHub {
    pub fn new(
        app_id: impl Into<String>,
        master_key: Option<String>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<LiveQueryMetrics>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            master_key,
            registry,
            metrics,
            clients: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Number of connected client sessions
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Handles one text frame. Failures are reported to the client as
    /// error frames.
    pub fn handle_text(&self, conn: &mut Connection, text: &str) {
        let result = ClientRequest::parse(text).and_then(|request| {
            debug!(op = request.op(), "Client request");
            self.handle_request(conn, request)
        });
        if let Err(err) = result {
            warn!(error = %err, code = err.protocol_code(), "Rejected client request");
            self.reject(conn, &err);
        }
    }

    /// Sends an error frame on `conn`
    pub fn reject(&self, conn: &Connection, err: &RealtimeError) {
        match &conn.session {
            Some(session) => session.push_error(err),
            None => {
                send_error(&conn.outbound, err);
                self.metrics.record_push(EventKind::Error);
            }
        }
    }

    fn handle_request(&self, conn: &mut Connection, request: ClientRequest) -> RealtimeResult<()> {
        match request {
            ClientRequest::Connect(connect) => self.connect(conn, connect),
            ClientRequest::Subscribe(subscribe) | ClientRequest::Update(subscribe) => {
                self.subscribe(conn, subscribe)
            }
            ClientRequest::Unsubscribe(unsubscribe) => {
                let session = conn.session.as_ref().ok_or(RealtimeError::ClientNotFound)?;
                if let Some(subscription) = session.unsubscribe(unsubscribe.request_id) {
                    self.registry.remove_if_empty(&subscription);
                }
                Ok(())
            }
        }
    }

    fn connect(&self, conn: &mut Connection, request: ConnectRequest) -> RealtimeResult<()> {
        if request.application_id.as_deref() != Some(self.app_id.as_str()) {
            return Err(RealtimeError::InvalidApplicationId);
        }

        let has_master_key = match (&request.master_key, &self.master_key) {
            (None, _) => false,
            (Some(given), Some(expected)) if given == expected => true,
            (Some(_), _) => return Err(RealtimeError::InvalidApplicationId),
        };

        if let Some(previous) = conn.session.take() {
            self.release(&previous);
        }

        let session = Arc::new(ClientSession::new(
            conn.outbound.clone(),
            has_master_key,
            request.session_token,
            Arc::clone(&self.metrics),
        ));
        self.clients
            .insert(session.id().to_string(), Arc::clone(&session));
        self.metrics.increment_connected();
        info!(client_id = session.id(), has_master_key, "Client connected");

        session.push_connected();
        conn.session = Some(session);
        Ok(())
    }

    /// `subscribe` and `update` share this path: whatever `request_id` was
    /// attached to is released first.
    fn subscribe(&self, conn: &mut Connection, request: SubscribeRequest) -> RealtimeResult<()> {
        let session = conn.session.as_ref().ok_or(RealtimeError::ClientNotFound)?;
        let predicate = QueryPredicate::parse(&request.query)?;

        if let Some(previous) = session.detach(request.request_id) {
            self.registry.remove_if_empty(&previous);
        }
        self.attach(session, request.request_id, predicate, request.session_token)
    }

    fn attach(
        &self,
        session: &Arc<ClientSession>,
        request_id: RequestId,
        predicate: QueryPredicate,
        session_token: Option<String>,
    ) -> RealtimeResult<()> {
        let fields = predicate.fields().map(<[String]>::to_vec);
        for attempt in 1..=ATTACH_ATTEMPTS {
            let subscription = self.registry.find_or_create(predicate.clone());
            let info = SubscriptionInfo {
                subscription: Arc::clone(&subscription),
                session_token: session_token.clone(),
                fields: fields.clone(),
            };
            if session.subscribe(request_id, info) {
                debug!(client_id = session.id(), request_id, predicate = %predicate, "Subscribed");
                return Ok(());
            }
            if !subscription.is_retired() {
                error!(predicate = %predicate, "Subscription refused a member without being retired");
                break;
            }
            debug!(predicate = %predicate, attempt, "Subscription retired while attaching, retrying");
        }
        Err(RealtimeError::SubscriptionUnavailable)
    }

    /// Tears down whatever `conn` established
    pub fn disconnect(&self, conn: &mut Connection) {
        if let Some(session) = conn.session.take() {
            self.release(&session);
        }
    }

    fn release(&self, session: &ClientSession) {
        self.clients.remove(session.id());
        for subscription in session.close() {
            self.registry.remove_if_empty(&subscription);
        }
        self.metrics.increment_disconnected();
        info!(client_id = session.id(), "Client disconnected");
    }
}

/// Drives one upgraded socket until it closes
pub async fn serve_socket(socket: WebSocket, hub: Arc<LiveQueryHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound, mut outbound_rx) = outbound_channel(OUTBOUND_CAPACITY);
    let overflow = outbound.overflow_signal();
    let mut conn = Connection::new(outbound);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => hub.handle_text(&mut conn, &text),
                    Some(Ok(Message::Binary(_))) => {
                        let err = RealtimeError::InvalidMessage("binary frames are not supported".into());
                        hub.reject(&conn, &err);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                    _ => {}
                }
            }

            Some(frame) = outbound_rx.recv() => {
                match frame.to_json() {
                    Ok(json) => {
                        if let Err(e) = ws_sender.send(Message::Text(json)).await {
                            debug!(error = %e, "WebSocket send failed");
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to serialize frame"),
                }
            }

            _ = overflow.notified() => {
                warn!(
                    client_id = conn.session().map(|s| s.id()).unwrap_or("-"),
                    "Client is not reading its pushes, closing connection"
                );
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    hub.disconnect(&mut conn);
}
