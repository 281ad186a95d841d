/// WebSocket session actor
///
/// One actor per connection. It owns the session handle, drives the lifecycle
/// handler on start/stop and writes everything queued on its transport
/// channel to the socket.
use super::WebSocketMessage;
use crate::error::AppError;
use crate::models::{
    DisconnectCause, NotificationId, NotificationRecord, RecipientId, SessionHandle,
};
use crate::state::AppState;
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Ids already written with the unread backlog
///
/// A notification persisted between the join and the backlog query is both
/// queued live and returned by the query; the live copy is dropped once.
#[derive(Default)]
struct BacklogFilter {
    ids: HashSet<NotificationId>,
}

impl BacklogFilter {
    fn record(&mut self, id: NotificationId) {
        self.ids.insert(id);
    }

    fn is_duplicate(&mut self, msg: &WebSocketMessage) -> bool {
        match msg {
            WebSocketMessage::Notification { id: Some(id), .. } => self.ids.remove(id),
            _ => false,
        }
    }
}

pub struct WsSession {
    session: SessionHandle,
    recipient: RecipientId,
    state: AppState,
    outbound: Option<mpsc::Receiver<WebSocketMessage>>,
    replayed: BacklogFilter,
    hb: Instant,
    cause: DisconnectCause,
}

impl WsSession {
    pub fn new(
        session: SessionHandle,
        recipient: RecipientId,
        state: AppState,
        outbound: mpsc::Receiver<WebSocketMessage>,
    ) -> Self {
        Self {
            session,
            recipient,
            state,
            outbound: Some(outbound),
            replayed: BacklogFilter::default(),
            hb: Instant::now(),
            cause: DisconnectCause::Normal,
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &WebSocketMessage) {
        match msg.to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to encode message for session {}: {}", self.session, e),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = self.state.ws_config.heartbeat_interval();
        let client_timeout = self.state.ws_config.client_timeout();

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > client_timeout {
                warn!("WebSocket heartbeat failed for session {}, disconnecting", act.session);
                act.cause = DisconnectCause::Timeout;
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Drain the transport channel at the pace the socket is written
    ///
    /// The channel stays the only buffer, so a slow client fills it and the
    /// dispatcher sees `SessionBusy`.
    fn attach_outbound(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(ReceiverStream::new(rx));
        }
    }

    /// Join the registry and load the unread backlog
    ///
    /// The actor handles no other event, live pushes included, until
    /// `Connected` and the backlog are written.
    fn connect(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let lifecycle = self.state.lifecycle.clone();
        let notifications = self.state.notifications.clone();
        let limit = self.state.ws_config.unread_backlog_limit;
        let (session, recipient) = (self.session, self.recipient);

        ctx.wait(
            async move {
                lifecycle.on_connect(session, recipient).await?;
                Ok::<_, AppError>(notifications.unread_for(recipient, limit).await)
            }
            .into_actor(self)
            .map(|result, act, ctx| match result {
                Ok(unread) => act.replay_unread(ctx, unread),
                Err(e) => {
                    act.send(ctx, &WebSocketMessage::error(e.code(), e.to_string()));
                    act.cause = DisconnectCause::Error(e.to_string());
                    ctx.stop();
                }
            }),
        );
    }

    /// Send the connection confirmation followed by the unread backlog, oldest first
    fn replay_unread(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        unread: crate::error::Result<Vec<NotificationRecord>>,
    ) {
        let unread = unread.unwrap_or_else(|e| {
            warn!("Could not load unread backlog for {}: {}", self.recipient, e);
            Vec::new()
        });

        self.send(
            ctx,
            &WebSocketMessage::connected(self.session.as_uuid(), unread.len()),
        );
        for record in unread.iter().rev() {
            self.replayed.record(record.id);
            self.send(ctx, &WebSocketMessage::from(record));
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            "WebSocket session {} started for user {}",
            self.session, self.recipient
        );

        self.hb(ctx);
        self.attach_outbound(ctx);
        self.connect(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            "WebSocket session {} stopped for user {}",
            self.session, self.recipient
        );

        let lifecycle = self.state.lifecycle.clone();
        let (session, recipient, cause) = (self.session, self.recipient, self.cause.clone());

        actix::spawn(async move {
            lifecycle.on_disconnect(session, recipient, cause).await;
        });
    }
}

/// Messages queued on this session's transport channel
impl StreamHandler<WebSocketMessage> for WsSession {
    fn handle(&mut self, msg: WebSocketMessage, ctx: &mut Self::Context) {
        if self.replayed.is_duplicate(&msg) {
            debug!("Skipping notification already sent in backlog to {}", self.session);
            return;
        }
        self.send(ctx, &msg);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("Outbound channel closed for session {}", self.session);
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match WebSocketMessage::from_json(&text) {
                    Ok(WebSocketMessage::Ping { timestamp }) => {
                        self.send(ctx, &WebSocketMessage::pong(timestamp));
                    }
                    Ok(WebSocketMessage::Pong { .. }) => {}
                    Ok(other) => {
                        debug!("Ignoring client message on session {}: {:?}", self.session, other);
                    }
                    Err(e) => {
                        warn!("Failed to parse WS message: {:?}", e);
                        self.send(ctx, &WebSocketMessage::error("BAD_MESSAGE", e.to_string()));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket close message received: {:?}", reason);
                self.cause = DisconnectCause::Normal;
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket protocol error on session {}: {}", self.session, e);
                self.cause = DisconnectCause::Error(e.to_string());
                ctx.stop();
            }
            _ => {}
        }
    }
}
