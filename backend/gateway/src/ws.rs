//! Gateway WebSocket endpoint. Terminates the client connection and
//! subscribes it directly to the Realtime Bus; no downstream WebSocket is
//! opened to either domain service.

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use realtime_bus::{ConnectionRegistry, SubscriberId};
use serde_json::json;
use std::time::{Duration, Instant};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GatewaySession {
    user_id: i64,
    subscriber_id: Option<SubscriberId>,
    registry: ConnectionRegistry,
    hb: Instant,
}

impl GatewaySession {
    fn new(user_id: i64, registry: ConnectionRegistry) -> Self {
        Self { user_id, subscriber_id: None, registry, hb: Instant::now() }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for GatewaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);

        let registry = self.registry.clone();
        let user_id = self.user_id;
        let addr = ctx.address();

        actix::spawn(async move {
            let (subscriber_id, mut rx) = registry.add_subscriber(user_id).await;
            addr.do_send(SubscriberRegistered(subscriber_id));
            while let Some(message) = rx.recv().await {
                addr.do_send(TextMessage(message));
            }
        });

        let greeting = json!({ "type": "gateway_connected", "user_id": self.user_id });
        ctx.text(greeting.to_string());
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(subscriber_id) = self.subscriber_id {
            let registry = self.registry.clone();
            let user_id = self.user_id;
            actix::spawn(async move {
                registry.remove_subscriber(user_id, subscriber_id).await;
            });
        }
    }
}

// Message type for recording the registry subscription once it completes.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct SubscriberRegistered(SubscriberId);

impl Handler<SubscriberRegistered> for GatewaySession {
    type Result = ();
    fn handle(&mut self, msg: SubscriberRegistered, _ctx: &mut Self::Context) {
        self.subscriber_id = Some(msg.0);
    }
}

// Message type for sending text to the WebSocket.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

impl Handler<TextMessage> for GatewaySession {
    type Result = ();
    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for GatewaySession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let message = match item {
            Ok(m) => m,
            Err(_) => {
                ctx.stop();
                return;
            }
        };

        match message {
            ws::Message::Ping(bytes) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => {
                self.hb = Instant::now();
            }
            ws::Message::Text(text) => {
                self.hb = Instant::now();
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                    if value.get("type").and_then(|v| v.as_str()) == Some("ping") {
                        ctx.text(json!({ "type": "pong" }).to_string());
                    }
                }
            }
            ws::Message::Binary(_) => {
                tracing::debug!("ignoring binary frame on gateway websocket");
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<i64>,
    registry: web::Data<ConnectionRegistry>,
) -> Result<HttpResponse, Error> {
    let user_id = path.into_inner();
    let session = GatewaySession::new(user_id, registry.get_ref().clone());
    ws::start(session, &req, stream)
}
