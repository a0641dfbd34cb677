use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, header::AUTHORIZATION},
    routing::post,
};
use axum_valid::Valid;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{
    dto::{
        http::RequestKindPath,
        packet::{Packet, PacketBody},
        request::{Request, RequestKind},
        response::Response,
    },
    error::AppError,
    services::{
        authorization::TokenKind,
        dispatcher::{self, Context, Transport},
    },
    state::SharedState,
};

/// Bearer token of the request, if any.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Build the request named `kind` from a JSON object body.
fn decode_request(kind: &str, body: Option<Value>) -> Result<Request, AppError> {
    let mut fields = match body {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(fields)) => fields,
        Some(_) => return Err(AppError::BadRequest("request body must be a JSON object".into())),
    };
    fields.insert("type".into(), Value::String(kind.to_string()));
    serde_json::from_value(Value::Object(fields))
        .map_err(|err| AppError::BadRequest(format!("malformed {kind} request: {err}")))
}

/// Run one request through the packet registry, as a websocket client would.
#[utoipa::path(
    post,
    path = "/api/request/{kind}",
    tag = "requests",
    params(
        ("kind" = String, Path, description = "Snake case request type"),
        ("Authorization" = String, Header, description = "Bearer REST token")
    ),
    request_body(content = Object, description = "Fields of the request, without its `type`"),
    responses(
        (status = 200, description = "Response to the request, success or fail", body = Response),
        (status = 400, description = "Malformed request body"),
        (status = 404, description = "Unknown request type")
    )
)]
pub async fn run_request(
    State(state): State<SharedState>,
    Valid(Path(RequestKindPath { kind })): Valid<Path<RequestKindPath>>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<Response>, AppError> {
    if RequestKind::from_name(&kind).is_none() {
        return Err(AppError::NotFound(format!("unknown request type {kind}")));
    }
    let request = decode_request(&kind, body.map(|Json(value)| value))?;

    let token = bearer_token(&headers);
    let ctx = Context {
        connection_id: Uuid::new_v4(),
        identity: state.tokens().identify(token, &[TokenKind::Rest]),
        transport: Transport::Rest,
    };
    let mut packet = Packet::new(ctx.connection_id, PacketBody::Request(request));
    packet.token = token.map(str::to_string);
    let packet_id = packet.id;

    debug!(kind = %kind, "REST request");
    let response = dispatcher::dispatch(&state, ctx, packet)
        .await
        .unwrap_or_else(|| Response::success_message(packet_id, "accepted"));
    Ok(Json(response))
}

/// Configure the REST mirror of the request packets.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/api/request/{kind}", post(run_request))
}
