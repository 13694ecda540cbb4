//! Request handling: translates an Axum `Request` into the Handler
//! Facade's `RequestInput`, runs it against a fresh per-request
//! `PostgresAdapter`, and renders the `Envelope` back to an HTTP
//! response.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use restgate_adapter::PostgresAdapter;
use restgate_core::adapter::{StorageAdapter, Worker};
use restgate_core::error::Error;
use restgate_core::handler::{self, Envelope, HandlerResponse, MultiRequestEntry, RequestInput, Verb};
use restgate_core::scheme::SchemeRegistry;
use restgate_core::user::{Auth, User};
use restgate_core::value::Value;
use serde_json::json;
use tracing::{debug, error};

use crate::schemes::{AUTH_NAME_FIELD, AUTH_PASSWORD_FIELD, AUTH_SCHEME};
use crate::state::AppState;

/// Entry point wired into the router: every method, every path.
pub async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    debug!(%method, %path, "incoming request");

    let result = if path == "/__login" && method == Method::POST {
        handle_login(&state, request).await
    } else if path == "/__multi" && method == Method::POST {
        handle_multi(&state, request).await
    } else {
        handle_resource(&state, request).await
    };

    match result {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

fn verb_for(method: &Method) -> Result<Verb, Error> {
    match *method {
        Method::GET | Method::HEAD => Ok(Verb::Get),
        Method::POST => Ok(Verb::Post),
        Method::PUT => Ok(Verb::Put),
        Method::PATCH => Ok(Verb::Patch),
        Method::DELETE => Ok(Verb::Delete),
        ref other => Err(Error::BadRequest(format!("unsupported method: {other}"))),
    }
}

fn header_map(request: &Request) -> HashMap<String, String> {
    request
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}

fn query_args(request: &Request) -> HashMap<String, String> {
    request
        .uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn if_modified_since(headers: &HashMap<String, String>) -> Option<DateTime<Utc>> {
    headers
        .get("if-modified-since")
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

async fn read_body(request: Request) -> Result<Value, Error> {
    let body = request.into_body();
    let bytes = axum::body::to_bytes(body, 10 << 20).await.map_err(|e| Error::BadRequest(e.to_string()))?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| Error::BadRequest(format!("invalid JSON body: {e}")))
}

async fn authenticate(headers: &HashMap<String, String>, state: &AppState) -> Result<Option<User>, Error> {
    let auth_header = headers.get("authorization").map(String::as_str);
    restgate_auth::authenticate_bearer(auth_header, &state.session).map_err(|e| Error::Forbidden(e.to_string()))
}

async fn authenticate_with_query(
    headers: &HashMap<String, String>,
    query: &HashMap<String, String>,
    state: &AppState,
) -> Result<Option<User>, Error> {
    if let Some(header_user) = authenticate(headers, state).await? {
        return Ok(Some(header_user));
    }
    match query.get("token") {
        Some(token) => restgate_auth::verify_session(&state.session, token)
            .map(Some)
            .map_err(|e| Error::Forbidden(e.to_string())),
        None => Ok(None),
    }
}

async fn checkout_adapter(state: &AppState, auth_scheme: &str) -> Result<PostgresAdapter, Error> {
    let conn = state.pool.get().await.map_err(|e| Error::Internal(format!("connection pool exhausted: {e}")))?;
    Ok(PostgresAdapter::new(conn, state.registry.clone(), state.config.db_schema.clone(), auth_scheme.to_string()))
}

fn split_path(path: &str) -> (String, Vec<String>) {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.split('/').filter(|s| !s.is_empty());
    let root = parts.next().unwrap_or_default().to_string();
    (root, parts.map(String::from).collect())
}

/// The ordinary resource path: `/{scheme}/{...tokens}`.
async fn handle_resource(state: &Arc<AppState>, request: Request) -> Result<Response, Error> {
    let method = verb_for(request.method())?;
    let headers = header_map(&request);
    let query = query_args(&request);
    let since = if_modified_since(&headers);
    let path = request.uri().path().to_string();
    let (root_scheme, path_tokens) = split_path(&path);

    if root_scheme.is_empty() {
        return Err(Error::NotFound("no scheme in path".into()));
    }
    if state.registry.get(&root_scheme).is_none() {
        return Err(Error::NotFound(format!("unknown scheme: {root_scheme}")));
    }

    let user = authenticate_with_query(&headers, &query, state).await?;
    let mut payload = read_body(request).await?;

    // Apply the Password transform on writes to the auth scheme so a
    // plaintext `password` in the payload never reaches the adapter.
    if root_scheme == AUTH_SCHEME {
        let auth = Auth::new(AUTH_NAME_FIELD, AUTH_PASSWORD_FIELD, &state.hasher);
        auth.transform_payload(&mut payload);
    }

    let adapter = checkout_adapter(state, AUTH_SCHEME).await?;
    let worker = Worker::new(state.config.db_schema.clone());

    let input = RequestInput {
        method,
        root_scheme,
        path_tokens,
        sub_filter: None,
        query_args: query,
        if_modified_since: since,
        server_headers: &headers,
        user: user.as_ref(),
        payload,
        files: Vec::new(),
    };

    let response = handler::handle_request(
        input,
        state.registry.as_ref(),
        &adapter,
        &worker,
        &state.access,
        state.config.max_resolve_depth,
        state.config.default_page_count,
        state.config.max_page_count,
        state.config.debug_enabled,
    )
    .await?;

    Ok(render(response))
}

/// `POST /__login` with `{"name": ..., "password": ...}`, verified
/// against the configured auth scheme and answered with a signed
/// session token. Not part of the Handler Facade itself: the original
/// spec names session token derivation as external, admin-shell
/// functionality, but the adapter's `authorize_user` primitive and
/// `restgate-auth`'s session issuance both need a caller, so this is
/// that caller.
async fn handle_login(state: &Arc<AppState>, request: Request) -> Result<Response, Error> {
    let payload = read_body(request).await?;
    let name = payload.get("name").and_then(Value::as_str).ok_or_else(|| Error::BadRequest("missing name".into()))?;
    let password =
        payload.get("password").and_then(Value::as_str).ok_or_else(|| Error::BadRequest("missing password".into()))?;

    let adapter = checkout_adapter(state, AUTH_SCHEME).await?;
    let worker = Worker::new(state.config.db_schema.clone());
    let auth = Auth::new(AUTH_NAME_FIELD, AUTH_PASSWORD_FIELD, &state.hasher);

    let user = adapter.authorize_user(&worker, &auth, name, password).await?;
    let Some(user) = user else {
        return Err(Error::Forbidden("invalid credentials".into()));
    };

    let issued_at = Utc::now().timestamp();
    let token = restgate_auth::issue_session(&state.session, &user, issued_at).map_err(|e| Error::Internal(e.to_string()))?;

    let body = serde_json::to_vec(&json!({ "token": token, "oid": user.oid, "name": user.name() }))
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty())))
}

/// `POST /__multi` with a JSON dict of `path -> query-args` entries.
async fn handle_multi(state: &Arc<AppState>, request: Request) -> Result<Response, Error> {
    let headers = header_map(&request);
    let since = if_modified_since(&headers);
    let user = authenticate(&headers, state).await?;
    let payload = read_body(request).await?;

    let dict = payload.as_dict().ok_or_else(|| Error::BadRequest("multi-request body must be a JSON object".into()))?;

    let mut entries = Vec::with_capacity(dict.len());
    for (path, args) in dict {
        let mut query_args = HashMap::new();
        if let Some(args_dict) = args.as_dict() {
            for (k, v) in args_dict {
                if let Some(s) = v.as_str() {
                    query_args.insert(k.clone(), s.to_string());
                }
            }
        }
        entries.push(MultiRequestEntry { path: path.clone(), query_args });
    }

    let adapter = checkout_adapter(state, AUTH_SCHEME).await?;
    let worker = Worker::new(state.config.db_schema.clone());

    let response = handler::handle_multi(
        entries,
        state.registry.as_ref(),
        &adapter,
        &worker,
        &state.access,
        user.as_ref(),
        &headers,
        state.config.max_resolve_depth,
        state.config.default_page_count,
        state.config.max_page_count,
        None,
        since,
    )
    .await?;

    Ok(render(response))
}

fn render(response: HandlerResponse) -> Response {
    if response.status == 304 {
        return Response::builder().status(StatusCode::NOT_MODIFIED).body(Body::empty()).unwrap_or_else(|_| Response::new(Body::empty()));
    }
    if response.status == 204 {
        return Response::builder().status(StatusCode::NO_CONTENT).body(Body::empty()).unwrap_or_else(|_| Response::new(Body::empty()));
    }

    let envelope: Envelope = response.envelope.unwrap_or_else(|| Envelope {
        date: Utc::now().to_rfc2822(),
        delta: None,
        cursor: None,
        result: Value::Null,
        ok: true,
        errors: Vec::new(),
        debug: None,
    });
    let body = serde_json::to_vec(&envelope).unwrap_or_default();

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status).header("content-type", "application/json");
    if let Some(lm) = response.last_modified {
        builder = builder.header("last-modified", lm.to_rfc2822());
    }
    builder.body(Body::from(body)).unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(error: &Error) -> Response {
    error!(%error, "request failed");
    let status = error.status_code();
    let envelope = json!({
        "date": Utc::now().to_rfc2822(),
        "result": Value::Null,
        "OK": false,
        "errors": [error.to_string()],
    });
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
        .into_response()
}
