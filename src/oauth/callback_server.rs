//! Usage: One-shot loopback listener that catches the OAuth redirect.

use crate::shared::error::{GatewayError, GatewayResult};
use crate::shared::security::constant_time_eq;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const CALLBACK_PATH: &str = "/callback";
const MAX_REQUEST_BYTES: usize = 8192;

const SUCCESS_HTML: &str = "<html><body><h1>Authentication successful</h1>\
<p>You may close this window.</p></body></html>";
const ERROR_HTML: &str = "<html><body><h1>Authentication failed</h1>\
<p>You may close this window and retry.</p></body></html>";

/// Query parameters the provider may send back on the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallbackPayload {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

/// Bound sockets for one authorization attempt. Dropping this releases the
/// port, which is what guarantees release on success, error, and timeout:
/// `wait_for_callback` takes it by value.
#[derive(Debug)]
pub(crate) struct BoundCallbackListener {
    port: u16,
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
}

impl BoundCallbackListener {
    pub(crate) fn port(&self) -> u16 {
        self.port
    }
}

/// Bind the configured callback port on both loopback addresses. There is no
/// fallback port: the redirect URI registered with the provider names this
/// one, so failing fast beats listening where the browser will never arrive.
pub(crate) async fn bind_callback_listener(port: u16) -> GatewayResult<BoundCallbackListener> {
    let mut bind_errors: Vec<String> = Vec::new();

    let listener_v4 = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            bind_errors.push(format!("127.0.0.1:{port} ({err})"));
            None
        }
    };
    let listener_v6 = match TcpListener::bind(("::1", port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            bind_errors.push(format!("::1:{port} ({err})"));
            None
        }
    };

    if listener_v4.is_none() && listener_v6.is_none() {
        return Err(GatewayError::config(format!(
            "oauth callback bind failed: {}",
            bind_errors.join("; ")
        )));
    }

    Ok(BoundCallbackListener {
        port,
        listener_v4,
        listener_v6,
    })
}

/// Accept exactly one connection, parse the redirect, verify `state`, answer
/// a small HTML page, and return the payload. The listener is consumed; all
/// exit paths drop it and free the port.
///
/// The flow timeout covers the accept and the request read as one window:
/// a client that connects but never sends a request still times out.
pub(crate) async fn wait_for_callback(
    mut listener: BoundCallbackListener,
    expected_state: &str,
    timeout: Duration,
) -> GatewayResult<CallbackPayload> {
    let accept_and_read = async {
        let (mut socket, _) = accept_one(&mut listener)
            .await
            .map_err(|e| GatewayError::callback(format!("accept failed: {e}")))?;

        let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
        let size = socket
            .read(&mut buffer)
            .await
            .map_err(|e| GatewayError::callback(format!("read failed: {e}")))?;
        Ok::<_, GatewayError>((socket, buffer, size))
    };

    let (mut socket, buffer, size) = tokio::time::timeout(timeout, accept_and_read)
        .await
        .map_err(|_| GatewayError::OAuthTimeout)??;
    if size == 0 {
        return Err(GatewayError::callback("empty callback request"));
    }

    let request = String::from_utf8_lossy(&buffer[..size]);
    let result = extract_request_target(request.as_ref())
        .and_then(parse_callback_target)
        .and_then(|payload| {
            validate_state(&payload, expected_state)?;
            Ok(payload)
        });

    let is_error = match &result {
        Ok(payload) => payload.error.is_some(),
        Err(_) => true,
    };
    let body = if is_error { ERROR_HTML } else { SUCCESS_HTML };
    let status_line = if is_error {
        "HTTP/1.1 400 Bad Request"
    } else {
        "HTTP/1.1 200 OK"
    };
    let response = format!(
        "{status_line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;

    result
}

async fn accept_one(
    listener: &mut BoundCallbackListener,
) -> std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)> {
    match (listener.listener_v4.as_mut(), listener.listener_v6.as_mut()) {
        (Some(v4), Some(v6)) => {
            tokio::select! {
                result = v4.accept() => result,
                result = v6.accept() => result,
            }
        }
        (Some(v4), None) => v4.accept().await,
        (None, Some(v6)) => v6.accept().await,
        (None, None) => unreachable!("bind_callback_listener requires at least one socket"),
    }
}

fn extract_request_target(request: &str) -> GatewayResult<&str> {
    let first = request
        .lines()
        .next()
        .ok_or_else(|| GatewayError::callback("malformed callback request"))?;
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        return Err(GatewayError::callback("callback must be a GET request"));
    }
    Ok(target)
}

pub(crate) fn parse_callback_target(target: &str) -> GatewayResult<CallbackPayload> {
    let url = reqwest::Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| GatewayError::callback(format!("invalid callback target: {e}")))?;

    if url.path() != CALLBACK_PATH {
        return Err(GatewayError::callback(format!(
            "unexpected callback path: {}",
            url.path()
        )));
    }

    let mut payload = CallbackPayload {
        code: None,
        state: None,
        error: None,
        error_description: None,
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.to_string()),
            "state" => payload.state = Some(value.to_string()),
            "error" => payload.error = Some(value.to_string()),
            "error_description" => payload.error_description = Some(value.to_string()),
            _ => {}
        }
    }

    if payload.code.is_none() && payload.error.is_none() {
        return Err(GatewayError::callback(
            "callback carried neither code nor error",
        ));
    }

    Ok(payload)
}

fn validate_state(payload: &CallbackPayload, expected_state: &str) -> GatewayResult<()> {
    let state = payload
        .state
        .as_deref()
        .ok_or_else(|| GatewayError::callback("callback is missing the state parameter"))?;
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err(GatewayError::callback("state mismatch"));
    }
    Ok(())
}
