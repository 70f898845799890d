//! Minimal HTTP/1.1 JSON client shared by the metrics source and the
//! scale executor.
//!
//! One connection per request over a plain `TcpStream`, driven by hyper's
//! low-level client.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tracing::debug;

/// Transport-level failures. HTTP error statuses are not errors here.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request to {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },

    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },
}

/// Status and collected body of a response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Send one request to `address` (host:port) and collect the response.
pub async fn send(
    address: &str,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<HttpResponse, HttpError> {
    let uri = format!("http://{address}{path}");

    match tokio::time::timeout(timeout, send_inner(address, method, path, &uri, body)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "request timed out");
            Err(HttpError::Timeout { uri, timeout })
        }
    }
}

async fn send_inner(
    address: &str,
    method: Method,
    path: &str,
    uri: &str,
    body: Option<Vec<u8>>,
) -> Result<HttpResponse, HttpError> {
    let request_err = |reason: String| HttpError::Request {
        uri: uri.to_string(),
        reason,
    };

    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| HttpError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| request_err(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("host", address)
        .header("user-agent", "tideline/0.1")
        .header("accept", "application/json");
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let req = builder
        .body(Full::new(Bytes::from(body.unwrap_or_default())))
        .map_err(|e| request_err(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| request_err(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| request_err(e.to_string()))?
        .to_bytes();

    Ok(HttpResponse { status, body })
}
