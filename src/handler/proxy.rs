use super::errors::ProxyError;
use super::immich;
use super::state::ProxyState;
use super::target::{self, ResolvedTarget};
use crate::metrics::consts as crate_metrics;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{self, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use std::time::Instant;
use tracing::instrument;

fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[instrument(skip_all, level = tracing::Level::DEBUG, fields(request_id=uuid()))]
pub(crate) async fn proxy(
    State(state): State<ProxyState>,
    client_request: Request<Body>,
) -> Result<Response, ProxyError> {
    let debug = state.config.debug;

    let proxy_request_method = client_request.method().clone();
    if proxy_request_method != http::Method::GET && proxy_request_method != http::Method::HEAD {
        return Err(ProxyError::MethodNotAllowed);
    }

    let raw_path = client_request
        .uri()
        .path()
        .strip_prefix(immich::PROXY_MOUNT)
        .unwrap_or_default();
    let query = client_request.uri().query();

    let ResolvedTarget { path, prefix, url } = match target::resolve(
        raw_path,
        query,
        &state.config.upstream.allowed_prefixes,
        state.api_base.as_deref(),
    ) {
        Ok(target) => target,
        Err(error) => {
            tracing::info!(%error, %proxy_request_method, raw_path, "Rejected proxy request.");
            return Err(error);
        }
    };

    let Some(api_key_header) = state.api_key_header.clone() else {
        tracing::warn!(%proxy_request_method, %path, "Upstream API key is not configured.");
        return Err(ProxyError::BadGateway(anyhow::Error::msg(
            "Upstream API key is not configured.",
        )));
    };

    match debug {
        true => tracing::info!(%proxy_request_method, raw_path, target = %url, "Proxying request."),
        false => tracing::debug!(%proxy_request_method, %path, %prefix, "Proxying request."),
    }

    let mut proxy_request_headers = HeaderMap::new();
    proxy_request_headers.insert(http::header::ACCEPT, HeaderValue::from_static(immich::ACCEPT));
    proxy_request_headers.insert(immich::API_KEY_HEADER_KEY, api_key_header);

    let reqwest_start = Instant::now();
    let server_response = state
        .http_client
        .request(proxy_request_method.clone(), url)
        .headers(proxy_request_headers)
        .send()
        .await
        .map_err(|error| {
            log_transport_error(&error, debug);
            ProxyError::BadGateway(error.without_url().into())
        })?;

    metrics::histogram!(crate_metrics::UPSTREAM_REQUEST_DURATION_SECS)
        .record(reqwest_start.elapsed().as_secs_f64());

    let server_response_status = server_response.status();
    let server_response_headers = relayable_headers(server_response.headers());

    if server_response_status.is_success() {
        tracing::info!(%server_response_status, %proxy_request_method, %path);
    } else {
        // Non-2xx answers are relayed untouched.
        metrics::counter!(crate_metrics::UPSTREAM_ERROR_RESPONSES).increment(1);
        tracing::warn!(%server_response_status, %proxy_request_method, %path, "Upstream answered with an error status.");
    }

    // Chunks are handed over as they arrive. An error item makes the server
    // abort the connection, so the client sees a truncated body rather than
    // an error document glued onto partial bytes. Dropping this stream when
    // the client goes away closes the upstream connection.
    let server_response_body_stream = server_response.bytes_stream().inspect(move |chunk| {
        match chunk {
            Ok(bytes) => metrics::counter!(crate_metrics::UPSTREAM_STREAMED_BYTES)
                .increment(bytes.len() as u64),
            Err(error) => {
                metrics::counter!(crate_metrics::UPSTREAM_STREAM_FAILURE).increment(1);
                match debug {
                    true => tracing::warn!(?error, "Upstream body failed mid-stream, aborting response."),
                    false => tracing::warn!(
                        timeout = error.is_timeout(),
                        "Upstream body failed mid-stream, aborting response."
                    ),
                }
            }
        }
    });

    Ok((
        server_response_status,
        server_response_headers,
        Body::from_stream(server_response_body_stream),
    )
        .into_response())
}

fn log_transport_error(error: &reqwest::Error, debug: bool) {
    match debug {
        true => tracing::error!(?error, "Upstream request failed."),
        false => tracing::error!(
            connect = error.is_connect(),
            timeout = error.is_timeout(),
            "Upstream request failed."
        ),
    }
}

/// Upstream headers minus hop-by-hop ones, including any named in `Connection`.
fn relayable_headers(server_response_headers: &HeaderMap) -> HeaderMap {
    let connection_scoped: Vec<HeaderName> = server_response_headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    server_response_headers
        .iter()
        .filter(|(key, _)| {
            !immich::HOP_BY_HOP_HEADER_KEYS.contains(&key.as_str())
                && !connection_scoped.contains(key)
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
