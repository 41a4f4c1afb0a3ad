use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    types::{Headers, NetOptions, RangeSpec},
};

/// A fully buffered HTTP response.
///
/// `final_url` is the URL after redirects; callers persist it so later
/// requests skip the redirect chain. Response header names are lowercased at
/// construction so lookups are case-insensitive.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub final_url: Url,
    pub body: Bytes,
    headers: HashMap<String, String>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, final_url: Url, headers: HashMap<String, String>, body: Bytes) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            final_url,
            body,
            headers,
        }
    }

    /// Case-insensitive response header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// HTTP client contract consumed by the downloader.
#[async_trait]
pub trait Net: Send + Sync + 'static {
    /// GET the whole resource.
    async fn get(&self, url: Url, headers: Option<Headers>) -> NetResult<HttpResponse>;

    /// GET one byte range of the resource.
    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> NetResult<HttpResponse>;
}

/// Base HTTP client implementation using reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestNet {
    client: reqwest::Client,
}

impl ReqwestNet {
    pub fn new(opts: NetOptions) -> NetResult<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(opts.request_timeout)
            .build()
            .map_err(|e| NetError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    fn build_request(
        &self,
        url: Url,
        headers: Option<Headers>,
        range: Option<RangeSpec>,
    ) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);

        if let Some(headers) = headers {
            for (key, value) in headers.iter() {
                request = request.header(key, value);
            }
        }

        if let Some(range) = range {
            request = request.header("Range", range.to_header_value());
        }

        request
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> NetResult<HttpResponse> {
        let response = request.send().await?;

        let status = response.status();
        let final_url = response.url().clone();

        if !(status.is_success() || status == reqwest::StatusCode::PARTIAL_CONTENT) {
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url: final_url.to_string(),
            });
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();

        let body = response.bytes().await?;
        trace!(status = status.as_u16(), url = %final_url, bytes = body.len(), "GET done");

        Ok(HttpResponse::new(
            status.as_u16(),
            final_url,
            headers,
            body,
        ))
    }
}

#[async_trait]
impl Net for ReqwestNet {
    async fn get(&self, url: Url, headers: Option<Headers>) -> NetResult<HttpResponse> {
        self.execute(self.build_request(url, headers, None)).await
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> NetResult<HttpResponse> {
        self.execute(self.build_request(url, headers, Some(range)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        extract::Request,
        http::StatusCode,
        response::{Redirect, Response},
        routing::get,
    };
    use tokio::net::TcpListener;

    use super::*;

    const BLOB: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    async fn blob_endpoint(request: Request) -> Result<Response, StatusCode> {
        let range = request
            .headers()
            .get("Range")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("bytes="))
            .and_then(|h| h.split_once('-'));

        if let Some((start, end)) = range {
            let start: usize = start.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
            let end: usize = end.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
            if start >= BLOB.len() || end < start {
                return Err(StatusCode::RANGE_NOT_SATISFIABLE);
            }
            let end = end.min(BLOB.len() - 1);
            return Ok(Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", start, end, BLOB.len()),
                )
                .body(axum::body::Body::from(
                    Bytes::copy_from_slice(&BLOB[start..=end]),
                ))
                .unwrap());
        }

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("X-Head-Seqnum", "42")
            .body(axum::body::Body::from(Bytes::copy_from_slice(BLOB)))
            .unwrap())
    }

    async fn missing_endpoint() -> StatusCode {
        StatusCode::NOT_FOUND
    }

    async fn private_endpoint() -> StatusCode {
        StatusCode::FORBIDDEN
    }

    async fn moved_endpoint() -> Redirect {
        Redirect::permanent("/blob")
    }

    async fn run_test_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/blob", get(blob_endpoint))
            .route("/missing", get(missing_endpoint))
            .route("/private", get(private_endpoint))
            .route("/moved", get(moved_endpoint));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://127.0.0.1:{}", addr.port())
    }

    fn client() -> ReqwestNet {
        ReqwestNet::new(NetOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn get_returns_body_and_headers() {
        let base = run_test_server().await;
        let url = format!("{base}/blob").parse().unwrap();

        let resp = client().get(url, None).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], BLOB);
        // lookup is case-insensitive regardless of wire casing
        assert_eq!(resp.header("x-head-seqnum"), Some("42"));
        assert_eq!(resp.header("X-HEAD-SEQNUM"), Some("42"));
    }

    #[tokio::test]
    async fn get_range_returns_slice_and_content_range() {
        let base = run_test_server().await;
        let url: Url = format!("{base}/blob").parse().unwrap();

        let resp = client()
            .get_range(url, RangeSpec::new(5, Some(9)), None)
            .await
            .unwrap();
        assert_eq!(resp.status, 206);
        assert_eq!(&resp.body[..], b"56789");
        assert_eq!(resp.header("content-range"), Some("bytes 5-9/36"));
    }

    #[tokio::test]
    async fn redirect_reports_final_url() {
        let base = run_test_server().await;
        let url: Url = format!("{base}/moved").parse().unwrap();

        let resp = client().get(url, None).await.unwrap();
        assert_eq!(resp.final_url.path(), "/blob");
        assert_eq!(&resp.body[..], BLOB);
    }

    #[tokio::test]
    async fn error_statuses_surface_with_code() {
        let base = run_test_server().await;

        for (path, expected) in [("missing", 404), ("private", 403)] {
            let url: Url = format!("{base}/{path}").parse().unwrap();
            let err = client().get(url, None).await.unwrap_err();
            assert_eq!(err.status(), Some(expected), "path {path}");
        }
    }
}
