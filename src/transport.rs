use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Response, StatusCode, Url};
use tracing::{debug, warn};

use crate::config::Env;
use crate::error::TransportError;
use crate::limiter::{self, Limiter};

/// Fixed endpoint the Theme-Access app proxies requests through. Passwords
/// with the `shptka_` prefix are scoped to this proxy rather than to the
/// store's own admin API.
const THEME_ACCESS_URL: &str = "https://theme-kit-access.shopifyapps.com/cli";

const THEME_ACCESS_PASSWORD_PREFIX: &str = "shptka_";

const MAX_RETRY: u32 = 5;

type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone, Default)]
pub struct Params {
    pub domain: String,
    pub password: String,
    pub proxy: String,
    pub timeout: Duration,
    pub read_only: bool,
    /// Test hook: overrides the Theme-Access proxy endpoint.
    pub theme_access_url: Option<String>,
}

impl Params {
    pub fn from_env(env: &Env) -> Params {
        Params {
            domain: env.domain.clone(),
            password: env.password.clone(),
            proxy: env.proxy.clone(),
            timeout: env.timeout(),
            read_only: env.read_only,
            theme_access_url: None,
        }
    }
}

/// An authenticated JSON client for one environment's host, paced by the
/// host's shared rate limiter and retrying transient failures.
pub struct Transport {
    domain: String,
    password: String,
    base_url: Url,
    theme_access: bool,
    read_only: bool,
    client: reqwest::Client,
    limiter: Arc<Limiter>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("domain", &self.domain)
            .field("theme_access", &self.theme_access)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(params: Params) -> Result<Transport> {
        let theme_access = params.password.starts_with(THEME_ACCESS_PASSWORD_PREFIX);

        let base_url = if theme_access {
            let raw = params
                .theme_access_url
                .as_deref()
                .unwrap_or(THEME_ACCESS_URL);
            Url::parse(raw).map_err(|_| TransportError::InvalidDomain(raw.to_string()))?
        } else {
            parse_base_url(&params.domain)?
        };

        let mut builder = reqwest::Client::builder();
        if params.timeout > Duration::ZERO {
            builder = builder.timeout(params.timeout);
        }

        if !params.proxy.is_empty() {
            let proxy = reqwest::Proxy::all(&params.proxy)
                .map_err(|_| TransportError::InvalidProxyUrl(params.proxy.clone()))?;
            // the proxy is assumed to be a local debugging intermediary, so
            // certificate validation is off while it is in the path
            builder = builder.proxy(proxy).danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        Ok(Transport {
            limiter: limiter::for_domain(&params.domain),
            domain: params.domain,
            password: params.password,
            base_url,
            theme_access,
            read_only: params.read_only,
            client,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path, None, &[]).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<Response> {
        self.request(Method::POST, path, Some(body), &[]).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: &serde_json::Value,
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        self.request(Method::PUT, path, Some(body), headers).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.request(Method::DELETE, path, None, &[]).await
    }

    /// Issue an authenticated JSON request. Transport failures and 5xx
    /// responses are retried with a linear backoff; a 429 pauses the host's
    /// limiter for the advertised interval and tries again. Any other
    /// response is returned to the caller as-is.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<Response> {
        if self.read_only && method != Method::GET {
            return Err(TransportError::ReadOnlyEnvironment);
        }

        let url = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);

        let mut attempt: u32 = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.base_headers(headers));
            if let Some(body) = body {
                request = request.json(body);
            }

            self.limiter.wait().await;
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let after = retry_after(&resp);
                        warn!("rate limited by {}, backing off {:?}", self.domain, after);
                        self.limiter.pause_for(after);
                        continue;
                    }
                    if !status.is_server_error() {
                        return Ok(resp);
                    }
                    debug!("{} {} answered {}, retrying", method, path, status);
                }
                Err(err) => {
                    if is_dns_failure(&err) {
                        return Err(TransportError::ConnectionIssue);
                    }
                    debug!("{} {} failed: {}, retrying", method, path, err);
                }
            }

            attempt += 1;
            if attempt > MAX_RETRY {
                return Err(TransportError::RetriesExhausted { attempts: MAX_RETRY });
            }
            tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
        }
    }

    fn base_headers(&self, extra: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Shopify-Access-Token",
            HeaderValue::from_str(&self.password).unwrap_or(HeaderValue::from_static("")),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!(
                "weft/{} ({}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH,
            ))
            .expect("static user agent"),
        );
        if self.theme_access {
            if let Ok(value) = HeaderValue::from_str(&self.domain) {
                headers.insert("X-Shopify-Shop", value);
            }
        }
        for (name, value) in extra {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

fn parse_base_url(domain: &str) -> Result<Url> {
    let raw = if domain.contains("://") {
        domain.to_string()
    } else if domain.starts_with("127.0.0.1") {
        // local test servers speak plain http
        format!("http://{}", domain)
    } else {
        format!("https://{}", domain)
    };
    Url::parse(&raw).map_err(|_| TransportError::InvalidDomain(domain.to_string()))
}

fn retry_after(resp: &Response) -> Duration {
    resp.headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::from_secs(1))
}

fn is_dns_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        let text = current.to_string();
        if text.contains("dns error")
            || text.contains("no such host")
            || text.contains("failed to lookup address")
        {
            return true;
        }
        source = current.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server_url: &str) -> Transport {
        Transport::new(Params {
            domain: server_url.to_string(),
            password: "secret".to_string(),
            ..Params::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_sends_auth_and_content_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta.json"))
            .and(header("X-Shopify-Access-Token", "secret"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());
        let resp = transport.get("/meta.json").await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_client_errors_returned_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());
        let resp = transport.get("/meta.json").await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_server_errors_retry_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta.json"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/meta.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());
        let resp = transport.get("/meta.json").await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutations_before_any_io() {
        let server = MockServer::start().await;
        // no mocks mounted: a dispatched request would 404 the mock server
        let transport = Transport::new(Params {
            domain: server.uri(),
            password: "secret".to_string(),
            read_only: true,
            ..Params::default()
        })
        .unwrap();

        let err = transport
            .put("/assets.json", &serde_json::json!({}), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ReadOnlyEnvironment));

        // reads still pass through
        assert!(transport.get("/meta.json").await.is_ok());
    }

    #[tokio::test]
    async fn test_theme_access_password_reroutes_through_proxy() {
        let shop_server = MockServer::start().await;
        let access_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta.json"))
            .and(header("X-Shopify-Shop", shop_server.uri().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&access_server)
            .await;

        let transport = Transport::new(Params {
            domain: shop_server.uri(),
            password: "shptka_00000000000000000000000000000000".to_string(),
            theme_access_url: Some(access_server.uri()),
            ..Params::default()
        })
        .unwrap();

        let resp = transport.get("/meta.json").await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(shop_server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_proxy_rejected() {
        let err = Transport::new(Params {
            domain: "shop.myshopify.com".to_string(),
            password: "secret".to_string(),
            proxy: "://not-a-url".to_string(),
            ..Params::default()
        })
        .unwrap_err();
        assert!(matches!(err, TransportError::InvalidProxyUrl(_)));
    }
}
