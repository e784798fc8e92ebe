//! Request/response model and the transport seam.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use reqjob_core::schema::{FileSpec, Method};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::HttpError;
use crate::prepare::{ClientArgs, ClientCert, TlsVerify};

/// Credentials attached to a request.
#[derive(Debug)]
pub enum Auth {
    Basic {
        username: String,
        password: SecretString,
    },
    Bearer(SecretString),
    /// Sent as `Proxy-Authorization`.
    Proxy {
        username: String,
        password: SecretString,
    },
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

impl Clone for Auth {
    fn clone(&self) -> Self {
        match self {
            Auth::Basic { username, password } => Auth::Basic {
                username: username.clone(),
                password: copy_secret(password),
            },
            Auth::Bearer(token) => Auth::Bearer(copy_secret(token)),
            Auth::Proxy { username, password } => Auth::Proxy {
                username: username.clone(),
                password: copy_secret(password),
            },
        }
    }
}

impl Auth {
    /// The header carrying these credentials.
    pub fn header(&self) -> (&'static str, String) {
        let basic = |user: &str, pass: &SecretString| {
            let raw = format!("{user}:{}", pass.expose_secret());
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(raw)
            )
        };
        match self {
            Auth::Basic { username, password } => ("authorization", basic(username, password)),
            Auth::Bearer(token) => ("authorization", format!("Bearer {}", token.expose_secret())),
            Auth::Proxy { username, password } => {
                ("proxy-authorization", basic(username, password))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(serde_json::Value),
    Content(Vec<u8>),
    Form(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<FileSpec>,
    },
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL without the query.
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: Body,
    pub auth: Option<Auth>,
    /// Overrides the client timeout.
    pub timeout: Option<Duration>,
    pub allow_redirects: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Body::Empty,
            auth: None,
            timeout: None,
            allow_redirects: true,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// URL including the encoded query string.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}{query}", self.url)
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// What was sent, as recorded on the response.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSummary {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// e.g. `HTTP/1.1`.
    pub http_version: String,
    /// Final URL after redirects.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub request: RequestSummary,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            http_version: "HTTP/1.1".to_string(),
            url: String::new(),
            headers: Vec::new(),
            body: body.into(),
            elapsed: Duration::ZERO,
            request: RequestSummary {
                method: Method::Get,
                url: String::new(),
                headers: Vec::new(),
            },
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn reason_phrase(&self) -> &'static str {
        reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
    }

    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308) && self.header("location").is_some()
    }

    /// `charset` parameter of the content type, lowercased.
    pub fn charset(&self) -> Option<String> {
        let content_type = self.header("content-type")?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Name/value pairs from `Set-Cookie`.
    pub fn cookies(&self) -> BTreeMap<String, String> {
        self.header_all("set-cookie")
            .filter_map(|raw| {
                let pair = raw.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    /// Entries of the `Link` header keyed by `rel`, or by URL when it has none.
    pub fn links(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for header in self.header_all("link") {
            for entry in header.split(',') {
                let mut parts = entry.split(';');
                let Some(target) = parts.next() else { continue };
                let url = target.trim().trim_start_matches('<').trim_end_matches('>');
                if url.is_empty() {
                    continue;
                }
                let mut link = BTreeMap::from([("url".to_string(), url.to_string())]);
                for param in parts {
                    if let Some((k, v)) = param.split_once('=') {
                        link.insert(
                            k.trim().to_ascii_lowercase(),
                            v.trim().trim_matches('"').to_string(),
                        );
                    }
                }
                let key = link.get("rel").cloned().unwrap_or_else(|| url.to_string());
                out.insert(key, link);
            }
        }
        out
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        (**self).send(request).await
    }
}

/// reqwest-backed client scoped to one job.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    max_redirects: usize,
    connections: Arc<Semaphore>,
}

impl ReqwestHttpClient {
    pub fn new(args: &ClientArgs) -> Result<Self, HttpError> {
        // Redirects are followed by hand so `allow_redirects` can vary per request.
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("reqjob/", env!("CARGO_PKG_VERSION")))
            .timeout(args.timeout)
            .pool_max_idle_per_host(args.limits.max_keepalive_connections);

        builder = match (args.http1, args.http2) {
            (true, false) => builder.http1_only(),
            (false, true) => builder.http2_prior_knowledge(),
            _ => builder,
        };
        if !args.trust_env {
            builder = builder.no_proxy();
        }
        for (scheme, target) in &args.proxies {
            let proxy = match scheme.trim_end_matches("://") {
                "http" => reqwest::Proxy::http(target),
                "https" => reqwest::Proxy::https(target),
                _ => reqwest::Proxy::all(target),
            }
            .map_err(|e| HttpError::InvalidRequest(format!("proxy {scheme}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        match &args.verify {
            TlsVerify::Enabled(true) => {}
            TlsVerify::Enabled(false) => builder = builder.danger_accept_invalid_certs(true),
            TlsVerify::CaPem(pem) => {
                for cert in reqwest::Certificate::from_pem_bundle(pem)
                    .map_err(|e| HttpError::InvalidRequest(format!("CA bundle: {e}")))?
                {
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
        if let Some(ClientCert { pem }) = &args.cert {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| HttpError::InvalidRequest(format!("client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(map_reqwest_error)?;
        Ok(Self {
            client,
            max_redirects: args.max_redirects,
            connections: Arc::new(Semaphore::new(
                args.limits.max_connections.clamp(1, Semaphore::MAX_PERMITS),
            )),
        })
    }

    async fn send_once(
        &self,
        request: &HttpRequest,
        method: Method,
        url: &str,
        hop: Hop,
    ) -> Result<reqwest::Response, HttpError> {
        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
        let mut rb = self.client.request(method, url);
        if let Some(timeout) = request.timeout {
            rb = rb.timeout(timeout);
        }
        for (k, v) in hop.headers(&request.headers) {
            rb = rb.header(k, v);
        }
        if hop.with_credentials && !request.cookies.is_empty() {
            let cookie = request
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            rb = rb.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(auth) = request.auth.as_ref().filter(|_| hop.with_credentials) {
            let (name, value) = auth.header();
            rb = rb.header(name, value);
        }
        if hop.with_body {
            rb = match &request.body {
                Body::Empty => rb,
                Body::Json(json) => rb.json(json),
                Body::Content(bytes) => rb.body(bytes.clone()),
                Body::Form(pairs) => rb.form(pairs),
                Body::Multipart { fields, files } => rb.multipart(multipart(fields, files).await?),
            };
        }
        rb.send().await.map_err(map_reqwest_error)
    }
}

/// What the next hop of a redirect chain still carries.
#[derive(Debug, Clone, Copy)]
struct Hop {
    with_body: bool,
    /// Cleared for good once a redirect changes scheme, host or port.
    with_credentials: bool,
}

impl Default for Hop {
    fn default() -> Self {
        Self {
            with_body: true,
            with_credentials: true,
        }
    }
}

impl Hop {
    fn headers<'a>(
        self,
        headers: &'a [(String, String)],
    ) -> impl Iterator<Item = &'a (String, String)> + 'a {
        headers
            .iter()
            .filter(move |(k, _)| self.with_credentials || !is_credential_header(k))
    }
}

fn is_credential_header(name: &str) -> bool {
    ["authorization", "proxy-authorization", "cookie", "cookie2", "www-authenticate"]
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

async fn multipart(
    fields: &[(String, String)],
    files: &[FileSpec],
) -> Result<reqwest::multipart::Form, HttpError> {
    let mut form = reqwest::multipart::Form::new();
    for (k, v) in fields {
        form = form.text(k.clone(), v.clone());
    }
    for file in files {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| HttpError::InvalidRequest(format!("{}: {e}", file.path.display())))?;
        let name = file.name.clone().unwrap_or_else(|| file_name(&file.path));
        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(name);
        if let Some(media_type) = &file.media_type {
            part = part
                .mime_str(media_type)
                .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
        }
        form = form.part(file.key.clone(), part);
    }
    Ok(form)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let _permit = self
            .connections
            .acquire()
            .await
            .map_err(|e| HttpError::Other(e.to_string()))?;
        let started = Instant::now();

        let mut method = request.method;
        let mut url = request.full_url();
        let mut hop = Hop::default();
        let mut redirects = 0;
        let resp = loop {
            let resp = self.send_once(&request, method, &url, hop).await?;
            let status = resp.status().as_u16();
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok());
            let next = match location {
                Some(location) if request.allow_redirects && resp.status().is_redirection() => {
                    resp.url().join(location).ok()
                }
                _ => None,
            };
            let Some(next) = next else { break resp };
            redirects += 1;
            if redirects > self.max_redirects {
                return Err(HttpError::TooManyRedirects {
                    max: self.max_redirects,
                });
            }
            debug!(status, from = %url, to = %next, "following redirect");
            if status == 303 || (matches!(status, 301 | 302) && method == Method::Post) {
                method = Method::Get;
                hop.with_body = false;
            }
            if hop.with_credentials && resp.url().origin() != next.origin() {
                debug!(to = %next, "redirect leaves the origin, dropping credentials");
                hop.with_credentials = false;
            }
            url = next.to_string();
        };

        let status = resp.status().as_u16();
        let http_version = format!("{:?}", resp.version());
        let final_url = resp.url().to_string();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            http_version,
            url: final_url,
            headers,
            body,
            elapsed: started.elapsed(),
            request: RequestSummary {
                method,
                url,
                headers: hop.headers(&request.headers).cloned().collect(),
            },
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        return HttpError::Timeout;
    }
    if e.is_connect() || e.is_request() {
        return HttpError::Network(e.to_string());
    }
    if e.is_builder() {
        return HttpError::InvalidRequest(e.to_string());
    }
    HttpError::Other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header_is_base64() {
        let auth = Auth::Basic {
            username: "user".into(),
            password: SecretString::from("pass"),
        };
        assert_eq!(auth.header(), ("authorization", "Basic dXNlcjpwYXNz".to_string()));
    }

    #[test]
    fn credential_headers_stay_on_the_origin() {
        let headers = vec![
            ("Authorization".to_string(), "Bearer t".to_string()),
            ("X-Trace".to_string(), "1".to_string()),
            ("Cookie".to_string(), "sid=1".to_string()),
        ];
        assert_eq!(Hop::default().headers(&headers).count(), 3);
        let foreign = Hop {
            with_body: true,
            with_credentials: false,
        };
        let kept: Vec<_> = foreign.headers(&headers).map(|(k, _)| k.as_str()).collect();
        assert_eq!(kept, ["X-Trace"]);
    }

    #[test]
    fn full_url_encodes_the_query() {
        let mut request = HttpRequest::new(Method::Get, "http://x/a");
        request.query.push(("q".into(), "a b&c".into()));
        request.query.push(("page".into(), "2".into()));
        assert_eq!(request.full_url(), "http://x/a?q=a+b%26c&page=2");
    }

    #[test]
    fn response_helpers() {
        let response = HttpResponse::new(302, "")
            .with_header("Location", "/next")
            .with_header("Content-Type", "text/html; charset=UTF-8")
            .with_header("Set-Cookie", "sid=abc; Path=/")
            .with_header("Link", r#"<https://x/p2>; rel="next", <https://x/p9>; rel="last""#);
        assert!(response.is_redirect());
        assert!(!response.is_error());
        assert_eq!(response.reason_phrase(), "Found");
        assert_eq!(response.charset().as_deref(), Some("utf-8"));
        assert_eq!(response.cookies().get("sid").map(String::as_str), Some("abc"));
        let links = response.links();
        assert_eq!(links["next"]["url"], "https://x/p2");
        assert_eq!(links["last"]["rel"], "last");
    }
}
