use std::time::Duration;

use fundscout_core::allowlist::DomainAllowList;
use fundscout_core::config::AppConfig;
use fundscout_core::error::AppError;
use fundscout_core::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use reqwest::{Client, Method, redirect};

const MAX_REDIRECTS: usize = 10;

/// HTTP transport using reqwest.
///
/// Every response that arrives is returned as-is, whatever its status; the
/// resilient client decides what counts as failure. Redirects are followed
/// only while they stay inside the domain allow-list.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, allow_list: DomainAllowList) -> Result<Self, AppError> {
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
            }
            let permitted = attempt
                .url()
                .host_str()
                .is_some_and(|host| allow_list.permits_host(host));
            if permitted {
                attempt.follow()
            } else {
                let target = attempt.url().to_string();
                attempt.error(format!("redirect to non-allow-listed URL {target}"))
            }
        });

        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(policy)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self { client })
    }

    /// Transport configured from the process config: user agent and the
    /// catalog's allow-list.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(&config.user_agent, config.catalog.allow_list())
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AppError> {
        let mut builder = self
            .client
            .request(to_method(request.method), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_error(e, request.timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_error(e, request.timeout))?;

        tracing::trace!(url = %request.url, status, bytes = body.len(), "Response received");
        Ok(HttpResponse::new(status, body))
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn map_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(whole_secs_rounded_up(timeout))
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

/// Seconds reported by [`AppError::Timeout`]; a partial second counts as one.
fn whole_secs_rounded_up(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}
