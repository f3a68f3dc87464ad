//! Generic HTTP-backed [`SourceClient`] for the built-in providers.
//!
//! Each provider gets a fixed route (endpoint, method, parameter mapping and
//! auth placement) and shares the same status classification:
//!
//! | Upstream outcome | Classification |
//! |------------------|----------------|
//! | 2xx with JSON body | payload |
//! | 2xx with non-JSON body | Fatal |
//! | 429 | RateLimited (`Retry-After` seconds honoured) |
//! | 408, 5xx, timeout, connect failure | Transient |
//! | 400, 422 | Invalid |
//! | any other status | Fatal |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::report::duration_ms;
use crate::{
    ConnectionPool, Credential, HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpRequest,
    HttpResponse, Payload, RequestDescriptor, Requirements, SourceClient, SourceConfig,
    SourceError, SourceFuture, SourceId,
};

/// Source client that talks to a provider's REST API through an [`HttpClient`].
pub struct HttpSource {
    id: SourceId,
    base_url: String,
    timeout: Duration,
    auth: HttpAuth,
    client: Arc<dyn HttpClient>,
    pool: ConnectionPool,
}

impl HttpSource {
    pub fn new(id: SourceId, config: &SourceConfig, client: Arc<dyn HttpClient>) -> Self {
        Self {
            id,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            timeout: config.timeout,
            auth: auth_for(id, config.credential.as_ref()),
            client,
            pool: ConnectionPool::new(config.max_connections),
        }
    }

    /// Fields each built-in provider needs before it can be queried.
    pub const fn requirements_for(id: SourceId) -> Requirements {
        match id {
            SourceId::Census | SourceId::Dataweb => Requirements::new(true, false, true, false),
            SourceId::FederalRegister | SourceId::Gnews => {
                Requirements::new(true, false, false, false)
            }
            SourceId::Bea => Requirements::new(false, false, true, false),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn build_request(&self, params: &BTreeMap<String, String>) -> HttpRequest {
        let param = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();
        let code = param("product_code");
        let year = param("year");
        let search_term = params
            .get("topic")
            .cloned()
            .unwrap_or_else(|| format!("tariff {code}").trim().to_owned());

        let request = match self.id {
            SourceId::Census => {
                let level = format!("HS{}", code.len().min(10));
                HttpRequest::get(format!("{}/timeseries/intltrade/imports/hs", self.base_url))
                    .with_query("get", "I_COMMODITY_LDESC,GEN_VAL_MO,GEN_QY1_MO")
                    .with_query("COMM_LVL", level)
                    .with_query("I_COMMODITY", code)
                    .with_query("time", format!("{year}-12"))
            }
            SourceId::Dataweb => {
                let partner = params
                    .get("country")
                    .cloned()
                    .unwrap_or_else(|| String::from("all"));
                let body = json!({
                    "aggregateBy": ["TradeFlow", "Partner", "Commodity"],
                    "dataSelection": {
                        "dataAvailability": {
                            "tradeFlows": ["Import"],
                            "partner": [partner],
                            "commodity": [code],
                            "maxAvailableYear": year,
                            "timePeriod": "Annual",
                            "years": [year],
                        }
                    }
                });
                HttpRequest::post(format!("{}/api/v2/report2/runReport", self.base_url))
                    .with_json_body(&body)
            }
            SourceId::FederalRegister => {
                HttpRequest::get(format!("{}/documents.json", self.base_url))
                    .with_query("conditions[term]", search_term)
                    .with_query("per_page", "20")
                    .with_query("order", "newest")
            }
            SourceId::Bea => {
                let mut request = HttpRequest::get(self.base_url.clone())
                    .with_query("method", "GetData")
                    .with_query("DatasetName", "ITA")
                    .with_query("Indicator", "BalGds")
                    .with_query("Frequency", "A")
                    .with_query("Year", year)
                    .with_query("ResultFormat", "JSON");
                if let Some(country) = params.get("country") {
                    request = request.with_query("AreaOrCountry", country.as_str());
                }
                request
            }
            SourceId::Gnews => HttpRequest::get(format!("{}/search", self.base_url))
                .with_query("q", search_term)
                .with_query("lang", "en")
                .with_query("max", "10")
                .with_query("sortby", "publishedAt"),
        };

        request.with_auth(&self.auth)
    }
}

impl SourceClient for HttpSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn requirements(&self) -> Requirements {
        Self::requirements_for(self.id)
    }

    fn execute<'a>(&'a self, request: &'a RequestDescriptor) -> SourceFuture<'a> {
        Box::pin(async move {
            let _connection = self.pool.acquire_until(request.deadline).await?;

            let remaining = request.remaining();
            if remaining.is_zero() {
                return Err(SourceError::timeout("deadline reached before dispatch"));
            }
            let http_request = self
                .build_request(&request.params)
                .with_timeout_ms(duration_ms(self.timeout.min(remaining)).max(1));

            debug!(source = self.id.as_str(), "dispatching upstream request");
            let response = self
                .client
                .execute(http_request)
                .await
                .map_err(|error| classify_transport(&error))?;
            classify_response(self.id, &response)
        })
    }

    fn close(&self) {
        self.pool.close();
    }
}

fn auth_for(id: SourceId, credential: Option<&Credential>) -> HttpAuth {
    let Some(credential) = credential.cloned() else {
        return HttpAuth::None;
    };
    let query = |name: &str| HttpAuth::QueryParam {
        name: name.to_owned(),
        value: credential.clone(),
    };
    match id {
        SourceId::Census => query("key"),
        SourceId::Bea => query("UserID"),
        SourceId::Gnews => query("apikey"),
        SourceId::Dataweb => HttpAuth::BearerToken(credential.clone()),
        SourceId::FederalRegister => HttpAuth::None,
    }
}

fn classify_transport(error: &HttpError) -> SourceError {
    match error.kind() {
        HttpErrorKind::Timeout => SourceError::timeout(error.message()),
        HttpErrorKind::Connect | HttpErrorKind::Other => SourceError::transient(error.message()),
    }
}

/// Map an HTTP response onto the shared error vocabulary. Bodies of failed
/// responses are never copied into the error.
pub fn classify_response(source: SourceId, response: &HttpResponse) -> Result<Payload, SourceError> {
    let status = response.status;
    match status {
        200..=299 => serde_json::from_str(&response.body).map_err(|_| {
            SourceError::fatal(format!("{source} returned a response that is not valid JSON"))
        }),
        429 => {
            let retry_after = response
                .header("retry-after")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = match retry_after {
                Some(delay) => format!(
                    "{source} rate limit exceeded, retry after {}s",
                    delay.as_secs()
                ),
                None => format!("{source} rate limit exceeded"),
            };
            Err(SourceError::rate_limited(message, retry_after))
        }
        408 | 500..=599 => Err(SourceError::transient(format!(
            "{source} returned HTTP {status}"
        ))),
        400 | 422 => Err(SourceError::invalid(format!(
            "{source} rejected the request with HTTP {status}"
        ))),
        _ => Err(SourceError::fatal(format!(
            "{source} returned HTTP {status}"
        ))),
    }
}
