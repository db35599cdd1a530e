//! Fetching requirements documents.
//!
//! Requirements come either from a discovery endpoint queried with
//! `?resource=<url>&method=<METHOD>`, or from the 402 answer of an unpaid
//! call to the resource itself.

use http::{HeaderMap, Method, StatusCode};
use p402::error::PaymentError;
use p402::networks::NetworkCatalog;
use p402::proto::PaymentRequirements;
use tracing::{debug, info, instrument};
use url::Url;

use super::pending::PaidCall;
use super::response::PaidBody;
use crate::constants::{
    DISCOVERY_METHOD_PARAM, DISCOVERY_RESOURCE_PARAM, HTTP_STATUS_PAYMENT_REQUIRED,
};
use crate::headers::decode_payment_required;

/// Client for a requirements discovery endpoint.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http: reqwest::Client,
    url: Url,
}

impl DiscoveryClient {
    /// Creates a client for the endpoint at `url`.
    #[must_use]
    pub const fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    /// Discovery endpoint.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Query URL for `resource` called with `method`.
    #[must_use]
    pub fn endpoint(&self, resource: &Url, method: &Method) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair(DISCOVERY_RESOURCE_PARAM, resource.as_str())
            .append_pair(DISCOVERY_METHOD_PARAM, method.as_str());
        url
    }

    /// Fetches the requirements for `resource`.
    ///
    /// Both a 2xx and a 402 answer are read as a requirements document.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::TransportFailure`] if the endpoint cannot be
    /// reached or answers with another status, and the parse errors of
    /// [`decode_payment_required`] otherwise.
    #[instrument(
        name = "p402.discovery.fetch",
        skip_all,
        fields(resource = %resource, method = %method)
    )]
    pub async fn fetch(
        &self,
        resource: &Url,
        method: &Method,
    ) -> Result<PaymentRequirements, PaymentError> {
        let response = self
            .http
            .get(self.endpoint(resource, method))
            .send()
            .await
            .map_err(|e| PaymentError::TransportFailure(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| PaymentError::TransportFailure(e.to_string()))?;

        if !status.is_success() && status.as_u16() != HTTP_STATUS_PAYMENT_REQUIRED {
            return Err(PaymentError::TransportFailure(format!(
                "discovery answered {status}"
            )));
        }
        let requirements = decode_payment_required(&headers, &body, NetworkCatalog::global())?;
        debug!(options = requirements.accepts.len(), "requirements discovered");
        Ok(requirements)
    }
}

/// Answer to a call made without payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpaidResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Vec<u8>,
}

impl UnpaidResponse {
    /// Decodes the body as `call` expects.
    ///
    /// # Errors
    ///
    /// See [`PaidBody::decode`].
    pub fn decode(&self, call: &PaidCall) -> Result<PaidBody, PaymentError> {
        PaidBody::decode(call.kind, &self.body)
    }
}

/// Outcome of an unpaid call.
#[derive(Debug)]
pub(crate) enum Probe {
    /// The resource asked for payment.
    PaymentRequired(Result<PaymentRequirements, PaymentError>),
    /// The resource answered without asking for payment.
    Answered(UnpaidResponse),
}

/// Issues `call` without payment.
#[instrument(
    name = "p402.http.probe",
    skip_all,
    fields(method = %call.method, url = %call.url)
)]
pub(crate) async fn probe(http: &reqwest::Client, call: &PaidCall) -> Result<Probe, PaymentError> {
    let response = call
        .request(http)
        .send()
        .await
        .map_err(|e| PaymentError::TransportFailure(e.to_string()))?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| PaymentError::TransportFailure(e.to_string()))?;

    if status.as_u16() == HTTP_STATUS_PAYMENT_REQUIRED {
        info!("received 402 Payment Required");
        return Ok(Probe::PaymentRequired(decode_payment_required(
            &headers,
            &body,
            NetworkCatalog::global(),
        )));
    }
    debug!(status = status.as_u16(), "no payment required");
    Ok(Probe::Answered(UnpaidResponse {
        status,
        headers,
        body: body.to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn discovery(server: &MockServer) -> DiscoveryClient {
        let url = format!("{}/discover", server.uri()).parse().unwrap();
        DiscoveryClient::new(reqwest::Client::new(), url)
    }

    #[test]
    fn endpoint_carries_resource_and_method() {
        let client = DiscoveryClient::new(
            reqwest::Client::new(),
            "https://pay.example.com/discover".parse().unwrap(),
        );
        let url = client.endpoint(
            &"https://api.example.com/generate?size=2".parse().unwrap(),
            &Method::POST,
        );
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                (
                    "resource".to_owned(),
                    "https://api.example.com/generate?size=2".to_owned()
                ),
                ("method".to_owned(), "POST".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn fetch_parses_the_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover"))
            .and(query_param("method", "GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accepts": [{
                    "scheme": "exact",
                    "network": "base",
                    "maxAmountRequired": "2500",
                    "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                    "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
                }],
                "defaultNetwork": "base"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let requirements = discovery(&server)
            .fetch(&"https://api.example.com/generate".parse().unwrap(), &Method::GET)
            .await
            .unwrap();
        assert_eq!(requirements.accepts.len(), 1);
        assert_eq!(requirements.accepts[0].chain_id(), 8453);
    }

    #[tokio::test]
    async fn fetch_reports_malformed_and_unreachable_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/discover"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = discovery(&server);
        let resource: Url = "https://api.example.com/generate".parse().unwrap();
        let first = client.fetch(&resource, &Method::GET).await.unwrap_err();
        assert!(matches!(first, PaymentError::MalformedRequirements(_)));
        let second = client.fetch(&resource, &Method::GET).await.unwrap_err();
        assert!(matches!(second, PaymentError::TransportFailure(_)));
    }
}
