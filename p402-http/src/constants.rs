//! HTTP constants of the x402 exchange.

/// Header carrying the signed payment (client to server).
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Header carrying the base64 requirements document on a 402 answer.
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Header carrying the settlement proof on a paid answer.
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

/// Legacy settlement proof header.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Discovery query parameter naming the protected resource.
pub const DISCOVERY_RESOURCE_PARAM: &str = "resource";

/// Discovery query parameter naming the HTTP method.
pub const DISCOVERY_METHOD_PARAM: &str = "method";

/// Default `User-Agent` for outgoing requests.
pub const DEFAULT_USER_AGENT: &str = concat!("p402/", env!("CARGO_PKG_VERSION"));
