use axum::http::{HeaderMap, HeaderName};
use opentelemetry::{
    Context,
    propagation::{Extractor, TextMapPropagator},
};

/// Reads propagated trace parent information from HTTP request headers.
///
/// This is the inbound half of the propagation bridge: when a request already
/// carries a trace parent, the Tower [`Layer`][1] uses this extractor to link
/// the server span to the caller's trace. See [`TraceService::call`][2].
///
/// [1]: tower::Layer
/// [2]: tower::Service::call
pub struct HeaderExtractor<'a>(pub(crate) &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|header_value| header_value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

impl<'a> HeaderExtractor<'a> {
    /// Create a new header extractor from a reference to a [`HeaderMap`].
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self(headers)
    }

    /// Extracts a [`Context`] from the HTTP headers using the given
    /// propagator.
    ///
    /// Headers which the propagator does not recognize leave the returned
    /// context without a remote span, which downstream span creation treats
    /// as the start of a new trace.
    pub fn extract_context(&self, propagator: &impl TextMapPropagator) -> Context {
        propagator.extract(self)
    }
}
