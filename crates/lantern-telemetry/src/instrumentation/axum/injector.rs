use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::{
    Context,
    propagation::{Injector, TextMapPropagator},
};

/// Writes trace parent information into HTTP headers.
///
/// This is the outbound half of the propagation bridge. The Tower
/// [`Layer`][1] uses it to stamp the server span's context onto response
/// headers so HTTP clients can link up their own spans, and it works just as
/// well on outgoing client requests.
///
/// Invalid header names or values are silently skipped, matching the
/// fire-and-forget nature of telemetry.
///
/// [1]: tower::Layer
pub struct HeaderInjector<'a>(pub(crate) &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(header_name) = HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                self.0.insert(header_name, header_value);
            }
        }
    }
}

impl<'a> HeaderInjector<'a> {
    /// Create a new header injector from a mutable reference to a
    /// [`HeaderMap`].
    pub fn new(headers: &'a mut HeaderMap) -> Self {
        Self(headers)
    }

    /// Injects the given [`Context`] into the HTTP headers using the given
    /// propagator.
    pub fn inject_context(&mut self, propagator: &impl TextMapPropagator, cx: &Context) {
        propagator.inject_context(cx, self);
    }
}
