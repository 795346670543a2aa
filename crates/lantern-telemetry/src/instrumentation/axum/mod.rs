//! This module contains types which can be used as [`axum`] layers to trace
//! every inbound HTTP request with the OpenTelemetry SDK.
//!
//! For each request the middleware extracts propagated trace context from the
//! request headers, starts one server span, makes the span's context
//! available to handlers through the [`TraceContext`] request extension, and
//! guarantees the span is ended exactly once when request handling completes,
//! no matter how it completes.
//!
//! The tracer provider and the propagator are owned by the layer and flow in
//! through its constructor. Nothing in here touches [`opentelemetry::global`],
//! so the whole middleware can be tested against an in-memory provider.
use std::{future::Future, net::SocketAddr, ops::Deref, sync::Arc, task::Poll};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request},
    http::header::{CONTENT_LENGTH, USER_AGENT},
    response::Response,
};
use futures_util::ready;
use opentelemetry::{
    Context, KeyValue,
    propagation::TextMapCompositePropagator,
    trace::{SpanKind, Status, TraceContextExt, Tracer, TracerProvider},
};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_semantic_conventions::attribute::{
    CLIENT_ADDRESS, HTTP_REQUEST_BODY_SIZE, HTTP_RESPONSE_BODY_SIZE, HTTP_RESPONSE_STATUS_CODE,
    HTTP_ROUTE, URL_QUERY, URL_SCHEME, USER_AGENT_ORIGINAL,
};
use pin_project::pin_project;
use tower::{Layer, Service};
use tracing::{debug, instrument};

use crate::span::{self, ATTR_HTTP_PATH, ATTR_REQUEST_METHOD, SpanOptions};

mod extractor;
mod injector;

pub use extractor::*;
pub use injector::*;

/// Span event recorded when the request carries a body.
const EVENT_READ: &str = "read";

/// Span event recorded when the response carries a body.
const EVENT_WRITE: &str = "write";

/// The active trace context of the request being handled.
///
/// The [`TraceService`] inserts this into the request extensions before the
/// inner handler runs, so handlers can retrieve it with the axum `Extension`
/// extractor and pass it to [`crate::span::add_span_attributes`] or
/// [`crate::span::create_span`].
#[derive(Clone, Debug, Default)]
pub struct TraceContext(Context);

impl TraceContext {
    /// Wraps an OpenTelemetry [`Context`].
    pub fn new(context: Context) -> Self {
        Self(context)
    }

    /// Returns the trace context stored in the request extensions, if the
    /// request passed through the [`TraceService`].
    pub fn from_request(req: &Request) -> Option<&Self> {
        req.extensions().get::<Self>()
    }

    /// Returns the wrapped OpenTelemetry [`Context`].
    pub fn context(&self) -> &Context {
        &self.0
    }
}

impl Deref for TraceContext {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A Tower [`Layer`][1] which decorates [`TraceService`].
///
/// ### Example with Axum
///
/// ```
/// use lantern_telemetry::AxumTraceLayer;
/// use axum::{routing::get, Router};
/// use opentelemetry_sdk::trace::SdkTracerProvider;
///
/// let tracer_provider = SdkTracerProvider::builder().build();
/// let trace_layer = AxumTraceLayer::new("lantern-backend", tracer_provider);
/// let router = Router::new()
///     .route("/", get(|| async { "Hello, World!" }))
///     .layer(trace_layer);
///
/// # let _: Router = router;
/// ```
///
/// This layer is implemented based on [this][1] official Tower guide.
///
/// [1]: https://github.com/tower-rs/tower/blob/master/guides/building-a-middleware-from-scratch.md
#[derive(Clone)]
pub struct TraceLayer<P> {
    service_name: &'static str,
    tracer_provider: P,
    propagator: Arc<TextMapCompositePropagator>,
}

impl<P> TraceLayer<P> {
    /// Creates a new trace layer for the given service.
    ///
    /// Spans created by this layer are named after the matched route, with
    /// `service_name` as the fallback when no route matched. Trace context is
    /// read from and written to headers with a composite propagator speaking
    /// both the W3C trace-context and baggage formats.
    #[instrument(name = "create_trace_layer", skip(tracer_provider))]
    pub fn new(service_name: &'static str, tracer_provider: P) -> Self {
        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);

        Self {
            service_name,
            tracer_provider,
            propagator: Arc::new(propagator),
        }
    }
}

impl<S, P> Layer<S> for TraceLayer<P>
where
    P: Clone,
{
    type Service = TraceService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            service_name: self.service_name,
            tracer_provider: self.tracer_provider.clone(),
            propagator: Arc::clone(&self.propagator),
        }
    }
}

/// A Tower [`Service`] which traces every inbound request.
///
/// Span start strictly precedes the inner handler invocation and span end
/// strictly follows its completion. Exactly one span is started and ended per
/// request, also when the inner handler fails or the connection is aborted
/// mid-request.
#[derive(Clone)]
pub struct TraceService<S, P> {
    inner: S,
    service_name: &'static str,
    tracer_provider: P,
    propagator: Arc<TextMapCompositePropagator>,
}

impl<S, P> Service<Request> for TraceService<S, P>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Error: std::error::Error + 'static,
    S::Future: Send + 'static,
    P: TracerProvider,
    <P::Tracer as Tracer>::Span: Send + Sync + 'static,
{
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;
    type Response = S::Response;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let parent = HeaderExtractor::new(req.headers()).extract_context(self.propagator.as_ref());
        let span_name = req.span_name(self.service_name);

        debug!(
            span_name,
            http_method = %req.method(),
            url = ?req.uri(),
            "start http request span"
        );

        let mut attributes = Vec::with_capacity(8);

        if let Some(query) = req.uri().query() {
            attributes.push(KeyValue::new(URL_QUERY, query.to_owned()));
        }
        if let Some(scheme) = req.uri().scheme_str() {
            attributes.push(KeyValue::new(URL_SCHEME, scheme.to_owned()));
        }
        if let Some(user_agent) = req.user_agent() {
            attributes.push(KeyValue::new(USER_AGENT_ORIGINAL, user_agent.to_owned()));
        }
        if let Some(client_socket_address) = req.client_socket_address() {
            attributes.push(KeyValue::new(
                CLIENT_ADDRESS,
                client_socket_address.ip().to_string(),
            ));
        }
        if let Some(http_route) = req.matched_path() {
            attributes.push(KeyValue::new(HTTP_ROUTE, http_route.as_str().to_owned()));
        }

        attributes.push(KeyValue::new(ATTR_REQUEST_METHOD, req.method().to_string()));
        attributes.push(KeyValue::new(ATTR_HTTP_PATH, req.uri().path().to_owned()));

        let context = span::start_span(&self.tracer_provider, span_name, SpanOptions {
            kind: Some(SpanKind::Server),
            attributes,
            parent: Some(parent),
        });

        if let Some(body_size) = req.request_body_size() {
            context
                .span()
                .add_event(EVENT_READ, vec![KeyValue::new(
                    HTTP_REQUEST_BODY_SIZE,
                    body_size,
                )]);
        }

        req.extensions_mut().insert(TraceContext::new(context.clone()));

        let future = {
            let _guard = context.clone().attach();
            self.inner.call(req)
        };

        ResponseFuture {
            future,
            guard: SpanGuard::new(context),
            propagator: Arc::clone(&self.propagator),
        }
    }
}

/// This future contains the inner service future and the span guard which
/// closes the request span on every exit path.
#[pin_project]
pub struct ResponseFuture<F> {
    #[pin]
    future: F,
    guard: SpanGuard,
    propagator: Arc<TextMapCompositePropagator>,
}

impl<F, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response, E>>,
    E: std::error::Error + 'static,
{
    type Output = Result<Response, E>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.project();
        let _guard = this.guard.context().clone().attach();

        let mut result = ready!(this.future.poll(cx));
        this.guard.finalize(&mut result, this.propagator);

        Poll::Ready(result)
    }
}

/// Closes the request span exactly once.
///
/// The normal path runs [`SpanGuard::finalize`] when the inner future
/// resolves. If the future is dropped before that, for example because the
/// client disconnected, the [`Drop`] implementation still ends the span.
struct SpanGuard {
    context: Context,
    ended: bool,
}

impl SpanGuard {
    fn new(context: Context) -> Self {
        Self {
            context,
            ended: false,
        }
    }

    fn context(&self) -> &Context {
        &self.context
    }

    /// Finalize the span with the outcome of the inner service.
    ///
    /// On success the response status code is recorded (5xx marks the span
    /// errored), the response `write` event is added, and the span context is
    /// injected into the response headers. On error the span is closed
    /// through [`span::end_span`], which records the error. The error itself
    /// is left untouched for the caller.
    fn finalize<E>(&mut self, result: &mut Result<Response, E>, propagator: &TextMapCompositePropagator)
    where
        E: std::error::Error + 'static,
    {
        match result {
            Ok(response) => {
                let status_code = response.status();

                {
                    let span = self.context.span();
                    span.set_attribute(KeyValue::new(
                        HTTP_RESPONSE_STATUS_CODE,
                        i64::from(status_code.as_u16()),
                    ));

                    if status_code.is_server_error() {
                        span.set_status(Status::error(status_code.to_string()));
                    }

                    if let Some(body_size) = content_length(response.headers()) {
                        span.add_event(EVENT_WRITE, vec![KeyValue::new(
                            HTTP_RESPONSE_BODY_SIZE,
                            body_size,
                        )]);
                    }
                }

                HeaderInjector::new(response.headers_mut())
                    .inject_context(propagator, &self.context);
                span::end_span(&self.context, None);
            }
            Err(error) => span::end_span(&self.context, Some(error)),
        }

        self.ended = true;
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.ended {
            debug!("request span dropped before completion, ending span");
            span::end_span(&self.context, None);
        }
    }
}

/// This trait provides various helper functions to extract data from a
/// HTTP [`Request`].
pub trait RequestExt {
    /// Returns the client socket address, if available.
    fn client_socket_address(&self) -> Option<SocketAddr>;

    /// Returns the matched path, like `/object/{object_id}/tags`.
    ///
    /// The returned path has low cardinality. It will never contain any path
    /// or query parameter.
    fn matched_path(&self) -> Option<&MatchedPath>;

    /// Returns the span name.
    ///
    /// The format is `{method} {http.route}`, falling back to
    /// `{method} {service_name}` when no route matched. Examples are:
    ///
    /// - `GET /api/v1/pods`
    /// - `PUT /api/v1/namespaces/{namespace}`
    /// - `OPTIONS lantern-backend`
    fn span_name(&self, service_name: &str) -> String;

    /// Returns the user agent, if available.
    fn user_agent(&self) -> Option<&str>;

    /// Returns the declared request body size in bytes, if the request
    /// carries a non-empty `Content-Length` header.
    fn request_body_size(&self) -> Option<i64>;
}

impl RequestExt for Request {
    fn client_socket_address(&self) -> Option<SocketAddr> {
        self.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0)
    }

    fn matched_path(&self) -> Option<&MatchedPath> {
        self.extensions().get::<MatchedPath>()
    }

    fn span_name(&self, service_name: &str) -> String {
        let http_method = self.method().as_str();

        match self.matched_path() {
            Some(matched_path) => format!("{http_method} {}", matched_path.as_str()),
            None => format!("{http_method} {service_name}"),
        }
    }

    fn user_agent(&self) -> Option<&str> {
        self.headers()
            .get(USER_AGENT)
            .and_then(|ua| ua.to_str().ok())
    }

    fn request_body_size(&self) -> Option<i64> {
        content_length(self.headers()).filter(|size| *size > 0)
    }
}

fn content_length(headers: &axum::http::HeaderMap) -> Option<i64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use axum::{
        Extension, Router,
        body::Body,
        http::{Method, StatusCode, header},
        routing::{get, post},
    };
    use opentelemetry::trace::{SpanId, TraceId};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
    use tower::ServiceExt;

    use super::*;

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    fn test_provider() -> (SdkTracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();

        (provider, exporter)
    }

    fn last_attribute(span: &SpanData, key: &str) -> Option<String> {
        span.attributes
            .iter()
            .rev()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    #[tokio::test]
    async fn continues_propagated_trace() {
        let (provider, exporter) = test_provider();
        let router = Router::new()
            .route("/api/v1/pods", get(|| async { "ok" }))
            .layer(TraceLayer::new("lantern-backend", provider));

        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/pods")
            .header("traceparent", TRACEPARENT)
            .body(Body::empty())
            .expect("request must build");

        let response = router.oneshot(request).await.expect("handler must succeed");
        assert_eq!(response.status(), StatusCode::OK);

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans.len(), 1);

        let span = &spans[0];
        assert_eq!(span.name, "GET /api/v1/pods");
        assert_eq!(span.span_kind, SpanKind::Server);
        assert_eq!(
            span.span_context.trace_id(),
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").expect("valid trace id")
        );
        assert_eq!(
            span.parent_span_id,
            SpanId::from_hex("b7ad6b7169203331").expect("valid span id")
        );
        assert_eq!(
            last_attribute(span, ATTR_REQUEST_METHOD).as_deref(),
            Some("GET")
        );
        assert_eq!(
            last_attribute(span, ATTR_HTTP_PATH).as_deref(),
            Some("/api/v1/pods")
        );
        assert_eq!(
            last_attribute(span, HTTP_RESPONSE_STATUS_CODE).as_deref(),
            Some("200")
        );
    }

    #[tokio::test]
    async fn starts_new_trace_without_traceparent() {
        let (provider, exporter) = test_provider();
        let router = Router::new()
            .route("/api/v1/pods", get(|| async { "ok" }))
            .layer(TraceLayer::new("lantern-backend", provider));

        let request = Request::builder()
            .uri("/api/v1/pods")
            .body(Body::empty())
            .expect("request must build");

        router.oneshot(request).await.expect("handler must succeed");

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans.len(), 1);
        assert_ne!(spans[0].span_context.trace_id(), TraceId::INVALID);
        assert_eq!(spans[0].parent_span_id, SpanId::INVALID);
    }

    #[tokio::test]
    async fn server_error_marks_span_errored() {
        let (provider, exporter) = test_provider();
        let router = Router::new()
            .route(
                "/api/v1/pods",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .layer(TraceLayer::new("lantern-backend", provider));

        let request = Request::builder()
            .uri("/api/v1/pods")
            .body(Body::empty())
            .expect("request must build");

        router.oneshot(request).await.expect("handler must succeed");

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans.len(), 1);
        assert!(matches!(spans[0].status, Status::Error { .. }));
        assert_eq!(
            last_attribute(&spans[0], HTTP_RESPONSE_STATUS_CODE).as_deref(),
            Some("500")
        );
    }

    #[tokio::test]
    async fn injects_trace_parent_into_response_headers() {
        let (provider, exporter) = test_provider();
        let router = Router::new()
            .route("/api/v1/pods", get(|| async { "ok" }))
            .layer(TraceLayer::new("lantern-backend", provider));

        let request = Request::builder()
            .uri("/api/v1/pods")
            .body(Body::empty())
            .expect("request must build");

        let response = router.oneshot(request).await.expect("handler must succeed");

        let spans = exporter.get_finished_spans().expect("spans must export");
        let trace_id = spans[0].span_context.trace_id().to_string();

        let traceparent = response
            .headers()
            .get("traceparent")
            .expect("traceparent header must be injected")
            .to_str()
            .expect("traceparent header must be ascii");
        assert!(traceparent.contains(&trace_id));
    }

    #[tokio::test]
    async fn aborted_request_still_ends_span() {
        let (provider, exporter) = test_provider();
        let router = Router::new()
            .route(
                "/api/v1/pods",
                get(|| async {
                    std::future::pending::<()>().await;
                    "unreachable"
                }),
            )
            .layer(TraceLayer::new("lantern-backend", provider));

        let request = Request::builder()
            .uri("/api/v1/pods")
            .body(Body::empty())
            .expect("request must build");

        // The timeout drops the in-flight response future, simulating a
        // client disconnect.
        let result = tokio::time::timeout(Duration::from_millis(20), router.oneshot(request)).await;
        assert!(result.is_err());

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "GET /api/v1/pods");
    }

    #[tokio::test]
    async fn handlers_reach_the_span_through_trace_context() {
        let (provider, exporter) = test_provider();
        let router = Router::new()
            .route(
                "/api/v1/pods",
                get(|Extension(cx): Extension<TraceContext>| async move {
                    span::add_span_attributes(&cx, [KeyValue::new("namespace", "default")]);
                    "ok"
                }),
            )
            .layer(TraceLayer::new("lantern-backend", provider));

        let request = Request::builder()
            .uri("/api/v1/pods")
            .body(Body::empty())
            .expect("request must build");

        router.oneshot(request).await.expect("handler must succeed");

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(
            last_attribute(&spans[0], "namespace").as_deref(),
            Some("default")
        );
    }

    #[tokio::test]
    async fn records_read_and_write_body_events() {
        let (provider, exporter) = test_provider();
        let router = Router::new()
            .route(
                "/api/v1/pods",
                post(|| async { ([(header::CONTENT_LENGTH, "2")], "ok") }),
            )
            .layer(TraceLayer::new("lantern-backend", provider));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/pods")
            .header(header::CONTENT_LENGTH, "4")
            .body(Body::from("ping"))
            .expect("request must build");

        router.oneshot(request).await.expect("handler must succeed");

        let spans = exporter.get_finished_spans().expect("spans must export");
        let span = &spans[0];

        let read = span
            .events
            .iter()
            .find(|event| event.name == EVENT_READ)
            .expect("read event must be recorded");
        assert!(
            read.attributes
                .iter()
                .any(|kv| kv.key.as_str() == HTTP_REQUEST_BODY_SIZE && kv.value.to_string() == "4")
        );

        let write = span
            .events
            .iter()
            .find(|event| event.name == EVENT_WRITE)
            .expect("write event must be recorded");
        assert!(
            write
                .attributes
                .iter()
                .any(|kv| kv.key.as_str() == HTTP_RESPONSE_BODY_SIZE && kv.value.to_string() == "2")
        );
    }

    #[tokio::test]
    async fn fallback_span_name_uses_the_service_name() {
        let (provider, exporter) = test_provider();
        let mut service = TraceLayer::new("lantern-backend", provider)
            .layer(tower::service_fn(|_req: Request| async {
                Ok::<_, std::convert::Infallible>(Response::new(Body::empty()))
            }));

        let request = Request::builder()
            .uri("/unrouted")
            .body(Body::empty())
            .expect("request must build");

        service
            .ready()
            .await
            .expect("service must become ready")
            .call(request)
            .await
            .expect("handler must succeed");

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans[0].name, "GET lantern-backend");
    }
}
