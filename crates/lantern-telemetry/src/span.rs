//! Span lifecycle helpers operating on [`Context`] values.
//!
//! These functions cover the usual lifetime of a request-scoped span: create
//! it with [`start_span`] or [`create_span`], annotate it with
//! [`add_span_attributes`], and close it with [`end_span`]. All of them take
//! the tracer provider as an explicit argument instead of reading
//! [`opentelemetry::global`], so tests and disabled-telemetry setups can
//! substitute a no-op or in-memory provider.
//!
//! The active span travels inside the [`Context`]. A context without a span
//! yields the SDK's no-op span, which absorbs attribute writes, error
//! records, and end calls harmlessly. None of these functions return errors.
use std::borrow::Cow;

use opentelemetry::{
    Context, KeyValue,
    trace::{SpanKind, Status, TraceContextExt, Tracer, TracerProvider},
};

/// Instrumentation scope used by [`start_span`].
pub const TRACER_NAME: &str = "lantern";

/// Attribute key holding the HTTP request method, like `GET`.
pub const ATTR_REQUEST_METHOD: &str = "request.method";

/// Attribute key holding the HTTP request path, like `/api/v1/pods`.
pub const ATTR_HTTP_PATH: &str = "http.path";

/// Start options accepted by [`start_span`].
#[derive(Clone, Debug, Default)]
pub struct SpanOptions {
    /// The kind of span to create. Defaults to [`SpanKind::Internal`] when
    /// unset.
    pub kind: Option<SpanKind>,

    /// Attributes attached to the span at creation time.
    pub attributes: Vec<KeyValue>,

    /// Parent linkage. When set, the new span becomes a child of the span
    /// carried by this context. When unset, the span starts a new trace.
    pub parent: Option<Context>,
}

/// Starts a new span named `name` and returns the context carrying it.
///
/// The tracer is obtained from `tracer_provider` under the fixed
/// [`TRACER_NAME`] instrumentation scope. The returned context derives from
/// the parent in `options` (or a fresh root context) and owns the span; use
/// [`Context::span`] to reach the handle, and [`end_span`] to close it.
///
/// A no-op provider yields a no-op span, so this never fails.
pub fn start_span<P>(
    tracer_provider: &P,
    name: impl Into<Cow<'static, str>>,
    options: SpanOptions,
) -> Context
where
    P: TracerProvider,
    <P::Tracer as Tracer>::Span: Send + Sync + 'static,
{
    let SpanOptions {
        kind,
        attributes,
        parent,
    } = options;

    let tracer = tracer_provider.tracer(TRACER_NAME);
    let mut builder = tracer.span_builder(name).with_attributes(attributes);

    if let Some(kind) = kind {
        builder = builder.with_kind(kind);
    }

    let parent = parent.unwrap_or_else(Context::new);
    let span = tracer.build_with_context(builder, &parent);

    parent.with_span(span)
}

/// Ends the span carried by `context`.
///
/// If `error` is set, the error is recorded on the span and the span status
/// is set to [`Status::Error`] with the error's display message before the
/// span is closed. A context without a real span makes this a no-op.
///
/// Calling this twice sends two end signals to the SDK, so callers must
/// route all exit paths through a single guaranteed call. The middleware in
/// [`crate::instrumentation`] does this with a drop guard.
pub fn end_span(context: &Context, error: Option<&dyn std::error::Error>) {
    let span = context.span();

    if let Some(error) = error {
        span.record_error(error);
        span.set_status(Status::error(error.to_string()));
    }

    span.end();
}

/// Starts a span under a named tracer and attaches the standard HTTP request
/// attributes.
///
/// The new span is a child of `context` and carries `extra_attributes`
/// followed by [`ATTR_REQUEST_METHOD`] and [`ATTR_HTTP_PATH`] filled from
/// `method` and `path`. The SDK appends duplicate keys in order and readers
/// take the most recent occurrence, so the standard attributes win when a
/// caller supplies a colliding key.
///
/// The returned context should be passed to downstream calls to keep the
/// trace connected, and the span must be closed with [`end_span`] or
/// [`Context::span`]`().end()`.
pub fn create_span<P>(
    context: &Context,
    tracer_provider: &P,
    method: &http::Method,
    path: &str,
    tracer_name: impl Into<Cow<'static, str>>,
    operation_name: impl Into<Cow<'static, str>>,
    extra_attributes: Vec<KeyValue>,
) -> Context
where
    P: TracerProvider,
    <P::Tracer as Tracer>::Span: Send + Sync + 'static,
{
    let mut attributes = extra_attributes;
    attributes.push(KeyValue::new(ATTR_REQUEST_METHOD, method.to_string()));
    attributes.push(KeyValue::new(ATTR_HTTP_PATH, path.to_owned()));

    let tracer = tracer_provider.tracer(tracer_name.into());
    let builder = tracer
        .span_builder(operation_name)
        .with_attributes(attributes);
    let span = tracer.build_with_context(builder, context);

    context.with_span(span)
}

/// Sets the given attributes on the span carried by `context`.
///
/// Attributes provide additional detail about the operation in flight, such
/// as request parameters or query details. Re-setting a key leaves the most
/// recent value authoritative. Without a real span in the context the no-op
/// span absorbs the call.
pub fn add_span_attributes(context: &Context, attributes: impl IntoIterator<Item = KeyValue>) {
    let span = context.span();
    span.set_attributes(attributes);
}

#[cfg(test)]
mod test {
    use opentelemetry::trace::noop::NoopTracerProvider;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

    use super::*;

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

    #[test]
    fn end_span_without_error_leaves_status_unset() {
        let (provider, exporter) = test_provider();

        let cx = start_span(&provider, "list-pods", SpanOptions::default());
        end_span(&cx, None);

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "list-pods");
        assert_eq!(spans[0].status, Status::Unset);
        assert!(spans[0].events.iter().all(|event| event.name != "exception"));
    }

    #[test]
    fn end_span_with_error_marks_span_errored() {
        let (provider, exporter) = test_provider();

        let cx = start_span(&provider, "list-pods", SpanOptions::default());
        let error = std::io::Error::other("connection refused");
        end_span(&cx, Some(&error));

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans.len(), 1);

        let Status::Error { description } = &spans[0].status else {
            panic!("span status must be Error, got {:?}", spans[0].status);
        };
        assert_eq!(description.as_ref(), "connection refused");
        assert!(spans[0].events.iter().any(|event| event.name == "exception"));
    }

    #[test]
    fn end_span_on_empty_context_is_a_noop() {
        let cx = Context::new();
        end_span(&cx, None);

        let error = std::io::Error::other("boom");
        end_span(&cx, Some(&error));
    }

    #[test]
    fn start_span_with_noop_provider_never_fails() {
        let provider = NoopTracerProvider::new();

        let cx = start_span(&provider, "noop", SpanOptions::default());
        assert!(!cx.span().span_context().is_valid());

        add_span_attributes(&cx, [KeyValue::new("ignored", "value")]);
        end_span(&cx, None);
    }

    #[test]
    fn start_span_links_to_parent_from_options() {
        let (provider, exporter) = test_provider();

        let parent_cx = start_span(&provider, "parent", SpanOptions::default());
        let parent_context = parent_cx.span().span_context().clone();

        let child_cx = start_span(&provider, "child", SpanOptions {
            parent: Some(parent_cx.clone()),
            ..SpanOptions::default()
        });
        end_span(&child_cx, None);
        end_span(&parent_cx, None);

        let spans = exporter.get_finished_spans().expect("spans must export");
        let child = spans
            .iter()
            .find(|span| span.name == "child")
            .expect("child span must export");

        assert_eq!(child.parent_span_id, parent_context.span_id());
        assert_eq!(child.span_context.trace_id(), parent_context.trace_id());
    }

    #[test]
    fn create_span_attaches_method_and_path() {
        let (provider, exporter) = test_provider();

        let cx = create_span(
            &Context::new(),
            &provider,
            &http::Method::GET,
            "/api/v1/pods",
            "pod-handler",
            "list-pods",
            vec![KeyValue::new("cluster", "production")],
        );
        end_span(&cx, None);

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "list-pods");
        assert_eq!(
            last_attribute(&spans[0], ATTR_REQUEST_METHOD).as_deref(),
            Some("GET")
        );
        assert_eq!(
            last_attribute(&spans[0], ATTR_HTTP_PATH).as_deref(),
            Some("/api/v1/pods")
        );
        assert_eq!(
            last_attribute(&spans[0], "cluster").as_deref(),
            Some("production")
        );
    }

    #[test]
    fn create_span_standard_attributes_win_on_collision() {
        let (provider, exporter) = test_provider();

        let cx = create_span(
            &Context::new(),
            &provider,
            &http::Method::GET,
            "/api/v1/pods",
            "pod-handler",
            "list-pods",
            vec![KeyValue::new(ATTR_REQUEST_METHOD, "SPOOFED")],
        );
        end_span(&cx, None);

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(
            last_attribute(&spans[0], ATTR_REQUEST_METHOD).as_deref(),
            Some("GET")
        );
    }

    #[test]
    fn create_span_continues_the_parent_trace() {
        let (provider, exporter) = test_provider();

        let parent_cx = start_span(&provider, "request", SpanOptions::default());
        let parent_context = parent_cx.span().span_context().clone();

        let child_cx = create_span(
            &parent_cx,
            &provider,
            &http::Method::DELETE,
            "/api/v1/pods/web-0",
            "pod-handler",
            "delete-pod",
            Vec::new(),
        );
        end_span(&child_cx, None);
        end_span(&parent_cx, None);

        let spans = exporter.get_finished_spans().expect("spans must export");
        let child = spans
            .iter()
            .find(|span| span.name == "delete-pod")
            .expect("child span must export");

        assert_eq!(child.parent_span_id, parent_context.span_id());
        assert_eq!(child.span_context.trace_id(), parent_context.trace_id());
    }

    #[test]
    fn add_span_attributes_last_write_wins() {
        let (provider, exporter) = test_provider();

        let cx = start_span(&provider, "list-pods", SpanOptions::default());
        add_span_attributes(&cx, [KeyValue::new("page.size", "50")]);
        add_span_attributes(&cx, [
            KeyValue::new("page.size", "100"),
            KeyValue::new("namespace", "kube-system"),
        ]);
        end_span(&cx, None);

        let spans = exporter.get_finished_spans().expect("spans must export");
        assert_eq!(
            last_attribute(&spans[0], "page.size").as_deref(),
            Some("100")
        );
        assert_eq!(
            last_attribute(&spans[0], "namespace").as_deref(),
            Some("kube-system")
        );
    }

    #[test]
    fn add_span_attributes_on_empty_context_is_a_noop() {
        add_span_attributes(&Context::new(), [KeyValue::new("ignored", "value")]);
    }
}
