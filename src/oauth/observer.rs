//! Hooks for annotating the current unit of work with auth outcomes.
//!
//! Observers only watch. Nothing they do can change whether a request is
//! authorized, and the core behaves the same with [`NoopObserver`].

use std::collections::BTreeSet;

use tracing::field;
use tracing::Span;

/// What the gate decided for one request.
#[derive(Debug)]
pub struct AuthDecision<'a> {
    /// `None` when the token never got as far as yielding a subject.
    pub subject: Option<&'a str>,
    pub granted: Option<&'a BTreeSet<String>>,
    pub required: &'a [String],
    pub authorized: bool,
}

pub trait AuthObserver: Send + Sync {
    fn token_issued(&self, _client_id: &str, _scope: &[String]) {}

    fn authorization(&self, _decision: &AuthDecision<'_>) {}

    /// A request is being answered with a 5xx.
    fn server_fault(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AuthObserver for NoopObserver {}

/// Records outcomes on the current `tracing` span. The span must declare the
/// fields up front; see `host_api::middleware::request_context`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpanObserver;

impl AuthObserver for SpanObserver {
    fn token_issued(&self, client_id: &str, scope: &[String]) {
        let span = Span::current();
        span.record("auth.subject", client_id);
        span.record("auth.scopes", field::display(scope.join(",")));
    }

    fn authorization(&self, decision: &AuthDecision<'_>) {
        let span = Span::current();
        if let Some(subject) = decision.subject {
            span.record("auth.subject", subject);
        }
        if let Some(granted) = decision.granted {
            let joined = granted.iter().map(String::as_str).collect::<Vec<_>>().join(",");
            span.record("auth.scopes", field::display(joined));
        }
        span.record("auth.required_scopes", field::display(decision.required.join(",")));
        span.record("auth.authorized", decision.authorized);
    }

    fn server_fault(&self) {
        Span::current().record("otel.status_code", "ERROR");
    }
}
