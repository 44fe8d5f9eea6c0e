//! CDP Session - one logical channel multiplexed over the target's socket
//!
//! Design: methods and events are addressed by "Domain.Name" strings instead
//! of per-method bindings. A session only carries its id and its listener
//! table; every call goes through the owning target.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::protocol::{CDPEvent, SessionId};
use super::target::TargetInner;
use crate::error::{CDPError, Result};

/// Event listener callback, invoked with the event's params
///
/// Runs on the dispatcher task: keep it short, spawn for anything async.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// CDP Session bound to one session id (`None` = root)
pub struct CDPSession {
    session_id: Option<SessionId>,

    /// Owning target. Non-owning so sessions never keep a target alive.
    target: Weak<TargetInner>,

    /// Key: event name (e.g., "Page.loadEventFired")
    handlers: RwLock<HashMap<String, EventHandler>>,
}

impl CDPSession {
    pub(crate) fn new(session_id: Option<SessionId>, target: Weak<TargetInner>) -> Self {
        Self {
            session_id,
            target,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.session_id.is_none()
    }

    /// Send command within this session's context and wait for its result
    ///
    /// `params` must be a JSON object (or `null` for none).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        call_via(&self.target, self.session_id.as_deref(), method, params, None).await
    }

    /// Like [`call`](Self::call), giving up after `timeout`
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        call_via(
            &self.target,
            self.session_id.as_deref(),
            method,
            params,
            Some(timeout),
        )
        .await
    }

    /// Register `handler` for `event`, replacing any previous one
    pub fn on(
        &self,
        event: impl Into<String>,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> Option<EventHandler> {
        self.set_listener(event, Some(Arc::new(handler)))
    }

    /// Remove the handler for `event`
    pub fn off(&self, event: &str) -> Option<EventHandler> {
        self.handlers.write().remove(event)
    }

    /// Register, replace or (with `None`) remove a handler
    ///
    /// Returns the handler previously registered for `event`.
    pub fn set_listener(
        &self,
        event: impl Into<String>,
        handler: Option<EventHandler>,
    ) -> Option<EventHandler> {
        let event = event.into();
        match handler {
            Some(handler) => self.handlers.write().insert(event, handler),
            None => self.handlers.write().remove(&event),
        }
    }

    pub fn listener(&self, event: &str) -> Option<EventHandler> {
        self.handlers.read().get(event).cloned()
    }

    pub fn del_all_listeners(&self) {
        self.handlers.write().clear();
    }

    /// Resolve a "Domain.Name" string
    ///
    /// A registered listener wins; otherwise the name is treated as a method.
    pub fn resolve(&self, name: &str) -> Member {
        match self.listener(name) {
            Some(handler) => Member::Listener(handler),
            None => Member::Method(MethodCall {
                target: self.target.clone(),
                session_id: self.session_id.clone(),
                method: name.to_string(),
            }),
        }
    }

    /// View over one protocol domain, e.g. `session.domain("Page")`
    pub fn domain(&self, name: impl Into<String>) -> Domain<'_> {
        Domain {
            session: self,
            name: name.into(),
        }
    }

    /// Run the listener for `event`, if any. Panics stay inside.
    pub(crate) fn handle_event(&self, event: CDPEvent) {
        // Clone out of the lock: the handler may (un)register listeners
        let Some(handler) = self.listener(&event.method) else {
            return;
        };
        let params = event.params.unwrap_or_else(|| Value::Object(Map::new()));

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(params))) {
            tracing::error!(
                "callback {} exception: {}",
                event.method,
                panic_message(panic.as_ref())
            );
        }
    }
}

impl fmt::Debug for CDPSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CDPSession")
            .field("session_id", &self.session_id)
            .field("listeners", &self.handlers.read().len())
            .finish()
    }
}

async fn call_via(
    target: &Weak<TargetInner>,
    session_id: Option<&str>,
    method: &str,
    params: Value,
    timeout: Option<Duration>,
) -> Result<Value> {
    let target = target
        .upgrade()
        .ok_or_else(|| CDPError::usage(format!("calling {}: target has been dropped", method)))?;
    target.call(method, session_id, params, timeout).await
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// What a "Domain.Name" string currently resolves to
pub enum Member {
    Listener(EventHandler),
    Method(MethodCall),
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener(_) => f.write_str("Listener(..)"),
            Self::Method(call) => f.debug_tuple("Method").field(&call.method).finish(),
        }
    }
}

/// A method name bound to a session, callable later
#[derive(Clone)]
pub struct MethodCall {
    target: Weak<TargetInner>,
    session_id: Option<SessionId>,
    method: String,
}

impl MethodCall {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub async fn invoke(&self, params: Value) -> Result<Value> {
        call_via(
            &self.target,
            self.session_id.as_deref(),
            &self.method,
            params,
            None,
        )
        .await
    }

    pub async fn invoke_with_timeout(&self, params: Value, timeout: Duration) -> Result<Value> {
        call_via(
            &self.target,
            self.session_id.as_deref(),
            &self.method,
            params,
            Some(timeout),
        )
        .await
    }
}

/// Members of one domain addressed by short name
///
/// `session.domain("Page").call("navigate", ..)` sends "Page.navigate".
pub struct Domain<'a> {
    session: &'a CDPSession,
    name: String,
}

impl Domain<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn qualify(&self, member: &str) -> String {
        format!("{}.{}", self.name, member)
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.session.call(&self.qualify(method), params).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.session
            .call_with_timeout(&self.qualify(method), params, timeout)
            .await
    }

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> Option<EventHandler> {
        self.session.on(self.qualify(event), handler)
    }

    pub fn off(&self, event: &str) -> Option<EventHandler> {
        self.session.off(&self.qualify(event))
    }

    pub fn listener(&self, event: &str) -> Option<EventHandler> {
        self.session.listener(&self.qualify(event))
    }

    pub fn resolve(&self, member: &str) -> Member {
        self.session.resolve(&self.qualify(member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orphan(session_id: Option<&str>) -> CDPSession {
        CDPSession::new(session_id.map(String::from), Weak::new())
    }

    fn event(method: &str, params: Value) -> CDPEvent {
        CDPEvent {
            method: method.to_string(),
            params: Some(params),
            session_id: None,
        }
    }

    #[test]
    fn test_listener_registration() {
        let session = orphan(None);
        assert!(session.is_root());
        assert!(session.listener("Page.loadEventFired").is_none());

        assert!(session.on("Page.loadEventFired", |_| {}).is_none());
        assert!(session.listener("Page.loadEventFired").is_some());
        // replacing returns the previous handler
        assert!(session.on("Page.loadEventFired", |_| {}).is_some());

        assert!(session.set_listener("Page.loadEventFired", None).is_some());
        assert!(session.listener("Page.loadEventFired").is_none());
        assert!(session.off("Page.loadEventFired").is_none());
    }

    #[test]
    fn test_handle_event_passes_params() {
        let session = orphan(Some("S1"));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on("Network.requestWillBeSent", move |params| {
            sink.lock().push(params);
        });

        session.handle_event(event("Network.requestWillBeSent", json!({"requestId": "1"})));
        session.handle_event(event("Network.responseReceived", json!({"requestId": "1"})));
        session.handle_event(CDPEvent {
            method: "Network.requestWillBeSent".into(),
            params: None,
            session_id: Some("S1".into()),
        });

        let seen = seen.lock();
        assert_eq!(*seen, vec![json!({"requestId": "1"}), json!({})]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let session = orphan(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        session.on("Page.frameNavigated", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("handler blew up");
        });

        session.handle_event(event("Page.frameNavigated", json!({})));
        session.handle_event(event("Page.frameNavigated", json!({})));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_unregister_itself() {
        let session = Arc::new(orphan(None));
        let weak = Arc::downgrade(&session);
        session.on("Page.loadEventFired", move |_| {
            if let Some(session) = weak.upgrade() {
                session.off("Page.loadEventFired");
            }
        });
        session.handle_event(event("Page.loadEventFired", json!({})));
        assert!(session.listener("Page.loadEventFired").is_none());
    }

    #[test]
    fn test_resolve_listener_or_method() {
        let session = orphan(None);
        match session.resolve("Page.loadEventFired") {
            Member::Method(call) => assert_eq!(call.method(), "Page.loadEventFired"),
            other => panic!("expected method, got {:?}", other),
        }

        session.on("Page.loadEventFired", |_| {});
        assert!(matches!(
            session.resolve("Page.loadEventFired"),
            Member::Listener(_)
        ));
    }

    #[test]
    fn test_domain_qualifies_names() {
        let session = orphan(None);
        let page = session.domain("Page");
        assert_eq!(page.name(), "Page");

        page.on("loadEventFired", |_| {});
        assert!(session.listener("Page.loadEventFired").is_some());
        assert!(page.listener("loadEventFired").is_some());

        match page.resolve("navigate") {
            Member::Method(call) => assert_eq!(call.method(), "Page.navigate"),
            other => panic!("expected method, got {:?}", other),
        }

        assert!(page.off("loadEventFired").is_some());
        session.on("Page.domContentEventFired", |_| {});
        session.del_all_listeners();
        assert!(session.listener("Page.domContentEventFired").is_none());
    }

    #[tokio::test]
    async fn test_call_without_target() {
        let session = orphan(None);
        let err = session.call("Page.enable", Value::Null).await.unwrap_err();
        assert!(matches!(err, CDPError::Usage { .. }));
    }
}
