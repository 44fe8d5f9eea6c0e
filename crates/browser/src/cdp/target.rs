//! Target - one debuggable surface behind one WebSocket
//!
//! Design decisions:
//! 1. Single reader task owns the read half; replies go to per-call one-shot
//!    slots, events go to one FIFO queue.
//! 2. Single dispatcher task drains that queue and runs listeners, so a slow
//!    listener never stalls the reader.
//! 3. Callers poll their own slot in bounded quanta. Every wait in here is
//!    bounded, so shutdown and timeouts are observed within one quantum.
//! 4. No reconnect. A lost socket ends the target for good.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::lifecycle::{ConnectionState, ShutdownSignal};
use super::pending::PendingCalls;
use super::protocol::{named_params, CDPEvent, CDPMessage, CDPRequest, TargetDescriptor};
use super::registry::SessionRegistry;
use super::session::CDPSession;
use super::transport::{Transport, WebSocketTransport};
use crate::config::ConnectionConfig;
use crate::error::{CDPError, Result};

/// Handle to a debuggable target. Cheap to clone.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

pub(crate) struct TargetInner {
    descriptor: TargetDescriptor,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    next_id: AtomicU64,
    pending: Arc<PendingCalls>,
    sessions: Arc<SessionRegistry>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    shutdown: ShutdownSignal,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Target {
    pub fn new(descriptor: TargetDescriptor) -> Self {
        Self::with_config(descriptor, ConnectionConfig::default())
    }

    pub fn with_config(descriptor: TargetDescriptor, config: ConnectionConfig) -> Self {
        let inner = Arc::new_cyclic(|weak| TargetInner {
            next_id: AtomicU64::new(config.first_message_id),
            descriptor,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            pending: Arc::new(PendingCalls::new()),
            sessions: Arc::new(SessionRegistry::new(weak.clone())),
            transport: RwLock::new(None),
            shutdown: ShutdownSignal::new(),
            tasks: Mutex::new(Vec::new()),
        });
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.descriptor.id
    }

    pub fn target_type(&self) -> &str {
        &self.inner.descriptor.target_type
    }

    pub fn web_socket_url(&self) -> Option<&str> {
        self.inner.descriptor.web_socket_debugger_url.as_deref()
    }

    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.inner.descriptor
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Connected and the connection has not been lost since
    ///
    /// A target whose socket died still reports `Connected` from
    /// [`state`](Self::state) until [`stop`](Self::stop) is called.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && !self.inner.shutdown.is_raised()
    }

    /// Open the WebSocket and start the background tasks
    pub async fn connect(&self) -> Result<()> {
        self.inner.check_connectable()?;
        let url = self
            .web_socket_url()
            .ok_or_else(|| CDPError::config("target already claimed by another client"))?;

        let transport = WebSocketTransport::connect(url, self.inner.config.connect_timeout).await?;
        self.connect_with(Arc::new(transport)).await
    }

    /// Start on an already-open transport
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<()> {
        if let Err(e) = self.start(transport.clone()) {
            close_bounded(transport.as_ref(), &self.inner).await;
            return Err(e);
        }
        Ok(())
    }

    /// Disconnected -> Connected, atomically with respect to other connects
    fn start(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        inner.check_state_connectable(*state)?;

        inner.sessions.get_or_create(None);
        *inner.transport.write() = Some(transport.clone());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(receive_loop(
            transport,
            inner.pending.clone(),
            events_tx,
            inner.shutdown.clone(),
            inner.config.clone(),
        ));
        let dispatcher = tokio::spawn(dispatch_loop(
            events_rx,
            inner.sessions.clone(),
            inner.shutdown.clone(),
            inner.config.poll_quantum,
        ));
        inner.tasks.lock().extend([receiver, dispatcher]);

        *state = ConnectionState::Connected;
        tracing::debug!("Target {} connected", inner.descriptor.id);
        Ok(())
    }

    /// Close the socket, stop both tasks, drop every session
    ///
    /// Calls still waiting fail with [`CDPError::Aborted`].
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if *state != ConnectionState::Connected {
                return Err(CDPError::usage(format!(
                    "target {} is not running ({})",
                    inner.descriptor.id, *state
                )));
            }
            *state = ConnectionState::Stopping;
        }

        // Raise first so the reader does not report our own close as a failure
        inner.shutdown.raise();
        let transport = inner.transport.write().take();
        if let Some(transport) = transport {
            close_bounded(transport.as_ref(), inner).await;
        }

        let tasks = std::mem::take(&mut *inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task of {} ended abnormally: {}", inner.descriptor.id, e);
            }
        }

        inner.sessions.clear();
        *inner.state.lock() = ConnectionState::Stopped;
        tracing::debug!("Target {} stopped", inner.descriptor.id);
        Ok(())
    }

    /// Root session. Exists while connected.
    pub fn session(&self) -> Result<Arc<CDPSession>> {
        self.inner
            .sessions
            .get(None)
            .ok_or_else(|| CDPError::usage(format!("target {} is not connected", self.id())))
    }

    /// Session for `session_id`, registered on first use
    ///
    /// Register one before attaching so no event of the new session is lost.
    pub fn get_or_create_session(&self, session_id: Option<&str>) -> Arc<CDPSession> {
        self.inner.sessions.get_or_create(session_id)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    /// Call `method` and wait for its result
    ///
    /// `session_id` of `None` targets the root session. Without `timeout` the
    /// wait only ends with a reply or shutdown.
    pub async fn call(
        &self,
        method: &str,
        session_id: Option<&str>,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.inner.call(method, session_id, params, timeout).await
    }

    /// Number of calls currently waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Target [{}]>", self.id())
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id())
            .field("type", &self.target_type())
            .field("state", &self.state())
            .finish()
    }
}

impl TargetInner {
    fn check_connectable(&self) -> Result<()> {
        self.check_state_connectable(*self.state.lock())
    }

    fn check_state_connectable(&self, state: ConnectionState) -> Result<()> {
        match state {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connected | ConnectionState::Stopping => Err(CDPError::config(
                format!("target {} is already connected", self.descriptor.id),
            )),
            ConnectionState::Stopped => Err(CDPError::usage(format!(
                "target {} was stopped; create a new one to reconnect",
                self.descriptor.id
            ))),
        }
    }

    fn running_transport(&self, method: &str) -> Result<Arc<dyn Transport>> {
        let state = *self.state.lock();
        if state != ConnectionState::Connected {
            return Err(CDPError::usage(format!(
                "calling {} on target {}: {}",
                method, self.descriptor.id, state
            )));
        }
        if self.shutdown.is_raised() {
            return Err(CDPError::transport(format!(
                "calling {} on target {}: connection lost",
                method, self.descriptor.id
            )));
        }
        self.transport
            .read()
            .clone()
            .ok_or_else(|| CDPError::usage(format!("calling {}: target is not connected", method)))
    }

    pub(crate) async fn call(
        &self,
        method: &str,
        session_id: Option<&str>,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let params = named_params(params)
            .ok_or_else(|| CDPError::usage("the params should be key=value format"))?;
        let transport = self.running_transport(method)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = CDPRequest {
            id,
            method,
            params,
            session_id,
        };
        let frame = serde_json::to_string(&request)?;

        // Slot first, then the wire
        let mut slot = self.pending.register(id);
        if self.config.trace_frames {
            tracing::trace!("SEND > {} to {}", frame, self.descriptor.id);
        }

        // Send and reply share one budget
        let mut budget = Budget::new(timeout, self.config.poll_quantum);
        self.poll_bounded(transport.send(frame), method, &mut budget)
            .await??;

        let response = match self.poll_bounded(&mut slot.rx, method, &mut budget).await? {
            Ok(response) => response,
            // Slot dropped without a reply: the connection is going away
            Err(_) => return Err(CDPError::aborted(method)),
        };
        match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => {
                tracing::warn!("{} error: {}", method, error.message);
                Err(CDPError::call(method, error.code, error.message))
            }
            (None, None) => Ok(Value::Null),
        }
    }

    /// Drive `fut` one quantum at a time until it completes, the budget runs
    /// out or shutdown is raised
    ///
    /// An unfinished `fut` is dropped on timeout and abort.
    async fn poll_bounded<F: Future>(
        &self,
        fut: F,
        method: &str,
        budget: &mut Budget,
    ) -> Result<F::Output> {
        tokio::pin!(fut);
        while !self.shutdown.is_raised() {
            let quantum = budget.next_quantum();
            match tokio::time::timeout(quantum, &mut fut).await {
                Ok(output) => return Ok(output),
                Err(_) => {
                    if let Some(total) = budget.spent() {
                        return Err(CDPError::timeout(method, total));
                    }
                }
            }
        }
        Err(CDPError::aborted(method))
    }
}

/// Wait budget of one call, spent one quantum at a time
///
/// quantum = min(budget / 2, unit), clamped to what is left. Without a
/// budget every quantum is one unit.
struct Budget {
    total: Option<Duration>,
    remaining: Option<Duration>,
    quantum: Duration,
}

impl Budget {
    fn new(total: Option<Duration>, unit: Duration) -> Self {
        Self {
            total,
            remaining: total,
            quantum: total.map_or(unit, |b| (b / 2).min(unit)),
        }
    }

    fn next_quantum(&mut self) -> Duration {
        if let Some(left) = self.remaining {
            self.quantum = self.quantum.min(left);
            self.remaining = Some(left - self.quantum);
        }
        self.quantum
    }

    /// The full budget, once nothing is left of it
    fn spent(&self) -> Option<Duration> {
        match self.remaining {
            Some(left) if left.is_zero() => self.total,
            _ => None,
        }
    }
}

/// Close `transport`, giving up after the configured close timeout
async fn close_bounded(transport: &dyn Transport, inner: &TargetInner) {
    let id = &inner.descriptor.id;
    match tokio::time::timeout(inner.config.close_timeout, transport.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Closing transport of {} failed: {}", id, e),
        Err(_) => tracing::warn!(
            "Closing transport of {} timed out after {:?}",
            id,
            inner.config.close_timeout
        ),
    }
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        // Background tasks hold no reference to us; this is how they learn
        self.shutdown.raise();
    }
}

/// Receiver loop: sole reader of the transport
async fn receive_loop(
    transport: Arc<dyn Transport>,
    pending: Arc<PendingCalls>,
    events: mpsc::UnboundedSender<CDPEvent>,
    shutdown: ShutdownSignal,
    config: ConnectionConfig,
) {
    while !shutdown.is_raised() {
        let frame = match transport.recv(config.poll_quantum).await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                if shutdown.raise() {
                    tracing::error!("websocket exception: {}", e);
                }
                break;
            }
        };

        if config.trace_frames {
            tracing::trace!("< RECV {}", frame);
        }
        route_frame(&frame, &pending, &events);
    }
    tracing::debug!("Receiver loop exited");
}

fn route_frame(frame: &str, pending: &PendingCalls, events: &mpsc::UnboundedSender<CDPEvent>) {
    let message: Value = match serde_json::from_str(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Dropping malformed frame ({}): {}", e, frame);
            return;
        }
    };

    match CDPMessage::classify(message) {
        CDPMessage::Event(event) => {
            if events.send(event).is_err() {
                tracing::debug!("Event queue closed, dropping event");
            }
        }
        CDPMessage::Response(response) => {
            let id = response.id;
            if !pending.deliver(response) {
                // The caller already timed out or aborted
                tracing::debug!("Discarding reply for unknown request {}", id);
            }
        }
        CDPMessage::Unknown(message) => {
            tracing::warn!("unknown message: {}", message);
        }
    }
}

/// Dispatcher loop: sole consumer of the event queue
async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<CDPEvent>,
    sessions: Arc<SessionRegistry>,
    shutdown: ShutdownSignal,
    quantum: Duration,
) {
    while !shutdown.is_raised() {
        match tokio::time::timeout(quantum, events.recv()).await {
            Ok(Some(event)) => sessions.dispatch(event),
            // Reader is gone, nothing more will arrive
            Ok(None) => break,
            Err(_) => continue,
        }
    }
    tracing::debug!("Dispatcher loop exited");
}
