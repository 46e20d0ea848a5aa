//! Handler dispatcher: owns the connection state and routes transport
//! events to registered [`WearHandler`]s.
//!
//! Data and message events follow a chain of responsibility in
//! registration order: the first handler to claim an event stops it.
//! Peer and lifecycle events go to every handler. A handler that errors or
//! panics is logged and skipped; it never takes the dispatcher down.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::buffer::MarshalContext;
use crate::config::ShareConfig;
use crate::connection::{ConnectionFailure, ConnectionState, ResolutionSurface, SuspendCause};
use crate::data_map::BlobSource;
use crate::error::{Result, ShareError};
use crate::events::{DataEvent, MessageEvent, RecordEvent};
use crate::handler::{HandlerContext, WearHandler};
use crate::peer::PeerNode;
use crate::transport::{ConnectionCallbacks, EventListener, Transport};

type HandlerList = Arc<Vec<Arc<dyn WearHandler>>>;

pub struct HandlerDispatcher {
    config: ShareConfig,
    marshal: MarshalContext,
    /// Copy-on-write: dispatch iterates a snapshot, registration swaps in a
    /// new list.
    handlers: RwLock<HandlerList>,
    context: RwLock<Option<HandlerContext>>,
    state: Mutex<ConnectionState>,
    listening: AtomicBool,
    resolution: Option<Arc<dyn ResolutionSurface>>,
}

impl HandlerDispatcher {
    pub fn new(config: ShareConfig, marshal: MarshalContext) -> Self {
        Self {
            config,
            marshal,
            handlers: RwLock::new(Arc::new(Vec::new())),
            context: RwLock::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            listening: AtomicBool::new(false),
            resolution: None,
        }
    }

    /// Offer fixes for failed connections through `surface`.
    pub fn with_resolution_surface(mut self, surface: Arc<dyn ResolutionSurface>) -> Self {
        self.resolution = Some(surface);
        self
    }

    /// Bind the dispatcher to a transport and call `on_init` on every
    /// registered handler. Blobs in decoded records are fetched through the
    /// same transport.
    pub fn init<T: Transport + 'static>(&self, transport: Arc<T>) {
        let blobs: Arc<dyn BlobSource> = transport.clone();
        let ctx = HandlerContext::new(transport, self.marshal.clone().with_blob_source(blobs));
        if self.context.write().replace(ctx.clone()).is_some() {
            warn!("Dispatcher re-initialized with a new transport");
        }
        let handlers = self.snapshot();
        debug!("Dispatcher initialized with {} handlers", handlers.len());
        for handler in handlers.iter() {
            notify("init", || handler.on_init(&ctx));
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.read().is_some()
    }

    /// The context handlers receive. Fails before [`init`](Self::init).
    pub fn context(&self) -> Result<HandlerContext> {
        self.require_context("context")
    }

    /// Subscribe to the transport and start connecting.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let ctx = self.require_context("start")?;
        if self.listening.swap(true, Ordering::SeqCst) {
            debug!("Dispatcher already started");
            return Ok(());
        }

        let transport = ctx.transport();
        if !transport.is_connected() {
            self.set_state(ConnectionState::Connecting);
        }
        let callbacks: Arc<dyn ConnectionCallbacks> = self.clone();
        transport.add_connection_callbacks(callbacks);
        if self.config.add_api_listeners {
            let listener: Arc<dyn EventListener> = self.clone();
            transport.add_event_listener(listener);
        }
        if !transport.is_connected() && !transport.is_connecting() {
            transport.connect();
        }
        info!("Dispatcher started ({})", self.state());
        Ok(())
    }

    /// Unsubscribe from the transport and disconnect it.
    pub fn stop(self: &Arc<Self>) -> Result<()> {
        let ctx = self.require_context("stop")?;
        let transport = ctx.transport();
        if self.listening.swap(false, Ordering::SeqCst) {
            let callbacks: Arc<dyn ConnectionCallbacks> = self.clone();
            transport.remove_connection_callbacks(&callbacks);
            let listener: Arc<dyn EventListener> = self.clone();
            transport.remove_event_listener(&listener);
        }
        if transport.is_connected() || transport.is_connecting() {
            transport.disconnect();
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Dispatcher stopped");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    // -- Handler registry ---------------------------------------------------

    /// Add a handler at the end of the dispatch order. Returns `false` if
    /// this exact handler is already registered.
    pub fn register_handler(&self, handler: Arc<dyn WearHandler>) -> bool {
        {
            let mut handlers = self.handlers.write();
            if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                return false;
            }
            let mut next = Vec::clone(&handlers);
            next.push(Arc::clone(&handler));
            *handlers = Arc::new(next);
        }
        let ctx = self.context.read().clone();
        if let Some(ctx) = ctx {
            notify("init", || handler.on_init(&ctx));
        }
        true
    }

    pub fn register_handlers<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn WearHandler>>,
    {
        for handler in handlers {
            self.register_handler(handler);
        }
    }

    pub fn unregister_handler(&self, handler: &Arc<dyn WearHandler>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        let next: Vec<_> = handlers
            .iter()
            .filter(|h| !Arc::ptr_eq(h, handler))
            .cloned()
            .collect();
        let removed = next.len() != before;
        *handlers = Arc::new(next);
        removed
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    // -- Dispatch -----------------------------------------------------------

    /// Offer each event to the handlers in order until one claims it.
    /// Returns how many events were claimed.
    pub fn dispatch_data_events(&self, events: &[DataEvent]) -> usize {
        let Some(ctx) = self.context.read().clone() else {
            warn!("Dropping {} data events: dispatcher not initialized", events.len());
            return 0;
        };
        self.ensure_connected(&ctx);

        let handlers = self.snapshot();
        let mut claimed = 0;
        for event in events {
            let event = RecordEvent::new(event.clone(), ctx.marshal().clone());
            for handler in handlers.iter() {
                if offer(event.path(), || handler.handle_data_event(&ctx, &event)) {
                    claimed += 1;
                    break;
                }
            }
        }
        debug!("Dispatched {} data events, {claimed} claimed", events.len());
        claimed
    }

    /// Offer a message to the handlers in order until one claims it.
    pub fn dispatch_message(&self, event: &MessageEvent) -> bool {
        let Some(ctx) = self.context.read().clone() else {
            warn!("Dropping message at {}: dispatcher not initialized", event.path);
            return false;
        };
        self.ensure_connected(&ctx);

        let claimed = self
            .snapshot()
            .iter()
            .any(|handler| offer(&event.path, || handler.handle_message_event(&ctx, event)));
        if !claimed {
            debug!("No handler claimed message at {}", event.path);
        }
        claimed
    }

    // -- Internals ----------------------------------------------------------

    fn snapshot(&self) -> HandlerList {
        Arc::clone(&self.handlers.read())
    }

    fn require_context(&self, op: &'static str) -> Result<HandlerContext> {
        self.context
            .read()
            .clone()
            .ok_or(ShareError::NotInitialized(op))
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        let prev = *state;
        if prev == next {
            return;
        }
        if prev.can_transition_to(next) {
            debug!("Connection {prev} -> {next}");
        } else {
            warn!("Unexpected connection transition {prev} -> {next}");
        }
        *state = next;
    }

    /// One blocking reconnect attempt so handlers see a live connection.
    fn ensure_connected(&self, ctx: &HandlerContext) {
        let transport = ctx.transport();
        if self.is_connected() && transport.is_connected() {
            return;
        }
        if matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Suspended
        ) {
            self.set_state(ConnectionState::Connecting);
        }
        let timeout = self.config.reconnect_timeout;
        debug!("Reconnecting before dispatch (up to {timeout:?})");
        match transport.blocking_connect(timeout) {
            Ok(()) => self.set_state(ConnectionState::Connected),
            Err(e) => {
                warn!("Reconnect before dispatch failed: {e}");
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    fn broadcast(&self, what: &str, f: impl Fn(&dyn WearHandler, &HandlerContext)) {
        let Some(ctx) = self.context.read().clone() else {
            debug!("Skipping {what} broadcast: dispatcher not initialized");
            return;
        };
        for handler in self.snapshot().iter() {
            notify(what, || f(handler.as_ref(), &ctx));
        }
    }
}

/// Run one claim attempt, treating errors and panics as "not handled".
fn offer(path: &str, attempt: impl FnOnce() -> anyhow::Result<bool>) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(attempt)) {
        Ok(Ok(claimed)) => claimed,
        Ok(Err(e)) => {
            error!("Handler failed on {path}: {e:#}");
            false
        }
        Err(_) => {
            error!("Handler panicked on {path}");
            false
        }
    }
}

fn notify(what: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("Handler panicked during {what}");
    }
}

impl ConnectionCallbacks for HandlerDispatcher {
    fn on_connected(&self) {
        self.set_state(ConnectionState::Connected);
        self.broadcast("connected", |h, ctx| h.on_connected(ctx));
    }

    fn on_connection_suspended(&self, cause: SuspendCause) {
        self.set_state(ConnectionState::Suspended);
        self.broadcast("suspended", |h, ctx| h.on_connection_suspended(ctx, cause));
    }

    fn on_connection_failed(&self, failure: &ConnectionFailure) {
        self.set_state(ConnectionState::Disconnected);
        self.broadcast("connection failed", |h, ctx| h.on_connection_failed(ctx, failure));

        if !failure.has_resolution {
            warn!("Connection failed: {failure}");
            return;
        }
        match &self.resolution {
            Some(surface) => {
                if !surface.show_resolution(failure) {
                    warn!("Resolution for {failure} could not be shown");
                }
            }
            None => info!("Connection failed with a resolution but nothing can show it: {failure}"),
        }
    }
}

impl EventListener for HandlerDispatcher {
    fn on_data_changed(&self, events: &[DataEvent]) {
        self.dispatch_data_events(events);
    }

    fn on_message_received(&self, event: &MessageEvent) {
        self.dispatch_message(event);
    }

    fn on_peer_connected(&self, node: &PeerNode) {
        self.broadcast("peer connected", |h, ctx| h.on_peer_connected(ctx, node));
    }

    fn on_peer_disconnected(&self, node: &PeerNode) {
        self.broadcast("peer disconnected", |h, ctx| h.on_peer_disconnected(ctx, node));
    }
}

impl std::fmt::Debug for HandlerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDispatcher")
            .field("state", &self.state())
            .field("handlers", &self.handler_count())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
