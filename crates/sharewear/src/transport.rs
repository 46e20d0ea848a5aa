//! External transport, the data layer the dispatcher and client drive.
//!
//! [`Transport`] is the synchronous surface of the platform's node
//! client. Every call may block on I/O and must stay off latency-sensitive
//! threads. [`MemoryTransport`] implements it in-process: endpoints created
//! from one [`MemoryNetwork`] share a data store and blob store and deliver
//! events to each other synchronously on the calling thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::addressable::PutRequest;
use crate::config::DEFAULT_URI_SCHEME;
use crate::connection::{ConnectionFailure, SuspendCause};
use crate::data_map::{Asset, BlobSource, DataMap};
use crate::error::{Result, ShareError};
use crate::events::{DataEvent, DataItem, MessageEvent};
use crate::locator::Locator;
use crate::peer::PeerNode;
use crate::routes::path_has_prefix;

/// Receives connection lifecycle callbacks.
pub trait ConnectionCallbacks: Send + Sync {
    fn on_connected(&self);
    fn on_connection_suspended(&self, cause: SuspendCause);
    fn on_connection_failed(&self, failure: &ConnectionFailure);
}

/// Receives data, message and peer events.
pub trait EventListener: Send + Sync {
    fn on_data_changed(&self, events: &[DataEvent]);
    fn on_message_received(&self, event: &MessageEvent);
    fn on_peer_connected(&self, node: &PeerNode);
    fn on_peer_disconnected(&self, node: &PeerNode);
}

/// How a locator's path selects data items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathFilter {
    #[default]
    Literal,
    /// The path and everything beneath it.
    Prefix,
}

impl PathFilter {
    pub fn matches(self, path: &str, wanted: &str) -> bool {
        match self {
            Self::Literal => path == wanted,
            Self::Prefix => path_has_prefix(path, wanted),
        }
    }
}

/// The platform's node client.
pub trait Transport: BlobSource {
    /// Start connecting. Outcome arrives through [`ConnectionCallbacks`].
    fn connect(&self);
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn is_connecting(&self) -> bool;

    /// Connect and wait at most `timeout` for the outcome.
    fn blocking_connect(&self, timeout: Duration) -> Result<()>;

    fn local_node(&self) -> Result<PeerNode>;

    /// Nodes currently reachable, excluding the local one.
    fn connected_nodes(&self) -> Result<Vec<PeerNode>>;

    /// Send a message to one node. Returns the request id.
    fn send_message(&self, node_id: &str, path: &str, data: &[u8]) -> Result<u64>;

    /// Store a data item under the local node. Returns the stored item.
    fn put_data(&self, request: PutRequest) -> Result<DataItem>;

    /// Delete the items `locator` names. Returns how many were removed.
    fn delete_data(&self, locator: &Locator, filter: PathFilter) -> Result<usize>;

    fn data_items(&self, locator: &Locator, filter: PathFilter) -> Result<Vec<DataItem>>;

    fn add_connection_callbacks(&self, callbacks: Arc<dyn ConnectionCallbacks>);
    fn remove_connection_callbacks(&self, callbacks: &Arc<dyn ConnectionCallbacks>);
    fn add_event_listener(&self, listener: Arc<dyn EventListener>);
    fn remove_event_listener(&self, listener: &Arc<dyn EventListener>);
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SharedStore {
    endpoints: Vec<Weak<MemoryTransport>>,
    /// Keyed by (node id, path).
    items: BTreeMap<(String, String), DataMap>,
    blobs: HashMap<String, Vec<u8>>,
}

/// A set of in-process nodes sharing one data layer.
pub struct MemoryNetwork {
    scheme: String,
    store: Mutex<SharedStore>,
    next_request_id: AtomicU64,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_scheme(DEFAULT_URI_SCHEME)
    }

    pub fn with_scheme(scheme: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            scheme: scheme.into(),
            store: Mutex::new(SharedStore::default()),
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Add a node to the network. It starts disconnected.
    pub fn endpoint(self: &Arc<Self>, id: &str, display_name: &str) -> Arc<MemoryTransport> {
        let endpoint = Arc::new(MemoryTransport {
            network: Arc::clone(self),
            node: PeerNode::new(id, display_name),
            state: Mutex::new(EndpointState::default()),
            callbacks: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        });
        let mut store = self.store.lock();
        store.endpoints.retain(|e| e.strong_count() > 0);
        store.endpoints.push(Arc::downgrade(&endpoint));
        endpoint
    }

    pub fn item_count(&self) -> usize {
        self.store.lock().items.len()
    }

    fn connected_endpoints(&self) -> Vec<Arc<MemoryTransport>> {
        let endpoints: Vec<_> = self
            .store
            .lock()
            .endpoints
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        endpoints.into_iter().filter(|e| e.is_connected()).collect()
    }

    fn locator(&self, node_id: &str, path: &str) -> Result<Locator> {
        Locator::new(&self.scheme, Some(node_id), path)
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("scheme", &self.scheme)
            .field("items", &self.item_count())
            .finish()
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    connected: bool,
    failure: Option<ConnectionFailure>,
}

/// One node of a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    node: PeerNode,
    state: Mutex<EndpointState>,
    callbacks: RwLock<Vec<Arc<dyn ConnectionCallbacks>>>,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl MemoryTransport {
    pub fn node(&self) -> &PeerNode {
        &self.node
    }

    /// Make every following connect attempt fail with `failure`, or succeed
    /// again with `None`.
    pub fn fail_connections(&self, failure: Option<ConnectionFailure>) {
        self.state.lock().failure = failure;
    }

    /// Drop the connection as if the platform service went away.
    pub fn suspend(&self, cause: SuspendCause) {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
        }
        info!("Node {} suspended: {cause:?}", self.node.id);
        let callbacks = self.callbacks.read().clone();
        for cb in callbacks {
            cb.on_connection_suspended(cause);
        }
        self.announce(false);
    }

    fn announce(&self, connected: bool) {
        for peer in self.network.connected_endpoints() {
            if peer.node.id == self.node.id {
                continue;
            }
            let listeners = peer.listeners.read().clone();
            for listener in listeners {
                if connected {
                    listener.on_peer_connected(&self.node);
                } else {
                    listener.on_peer_disconnected(&self.node);
                }
            }
        }
    }

    fn deliver_data(&self, events: &[DataEvent]) {
        if events.is_empty() {
            return;
        }
        for endpoint in self.network.connected_endpoints() {
            let listeners = endpoint.listeners.read().clone();
            for listener in listeners {
                listener.on_data_changed(events);
            }
        }
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ShareError::Transport(format!(
                "node {} is not connected",
                self.node.id
            )))
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("node", &self.node)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl BlobSource for MemoryTransport {
    fn fetch_blob(&self, asset: &Asset) -> Result<Option<Vec<u8>>> {
        Ok(self.network.store.lock().blobs.get(asset.digest()).cloned())
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) {
        let failure = {
            let mut state = self.state.lock();
            if state.connected {
                return;
            }
            if state.failure.is_none() {
                state.connected = true;
            }
            state.failure.clone()
        };

        if let Some(failure) = failure {
            warn!("Node {} failed to connect: {failure}", self.node.id);
            let callbacks = self.callbacks.read().clone();
            for cb in callbacks {
                cb.on_connection_failed(&failure);
            }
            return;
        }

        debug!("Node {} connected", self.node.id);
        let callbacks = self.callbacks.read().clone();
        for cb in callbacks {
            cb.on_connected();
        }
        self.announce(true);
    }

    fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
        }
        debug!("Node {} disconnected", self.node.id);
        self.announce(false);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn is_connecting(&self) -> bool {
        false
    }

    fn blocking_connect(&self, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if let Some(failure) = self.state.lock().failure.clone() {
            return Err(ShareError::Transport(format!(
                "connect failed within {timeout:?}: {failure}"
            )));
        }
        self.connect();
        if self.is_connected() {
            Ok(())
        } else {
            Err(ShareError::Timeout(timeout))
        }
    }

    fn local_node(&self) -> Result<PeerNode> {
        Ok(self.node.clone())
    }

    fn connected_nodes(&self) -> Result<Vec<PeerNode>> {
        self.require_connected()?;
        Ok(self
            .network
            .connected_endpoints()
            .into_iter()
            .filter(|e| e.node.id != self.node.id)
            .map(|e| e.node.clone())
            .collect())
    }

    fn send_message(&self, node_id: &str, path: &str, data: &[u8]) -> Result<u64> {
        self.require_connected()?;
        let target = self
            .network
            .connected_endpoints()
            .into_iter()
            .find(|e| e.node.id == node_id)
            .ok_or_else(|| ShareError::Transport(format!("node {node_id} is not reachable")))?;

        let request_id = self.network.next_request_id.fetch_add(1, Ordering::Relaxed);
        let event = MessageEvent {
            source_node_id: self.node.id.clone(),
            path: path.to_string(),
            data: Bytes::copy_from_slice(data),
            request_id,
        };
        debug!("Message {request_id} {} -> {node_id} at {path}", self.node.id);
        let listeners = target.listeners.read().clone();
        for listener in listeners {
            listener.on_message_received(&event);
        }
        Ok(request_id)
    }

    fn put_data(&self, request: PutRequest) -> Result<DataItem> {
        let (path, data, assets) = request.into_parts();
        let locator = self.network.locator(&self.node.id, &path)?;
        {
            let mut store = self.network.store.lock();
            store.blobs.extend(assets);
            store
                .items
                .insert((self.node.id.clone(), path), data.clone());
        }
        let item = DataItem::new(locator, data);
        self.deliver_data(&[DataEvent::changed(item.clone())]);
        Ok(item)
    }

    fn delete_data(&self, locator: &Locator, filter: PathFilter) -> Result<usize> {
        let removed: Vec<(String, String)> = {
            let mut store = self.network.store.lock();
            let keys: Vec<_> = store
                .items
                .keys()
                .filter(|(node, path)| {
                    locator.node_id().is_none_or(|n| n == node)
                        && filter.matches(path, locator.path())
                })
                .cloned()
                .collect();
            for key in &keys {
                store.items.remove(key);
            }
            keys
        };

        let mut events = Vec::with_capacity(removed.len());
        for (node, path) in &removed {
            let item = DataItem::new(self.network.locator(node, path)?, DataMap::new());
            events.push(DataEvent::deleted(item));
        }
        self.deliver_data(&events);
        Ok(removed.len())
    }

    fn data_items(&self, locator: &Locator, filter: PathFilter) -> Result<Vec<DataItem>> {
        let matching: Vec<_> = self
            .network
            .store
            .lock()
            .items
            .iter()
            .filter(|((node, path), _)| {
                locator.node_id().is_none_or(|n| n == node) && filter.matches(path, locator.path())
            })
            .map(|((node, path), data)| (node.clone(), path.clone(), data.clone()))
            .collect();

        matching
            .into_iter()
            .map(|(node, path, data)| Ok(DataItem::new(self.network.locator(&node, &path)?, data)))
            .collect()
    }

    fn add_connection_callbacks(&self, callbacks: Arc<dyn ConnectionCallbacks>) {
        self.callbacks.write().push(Arc::clone(&callbacks));
        if self.is_connected() {
            callbacks.on_connected();
        }
    }

    fn remove_connection_callbacks(&self, callbacks: &Arc<dyn ConnectionCallbacks>) {
        self.callbacks.write().retain(|c| !Arc::ptr_eq(c, callbacks));
    }

    fn add_event_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
