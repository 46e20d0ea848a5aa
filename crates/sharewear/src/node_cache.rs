//! Cache of the peer nodes currently reachable.
//!
//! The cache reconciles against the transport's authoritative node list on
//! first connect and then follows peer events incrementally. It is itself a
//! [`WearHandler`]; register it with the dispatcher to keep it current.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Result, ShareError};
use crate::handler::{HandlerContext, WearHandler};
use crate::peer::PeerNode;
use crate::transport::Transport;

type NodeListener = Arc<dyn Fn(&[PeerNode]) + Send + Sync>;

#[derive(Default)]
pub struct NodeCache {
    nodes: Mutex<HashSet<PeerNode>>,
    /// Held from a mutation until its listener call returns, so the
    /// listener sees snapshots in the order the updates were applied.
    notify: ReentrantMutex<()>,
    initialized: AtomicBool,
    listener: RwLock<Option<NodeListener>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `listener` with the full node list after every change.
    ///
    /// Calls are serialized. The listener may read the cache or update it
    /// from the same thread.
    pub fn set_listener(&self, listener: impl Fn(&[PeerNode]) + Send + Sync + 'static) {
        *self.listener.write() = Some(Arc::new(listener));
    }

    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    /// Bind to `transport` and sync right away if it is connected.
    pub fn init(&self, transport: Arc<dyn Transport>) {
        let connected = transport.is_connected();
        *self.transport.write() = Some(transport);
        if !connected {
            return;
        }
        if let Err(e) = self.sync() {
            warn!("Initial node sync failed: {e}");
        }
    }

    /// Fetch the connected nodes from the transport and reconcile.
    ///
    /// Blocks on the transport.
    pub fn sync(&self) -> Result<()> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(ShareError::NotInitialized("sync"))?;
        let nodes = transport.connected_nodes()?;
        self.reconcile(nodes);
        Ok(())
    }

    /// Replace the cached set with `current`.
    ///
    /// Nodes already cached are refreshed in place, nodes missing from
    /// `current` are dropped, and the listener fires once.
    pub fn reconcile(&self, current: impl IntoIterator<Item = PeerNode>) {
        let _turn = self.notify.lock();
        let snapshot = {
            let mut nodes = self.nodes.lock();
            let mut stale = nodes.clone();
            for node in current {
                stale.remove(&node);
                nodes.replace(node);
            }
            for node in &stale {
                nodes.remove(node);
            }
            debug!("Reconciled nodes: {} present, {} dropped", nodes.len(), stale.len());
            sorted(&nodes)
        };
        self.initialized.store(true, Ordering::SeqCst);
        self.fire(&snapshot);
    }

    pub fn add_node(&self, node: PeerNode) {
        let _turn = self.notify.lock();
        let snapshot = {
            let mut nodes = self.nodes.lock();
            nodes.replace(node);
            sorted(&nodes)
        };
        self.fire(&snapshot);
    }

    pub fn remove_node(&self, node: &PeerNode) {
        let _turn = self.notify.lock();
        let snapshot = {
            let mut nodes = self.nodes.lock();
            nodes.remove(node);
            sorted(&nodes)
        };
        self.fire(&snapshot);
    }

    /// Cached nodes ordered by id.
    pub fn connected_nodes(&self) -> Vec<PeerNode> {
        sorted(&self.nodes.lock())
    }

    pub fn connected_node_ids(&self) -> Vec<String> {
        self.connected_nodes().into_iter().map(|n| n.id).collect()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.lock().iter().any(|n| n.id == node_id)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn fire(&self, nodes: &[PeerNode]) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(nodes);
        }
    }
}

fn sorted(nodes: &HashSet<PeerNode>) -> Vec<PeerNode> {
    let mut out: Vec<_> = nodes.iter().cloned().collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

impl WearHandler for NodeCache {
    fn on_init(&self, ctx: &HandlerContext) {
        self.init(Arc::clone(ctx.transport()));
    }

    fn on_peer_connected(&self, _ctx: &HandlerContext, node: &PeerNode) {
        self.add_node(node.clone());
    }

    fn on_peer_disconnected(&self, _ctx: &HandlerContext, node: &PeerNode) {
        self.remove_node(node);
    }

    fn on_connected(&self, _ctx: &HandlerContext) {
        if self.is_initialized() {
            return;
        }
        if let Err(e) = self.sync() {
            warn!("Node sync on connect failed: {e}");
        }
    }
}

impl fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCache")
            .field("nodes", &self.connected_node_ids())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
