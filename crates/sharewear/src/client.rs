//! WearClient — top-level coordinator for one node.
//!
//! [`WearClient`] ties a [`Transport`] to a [`HandlerDispatcher`] and a
//! [`NodeCache`], and offers record-level put/get/delete and messaging on
//! top of them. Every synchronous method may block on the transport; the
//! `*_async` variants run it on tokio's blocking pool instead.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::addressable::AddressableRecord;
use crate::buffer::MarshalContext;
use crate::config::ShareConfig;
use crate::data_map::BlobSource;
use crate::dispatcher::HandlerDispatcher;
use crate::error::{Result, ShareError};
use crate::events::DataItem;
use crate::handler::WearHandler;
use crate::locator::Locator;
use crate::node_cache::NodeCache;
use crate::record::Record;
use crate::registry::{Scope, TypeRegistry};
use crate::routes::{DataRoute, MessageParams};
use crate::transport::{PathFilter, Transport};

#[derive(Clone)]
pub struct WearClient {
    config: Arc<ShareConfig>,
    transport: Arc<dyn Transport>,
    marshal: MarshalContext,
    dispatcher: Arc<HandlerDispatcher>,
    node_cache: Arc<NodeCache>,
}

impl WearClient {
    /// Create a client over `transport`, resolving record types registered
    /// in `scope` of `registry`. The dispatcher is initialized but not
    /// started; call [`start`](Self::start) to connect.
    pub fn new<T: Transport + 'static>(
        transport: Arc<T>,
        config: ShareConfig,
        registry: Arc<TypeRegistry>,
        scope: Scope,
    ) -> Self {
        let base = MarshalContext::new(registry, scope).with_key_prefix(&config.key_prefix);
        let blobs: Arc<dyn BlobSource> = transport.clone();
        let marshal = base.clone().with_blob_source(blobs);

        let dispatcher = Arc::new(HandlerDispatcher::new(config.clone(), base));
        let node_cache = Arc::new(NodeCache::new());
        dispatcher.register_handler(node_cache.clone());
        dispatcher.init(transport.clone());

        Self {
            config: Arc::new(config),
            transport,
            marshal,
            dispatcher,
            node_cache,
        }
    }

    /// A client with default config over the shared registry.
    pub fn with_defaults<T: Transport + 'static>(transport: Arc<T>) -> Self {
        Self::new(
            transport,
            ShareConfig::default(),
            TypeRegistry::shared(),
            Scope::default(),
        )
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn marshal(&self) -> &MarshalContext {
        &self.marshal
    }

    pub fn dispatcher(&self) -> &Arc<HandlerDispatcher> {
        &self.dispatcher
    }

    pub fn node_cache(&self) -> &Arc<NodeCache> {
        &self.node_cache
    }

    pub fn start(&self) -> Result<()> {
        self.dispatcher.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.dispatcher.stop()
    }

    pub fn register_handler(&self, handler: Arc<dyn WearHandler>) -> bool {
        self.dispatcher.register_handler(handler)
    }

    /// A locator in this client's scheme. `node_id = None` addresses every node.
    pub fn locator(&self, node_id: Option<&str>, path: &str) -> Result<Locator> {
        Locator::new(&self.config.uri_scheme, node_id, path)
    }

    // -- Data ---------------------------------------------------------------

    /// Store `record` under its path on the local node.
    pub fn put(&self, record: &dyn AddressableRecord) -> Result<DataItem> {
        let request = record.to_put_request(&self.marshal)?;
        debug!(
            "Putting {} at {} ({} blobs)",
            record.type_name(),
            request.path(),
            request.assets().len()
        );
        self.transport.put_data(request)
    }

    /// Delete the items `locator` names. Returns how many were removed.
    pub fn delete(&self, locator: &Locator) -> Result<usize> {
        self.transport.delete_data(locator, PathFilter::Literal)
    }

    /// The first decodable record stored under `path` on any node.
    pub fn get_data(&self, path: &str) -> Result<Option<Box<dyn Record>>> {
        let locator = self.locator(None, path)?;
        self.first_record(&locator)
    }

    /// The record `node_id` stored under `path`.
    pub fn get_data_from(&self, node_id: &str, path: &str) -> Result<Option<Box<dyn Record>>> {
        let locator = self.locator(Some(node_id), path)?;
        self.first_record(&locator)
    }

    /// Every `T` stored under the route's path, on any node.
    pub fn get_all_data<T: Record>(&self, route: &DataRoute<T>) -> Result<Vec<T>> {
        let locator = self.locator(None, route.path())?;
        let mut out = Vec::new();
        for item in self.transport.data_items(&locator, PathFilter::Prefix)? {
            if let Some(record) = route.decode(&item, &self.marshal)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn first_record(&self, locator: &Locator) -> Result<Option<Box<dyn Record>>> {
        for item in self.transport.data_items(locator, PathFilter::Literal)? {
            if let Some(record) = item.record(&self.marshal)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    // -- Messages -----------------------------------------------------------

    /// Send a message to `node_id`, or to every connected node when `None`.
    /// Returns the request ids of the messages sent.
    ///
    /// A broadcast skips nodes that fail and logs them.
    pub fn send_message(&self, node_id: Option<&str>, params: &MessageParams) -> Result<Vec<u64>> {
        if let Some(node_id) = node_id {
            let id = self
                .transport
                .send_message(node_id, &params.path, &params.data)?;
            return Ok(vec![id]);
        }

        let targets = self.broadcast_targets()?;
        let mut sent = Vec::with_capacity(targets.len());
        for target in &targets {
            match self.transport.send_message(target, &params.path, &params.data) {
                Ok(id) => sent.push(id),
                Err(e) => warn!("Message to {target} at {} failed: {e}", params.path),
            }
        }
        debug!("Broadcast {} to {}/{} nodes", params.path, sent.len(), targets.len());
        Ok(sent)
    }

    fn broadcast_targets(&self) -> Result<Vec<String>> {
        if self.node_cache.is_initialized() {
            return Ok(self.node_cache.connected_node_ids());
        }
        Ok(self
            .transport
            .connected_nodes()?
            .into_iter()
            .map(|n| n.id)
            .collect())
    }

    // -- Async wrappers -----------------------------------------------------

    pub async fn put_async<R: AddressableRecord>(&self, record: R) -> Result<DataItem> {
        let client = self.clone();
        run_blocking(move || client.put(&record)).await
    }

    pub async fn delete_async(&self, locator: Locator) -> Result<usize> {
        let client = self.clone();
        run_blocking(move || client.delete(&locator)).await
    }

    pub async fn get_data_async(&self, path: String) -> Result<Option<Box<dyn Record>>> {
        let client = self.clone();
        run_blocking(move || client.get_data(&path)).await
    }

    pub async fn get_data_from_async(
        &self,
        node_id: String,
        path: String,
    ) -> Result<Option<Box<dyn Record>>> {
        let client = self.clone();
        run_blocking(move || client.get_data_from(&node_id, &path)).await
    }

    pub async fn get_all_data_async<T: Record>(&self, route: DataRoute<T>) -> Result<Vec<T>> {
        let client = self.clone();
        run_blocking(move || client.get_all_data(&route)).await
    }

    pub async fn send_message_async(
        &self,
        node_id: Option<String>,
        params: MessageParams,
    ) -> Result<Vec<u64>> {
        let client = self.clone();
        run_blocking(move || client.send_message(node_id.as_deref(), &params)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ShareError::Transport(format!("Blocking task failed: {e}")))?
}

impl std::fmt::Debug for WearClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WearClient")
            .field("dispatcher", &self.dispatcher)
            .field("nodes", &self.node_cache)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TransportBuffer;
    use crate::events::MessageEvent;
    use crate::handler::HandlerContext;
    use crate::record::RecordFactory;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Status {
        level: i32,
        icon: Option<Vec<u8>>,
    }

    impl Record for Status {
        fn type_name(&self) -> &str {
            "client.Status"
        }
        fn version(&self) -> i32 {
            1
        }
        fn write_to(&self, dest: &mut dyn TransportBuffer, _flags: u32) {
            dest.write_int(self.level);
            dest.write_blob(self.icon.as_deref());
        }
    }

    impl AddressableRecord for Status {
        fn path(&self) -> &str {
            "/status/battery"
        }
    }

    #[derive(Clone)]
    struct StatusFactory;

    impl RecordFactory for StatusFactory {
        fn type_name(&self) -> &str {
            "client.Status"
        }
        fn version(&self) -> i32 {
            1
        }
        fn create_from(&self, source: &mut dyn TransportBuffer, _version: i32) -> Result<Box<dyn Record>> {
            Ok(Box::new(Status {
                level: source.read_int()?,
                icon: source.read_blob()?,
            }))
        }
    }

    fn client(transport: Arc<MemoryTransport>) -> WearClient {
        let registry = Arc::new(TypeRegistry::new());
        let scope = Scope::new("client-tests");
        registry.register_factory(&scope, StatusFactory);
        WearClient::new(transport, ShareConfig::default(), registry, scope)
    }

    fn pair() -> (WearClient, WearClient) {
        let net = MemoryNetwork::new();
        let phone = client(net.endpoint("phone", "Phone"));
        let watch = client(net.endpoint("watch", "Watch"));
        phone.start().unwrap();
        watch.start().unwrap();
        (phone, watch)
    }

    fn status(level: i32) -> Status {
        Status {
            level,
            icon: Some(vec![level as u8; 4]),
        }
    }

    #[test]
    fn test_put_then_get_across_nodes() {
        let (phone, watch) = pair();
        let item = phone.put(&status(80)).unwrap();
        assert_eq!(item.locator.as_str(), "wear://phone/status/battery");

        let got = watch.get_data("/status/battery").unwrap().unwrap();
        assert_eq!(got.downcast_ref::<Status>(), Some(&status(80)));

        let from = watch.get_data_from("phone", "/status/battery").unwrap();
        assert!(from.is_some());
        assert!(watch.get_data_from("watch", "/status/battery").unwrap().is_none());
    }

    #[test]
    fn test_get_all_data_by_route() {
        let (phone, watch) = pair();
        phone.put(&status(10)).unwrap();
        watch.put(&status(20)).unwrap();

        let route: DataRoute<Status> = DataRoute::new(["status"]);
        let mut levels: Vec<_> = phone
            .get_all_data(&route)
            .unwrap()
            .into_iter()
            .map(|s| s.level)
            .collect();
        levels.sort();
        assert_eq!(levels, vec![10, 20]);
    }

    #[test]
    fn test_delete_removes_item() {
        let (phone, watch) = pair();
        phone.put(&status(5)).unwrap();
        let loc = watch.locator(Some("phone"), "/status/battery").unwrap();
        assert_eq!(watch.delete(&loc).unwrap(), 1);
        assert!(watch.get_data("/status/battery").unwrap().is_none());
    }

    struct Inbox(Mutex<Vec<MessageEvent>>);

    impl WearHandler for Inbox {
        fn handle_message_event(&self, _ctx: &HandlerContext, event: &MessageEvent) -> anyhow::Result<bool> {
            self.0.lock().push(event.clone());
            Ok(true)
        }
    }

    #[test]
    fn test_broadcast_uses_node_cache() {
        let (phone, watch) = pair();
        let inbox = Arc::new(Inbox(Mutex::new(Vec::new())));
        watch.register_handler(inbox.clone());

        assert!(phone.node_cache().is_initialized());
        assert_eq!(phone.node_cache().connected_node_ids(), vec!["watch"]);

        let params = MessageParams::from_record("/status/ping", &status(1));
        let ids = phone.send_message(None, &params).unwrap();
        assert_eq!(ids.len(), 1);

        let received = inbox.0.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].source_node_id, "phone");
        let decoded = received[0].record(watch.marshal()).unwrap().unwrap();
        assert_eq!(decoded.downcast_ref::<Status>(), Some(&status(1)));
    }

    #[test]
    fn test_unicast_to_unknown_node_fails() {
        let (phone, _watch) = pair();
        let params = MessageParams::new("/x", Vec::<u8>::new());
        assert!(phone.send_message(Some("tablet"), &params).is_err());
    }

    #[tokio::test]
    async fn test_async_wrappers() {
        let (phone, watch) = pair();
        phone.put_async(status(42)).await.unwrap();

        let got = watch
            .get_data_async("/status/battery".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.downcast_ref::<Status>().map(|s| s.level), Some(42));

        let all = watch
            .get_all_data_async(DataRoute::<Status>::new(["status"]))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        let loc = watch.locator(None, "/status/battery").unwrap();
        assert_eq!(watch.delete_async(loc).await.unwrap(), 1);
    }
}
