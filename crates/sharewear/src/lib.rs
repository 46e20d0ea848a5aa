//! Sharewear — typed record sharing between paired nodes.
//!
//! This crate lets nodes (a phone and a watch, say) exchange versioned,
//! self-serializing records over a platform data layer, and routes the
//! events that layer delivers to application handlers.
//!
//! # Architecture
//!
//! - **Marshaling**: a [`Record`] writes its fields into a
//!   [`TransportBuffer`]; its [`RecordFactory`], found through the
//!   [`TypeRegistry`], reads them back. Buffers target either a byte stream
//!   or a tagged [`DataMap`].
//! - **Addressing**: an [`AddressableRecord`] lives under a path, and
//!   [`Locator`]s name it on one node or on all of them.
//! - **Transport**: the platform's node client, behind the [`Transport`]
//!   trait. [`MemoryTransport`] is an in-process implementation.
//! - **Dispatch**: the [`HandlerDispatcher`] tracks the connection and
//!   offers events to [`WearHandler`]s; the [`NodeCache`] follows which
//!   peers are reachable.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use sharewear::{MemoryNetwork, WearClient};
//!
//! # fn example() -> sharewear::Result<()> {
//! let network = MemoryNetwork::new();
//! let client = WearClient::with_defaults(network.endpoint("watch", "My Watch"));
//!
//! client.start()?;
//! let status = client.get_data("/status/battery")?;
//! client.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod addressable;
pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod data_map;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod locator;
pub mod logging;
pub mod node_cache;
pub mod peer;
pub mod record;
pub mod registry;
pub mod routes;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use addressable::{AddressableRecord, PutRequest};
pub use buffer::{MapBuffer, MarshalContext, StreamBuffer, TransportBuffer};
pub use client::WearClient;
pub use config::ShareConfig;
pub use connection::{ConnectionFailure, ConnectionState, FailureCode, SuspendCause};
pub use data_map::{Asset, DataMap, DataValue};
pub use dispatcher::HandlerDispatcher;
pub use error::{Result, ShareError};
pub use events::{DataEvent, DataEventKind, DataItem, MessageEvent, RecordEvent};
pub use handler::{HandlerContext, WearHandler};
pub use locator::Locator;
pub use node_cache::NodeCache;
pub use peer::PeerNode;
pub use record::{Record, RecordFactory};
pub use registry::{Scope, TypeRegistry};
pub use routes::{DataRoute, MessageParams, MessageRoute, make_path};
pub use transport::{MemoryNetwork, MemoryTransport, PathFilter, Transport};
