//! Type registry mapping a stored type name to its record factory.
//!
//! Every record type registers a constructor for its factory in one or more
//! [`Scope`]s. The first resolution in a scope builds the factory, checks it
//! honours the contract, and memoizes it; later resolutions in that scope
//! return the same instance. Names nobody registered resolve to `None`:
//! records persisted by an older or newer build may name types this build
//! does not know, and decoding drops them instead of failing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Result, ShareError};
use crate::record::RecordFactory;

/// A registration namespace. Two scopes never share memoized factories,
/// even for the same type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope(Arc<str>);

impl Scope {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper bound on remembered unknown names per scope. Names come from
/// received data, so the set must not grow with it.
const MAX_CACHED_MISSES: usize = 1024;

type Constructor = Arc<dyn Fn() -> Arc<dyn RecordFactory> + Send + Sync>;

#[derive(Default)]
struct ScopeEntries {
    declared: HashMap<String, Constructor>,
    resolved: HashMap<String, Arc<dyn RecordFactory>>,
    missing: HashSet<String>,
}

/// Process-wide map of `(scope, type name) → factory`.
///
/// All scopes sit behind one mutex; resolution is rare once warm.
#[derive(Default)]
pub struct TypeRegistry {
    scopes: Mutex<HashMap<Scope, ScopeEntries>>,
}

static SHARED: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::new()));

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A lazily created default instance. Prefer constructing a registry
    /// at startup and passing it down; this exists for quick setups.
    pub fn shared() -> Arc<TypeRegistry> {
        Arc::clone(&SHARED)
    }

    /// Declare `type_name` in `scope`. `constructor` runs once, on the
    /// first resolution in that scope. Re-registering a name replaces the
    /// previous declaration and forgets any memoized factory or miss.
    pub fn register<F, C>(&self, scope: &Scope, type_name: impl Into<String>, constructor: C)
    where
        F: RecordFactory + 'static,
        C: Fn() -> F + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        let constructor: Constructor =
            Arc::new(move || -> Arc<dyn RecordFactory> { Arc::new(constructor()) });

        let mut scopes = self.scopes.lock();
        let entries = scopes.entry(scope.clone()).or_default();
        entries.missing.remove(&type_name);
        entries.resolved.remove(&type_name);
        debug!("Registering record type {type_name} in scope {scope}");
        entries.declared.insert(type_name, constructor);
    }

    /// Declare a factory under the name it reports for itself.
    pub fn register_factory<F>(&self, scope: &Scope, factory: F)
    where
        F: RecordFactory + Clone + 'static,
    {
        let type_name = factory.type_name().to_string();
        self.register(scope, type_name, move || factory.clone());
    }

    /// Whether `type_name` has been declared in `scope`.
    pub fn is_registered(&self, scope: &Scope, type_name: &str) -> bool {
        self.scopes
            .lock()
            .get(scope)
            .is_some_and(|e| e.declared.contains_key(type_name))
    }

    /// Resolve the factory for `type_name` in `scope`.
    ///
    /// Returns `Ok(None)` for unknown types. A declared type whose factory
    /// breaks the contract is a [`ShareError::BadRecord`]; that outcome is
    /// not memoized, so every attempt reports it again.
    ///
    /// The constructor runs without the registry lock held, so it may call
    /// back into the registry.
    pub fn resolve(&self, scope: &Scope, type_name: &str) -> Result<Option<Arc<dyn RecordFactory>>> {
        let constructor = {
            let mut scopes = self.scopes.lock();
            let entries = scopes.entry(scope.clone()).or_default();

            if let Some(factory) = entries.resolved.get(type_name) {
                return Ok(Some(Arc::clone(factory)));
            }
            if entries.missing.contains(type_name) {
                trace!("Record type {type_name} already known missing in scope {scope}");
                return Ok(None);
            }
            let Some(constructor) = entries.declared.get(type_name) else {
                warn!("Record type not found when unmarshalling: {type_name} (scope {scope})");
                if entries.missing.len() < MAX_CACHED_MISSES {
                    entries.missing.insert(type_name.to_string());
                }
                return Ok(None);
            };
            Arc::clone(constructor)
        };

        let factory = constructor();
        if factory.type_name() != type_name {
            return Err(ShareError::bad_record(
                type_name,
                format!("factory declares type {}", factory.type_name()),
            ));
        }
        if factory.version() < 0 {
            return Err(ShareError::bad_record(
                type_name,
                format!("factory declares negative version {}", factory.version()),
            ));
        }

        let mut scopes = self.scopes.lock();
        let entries = scopes.entry(scope.clone()).or_default();
        let still_declared = entries
            .declared
            .get(type_name)
            .is_some_and(|current| Arc::ptr_eq(current, &constructor));
        if !still_declared {
            // Re-registered while building; hand out this factory unmemoized.
            return Ok(Some(factory));
        }
        // A racing resolution may have memoized first; keep its instance.
        let memoized = entries
            .resolved
            .entry(type_name.to_string())
            .or_insert(factory);
        Ok(Some(Arc::clone(memoized)))
    }

    /// Number of factories memoized in `scope`.
    pub fn resolved_count(&self, scope: &Scope) -> usize {
        self.scopes
            .lock()
            .get(scope)
            .map_or(0, |e| e.resolved.len())
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes = self.scopes.lock();
        f.debug_struct("TypeRegistry")
            .field("scopes", &scopes.keys().collect::<Vec<_>>())
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
    use crate::record::Record;

    #[derive(Debug)]
    struct Empty;

    impl Record for Empty {
        fn type_name(&self) -> &str {
            "test.Empty"
        }
        fn version(&self) -> i32 {
            1
        }
        fn write_to(&self, _dest: &mut dyn TransportBuffer, _flags: u32) {}
    }

    #[derive(Clone)]
    struct EmptyFactory {
        name: &'static str,
        version: i32,
    }

    impl RecordFactory for EmptyFactory {
        fn type_name(&self) -> &str {
            self.name
        }
        fn version(&self) -> i32 {
            self.version
        }
        fn create_from(
            &self,
            _source: &mut dyn TransportBuffer,
            _version: i32,
        ) -> Result<Box<dyn Record>> {
            Ok(Box::new(Empty))
        }
    }

    fn good() -> EmptyFactory {
        EmptyFactory {
            name: "test.Empty",
            version: 1,
        }
    }

    #[test]
    fn test_resolve_memoizes_per_scope() {
        let registry = TypeRegistry::new();
        let scope = Scope::new("app");
        registry.register_factory(&scope, good());

        let a = registry.resolve(&scope, "test.Empty").unwrap().unwrap();
        let b = registry.resolve(&scope, "test.Empty").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.resolved_count(&scope), 1);
    }

    #[test]
    fn test_scopes_do_not_share_entries() {
        let registry = TypeRegistry::new();
        let app = Scope::new("app");
        let plugin = Scope::new("plugin");
        registry.register_factory(&app, good());
        registry.register_factory(&plugin, good());

        let a = registry.resolve(&app, "test.Empty").unwrap().unwrap();
        let p = registry.resolve(&plugin, "test.Empty").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&a, &p));

        let other = Scope::new("other");
        assert!(registry.resolve(&other, "test.Empty").unwrap().is_none());
    }

    #[test]
    fn test_unknown_type_is_none_and_cached() {
        let registry = TypeRegistry::new();
        let scope = Scope::default();
        assert!(registry.resolve(&scope, "gone.Type").unwrap().is_none());
        assert!(registry.resolve(&scope, "gone.Type").unwrap().is_none());

        // A later registration clears the negative entry.
        registry.register(&scope, "test.Empty", good);
        assert!(registry.resolve(&scope, "test.Empty").unwrap().is_some());
    }

    #[test]
    fn test_late_registration_overrides_miss() {
        let registry = TypeRegistry::new();
        let scope = Scope::default();
        assert!(registry.resolve(&scope, "test.Empty").unwrap().is_none());
        registry.register_factory(&scope, good());
        assert!(registry.resolve(&scope, "test.Empty").unwrap().is_some());
    }

    #[test]
    fn test_mismatched_factory_is_bad_record() {
        let registry = TypeRegistry::new();
        let scope = Scope::default();
        registry.register(&scope, "test.Other", good);

        let err = registry.resolve(&scope, "test.Other").err().unwrap();
        assert!(matches!(err, ShareError::BadRecord { ref type_name, .. } if type_name == "test.Other"));
        // Not memoized: the violation is reported every time.
        assert!(registry.resolve(&scope, "test.Other").is_err());
        assert_eq!(registry.resolved_count(&scope), 0);
    }

    #[test]
    fn test_negative_version_is_bad_record() {
        let registry = TypeRegistry::new();
        let scope = Scope::default();
        registry.register_factory(
            &scope,
            EmptyFactory {
                name: "test.Empty",
                version: -1,
            },
        );
        assert!(matches!(
            registry.resolve(&scope, "test.Empty"),
            Err(ShareError::BadRecord { .. })
        ));
    }

    #[test]
    fn test_is_registered() {
        let registry = TypeRegistry::new();
        let scope = Scope::new("app");
        assert!(!registry.is_registered(&scope, "test.Empty"));
        registry.register_factory(&scope, good());
        assert!(registry.is_registered(&scope, "test.Empty"));
    }

    #[test]
    fn test_shared_is_single_instance() {
        assert!(Arc::ptr_eq(&TypeRegistry::shared(), &TypeRegistry::shared()));
    }

    #[test]
    fn test_constructor_may_use_registry() {
        let registry = Arc::new(TypeRegistry::new());
        let scope = Scope::default();
        let weak = Arc::downgrade(&registry);
        let inner_scope = scope.clone();
        registry.register(&scope, "test.Empty", move || {
            if let Some(registry) = weak.upgrade() {
                assert!(registry.is_registered(&inner_scope, "test.Empty"));
            }
            good()
        });

        let a = registry.resolve(&scope, "test.Empty").unwrap().unwrap();
        let b = registry.resolve(&scope, "test.Empty").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_cached_misses_are_bounded() {
        let registry = TypeRegistry::new();
        let scope = Scope::default();
        for i in 0..MAX_CACHED_MISSES + 50 {
            assert!(registry.resolve(&scope, &format!("gone.T{i}")).unwrap().is_none());
        }
        let scopes = registry.scopes.lock();
        assert_eq!(scopes[&scope].missing.len(), MAX_CACHED_MISSES);
    }
}
