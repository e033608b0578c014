//! Named connection registry.
//!
//! Resolves connection names to adapters lazily and memoizes the result:
//! the first `connection(name)` builds the adapter (through an override
//! resolver or the [`AdapterFactory`]), every later call returns the same
//! `Arc`.
//!
//! Each name's cache entry is either a finished adapter or a pending
//! construction. Callers arriving while a construction is pending subscribe
//! to its outcome and never start one of their own. A failed construction
//! removes the entry, so only a later call tries again.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::{
    // ---
    log_debug,
    AdapterFactory,
    AdapterPtr,
    ConnectionConfig,
    DriverFactory,
    PubSubConfig,
    PubSubError,
    Result,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one construction attempt, as seen by every caller that joined it.
type Outcome = std::result::Result<AdapterPtr, Arc<PubSubError>>;

/// One cache entry per connection name.
///
/// The map lock is only held to inspect or swap an entry; construction runs
/// outside it, so a slow backend blocks only callers of that name.
enum Slot {
    Ready(AdapterPtr),
    Pending(watch::Receiver<Option<Outcome>>),
}

impl Slot {
    fn ready(&self) -> Option<&AdapterPtr> {
        match self {
            Slot::Ready(adapter) => Some(adapter),
            Slot::Pending(_) => None,
        }
    }
}

/// What a caller does after looking at the cache.
enum Role {
    Lead(watch::Sender<Option<Outcome>>),
    Wait(watch::Receiver<Option<Outcome>>),
}

/// Removes a pending entry if its construction is abandoned mid-flight
/// (the leading caller's future was dropped). Waiters then see the
/// channel close and start over.
struct PendingGuard<'a> {
    cache: &'a Mutex<HashMap<String, Slot>>,
    name: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut cache = lock_ignore_poison(self.cache);
        if matches!(cache.get(self.name), Some(Slot::Pending(_))) {
            cache.remove(self.name);
        }
    }
}

// Resolver trait for type-erased async constructors
trait ResolverFn: Send + Sync {
    fn call(&self, config: ConnectionConfig) -> BoxFuture<'static, Result<AdapterPtr>>;
}

struct Resolver<F> {
    func: F,
}

impl<F, Fut> ResolverFn for Resolver<F>
where
    F: Fn(ConnectionConfig) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AdapterPtr>> + Send + 'static,
{
    fn call(&self, config: ConnectionConfig) -> BoxFuture<'static, Result<AdapterPtr>> {
        Box::pin((self.func)(config))
    }
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_ignore_poison<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_ignore_poison<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lazily resolved, memoized pub-sub connections keyed by name.
///
/// `ConnectionRegistry` is `Send + Sync`; share it as `Arc<ConnectionRegistry>`.
///
/// # Guarantees
///
/// - At most one adapter is ever built per name. Concurrent first lookups
///   of the same name wait for a single construction and all receive the
///   same `Arc`.
/// - A failed construction caches nothing. Callers that were waiting on it
///   receive its error (as [`PubSubError::Shared`]); the next lookup tries
///   again.
/// - Override resolvers registered with [`extend`](Self::extend) take
///   precedence over the factory for names that are not cached yet.
///
/// # Example
///
/// ```
/// use pubsub_registry::{ConnectionConfig, ConnectionRegistry, Envelope, PubSubConfig};
///
/// # async fn example() -> pubsub_registry::Result<()> {
/// let config = PubSubConfig::new("local")
///     .with_connection("local", ConnectionConfig::new().with("driver", "local"));
/// let registry = ConnectionRegistry::new(config);
///
/// let adapter = registry.connection(None).await?;
/// let mut handle = adapter.subscribe("greetings".into()).await?;
/// adapter.publish(Envelope::new("greetings", "hello")).await?;
///
/// assert!(handle.inbox.recv().await.is_some());
/// # Ok(())
/// # }
/// ```
pub struct ConnectionRegistry {
    // ---
    factory: Arc<dyn AdapterFactory>,
    connections: HashMap<String, ConnectionConfig>,
    default: RwLock<String>,
    cache: Mutex<HashMap<String, Slot>>,
    extensions: RwLock<HashMap<String, Arc<dyn ResolverFn>>>,
}

impl ConnectionRegistry {
    /// Create a registry backed by the built-in [`DriverFactory`].
    pub fn new(config: PubSubConfig) -> Self {
        Self::with_factory(Arc::new(DriverFactory), config)
    }

    /// Create a registry with a custom factory.
    pub fn with_factory(factory: Arc<dyn AdapterFactory>, config: PubSubConfig) -> Self {
        // ---
        Self {
            factory,
            connections: config.connections,
            default: RwLock::new(config.default),
            cache: Mutex::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry from [`PubSubConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(PubSubConfig::from_env())
    }

    /// Resolve a connection, building it on first use.
    ///
    /// `None` resolves the current [default](Self::default_connection).
    ///
    /// # Errors
    ///
    /// - `NotConfigured` if the name has no entry in `connections`.
    /// - `MissingDriver` if the entry has no `driver` and no override
    ///   resolver is registered for it.
    /// - `UnsupportedDriver` if the driver is unknown to the factory.
    /// - Any error raised by the resolver or the adapter's construction,
    ///   unchanged for the caller that ran it. Callers that waited on that
    ///   same construction get it wrapped in `Shared`; use
    ///   [`PubSubError::root`] to inspect it.
    pub async fn connection(&self, name: Option<&str>) -> Result<AdapterPtr> {
        // ---
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_connection(),
        };

        loop {
            let role = {
                let mut cache = lock_ignore_poison(&self.cache);

                match cache.get(&name) {
                    Some(Slot::Ready(adapter)) => return Ok(Arc::clone(adapter)),
                    Some(Slot::Pending(rx)) => Role::Wait(rx.clone()),
                    None => {
                        if !self.connections.contains_key(&name) {
                            return Err(PubSubError::NotConfigured(name));
                        }
                        let (tx, rx) = watch::channel(None);
                        cache.insert(name.clone(), Slot::Pending(rx));
                        Role::Lead(tx)
                    }
                }
            };

            match role {
                Role::Lead(tx) => return self.lead(&name, tx).await,
                Role::Wait(mut rx) => {
                    let outcome = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|outcome| (*outcome).clone());
                    match outcome {
                        Some(Ok(adapter)) => return Ok(adapter),
                        Some(Err(err)) => return Err(PubSubError::Shared(err)),
                        // Leader was cancelled before finishing; look again.
                        None => continue,
                    }
                }
            }
        }
    }

    /// Run the construction for `name` and publish its outcome to waiters.
    async fn lead(&self, name: &str, tx: watch::Sender<Option<Outcome>>) -> Result<AdapterPtr> {
        // ---
        let guard = PendingGuard {
            cache: &self.cache,
            name,
            armed: true,
        };

        let result = self.make_connection(name).await;
        guard.disarm();

        match result {
            Ok(adapter) => {
                lock_ignore_poison(&self.cache)
                    .insert(name.to_string(), Slot::Ready(Arc::clone(&adapter)));
                tx.send_replace(Some(Ok(Arc::clone(&adapter))));
                Ok(adapter)
            }
            Err(err) => {
                lock_ignore_poison(&self.cache).remove(name);
                if tx.receiver_count() == 0 {
                    return Err(err);
                }
                let err = Arc::new(err);
                tx.send_replace(Some(Err(Arc::clone(&err))));
                Err(PubSubError::Shared(err))
            }
        }
    }

    /// Build the adapter for a configured, uncached name.
    async fn make_connection(&self, name: &str) -> Result<AdapterPtr> {
        // ---
        let config = self
            .connections
            .get(name)
            .ok_or_else(|| PubSubError::NotConfigured(name.to_string()))?;

        let resolver = read_ignore_poison(&self.extensions).get(name).cloned();
        if let Some(resolver) = resolver {
            log_debug!("registry: resolving [{name}] through its override");
            return resolver.call(config.clone()).await;
        }

        let driver = match config.get("driver") {
            None => return Err(PubSubError::MissingDriver(name.to_string())),
            Some(value) => match value.as_str() {
                Some(driver) => driver,
                None => return Err(PubSubError::UnsupportedDriver(value.to_string())),
            },
        };

        log_debug!("registry: resolving [{name}] with driver {driver}");
        self.factory.make(driver, config).await
    }

    /// The name used when `connection(None)` is called.
    pub fn default_connection(&self) -> String {
        read_ignore_poison(&self.default).clone()
    }

    /// Change the default connection name.
    ///
    /// The name is not validated and cached adapters are left alone.
    pub fn set_default_connection(&self, name: impl Into<String>) {
        *write_ignore_poison(&self.default) = name.into();
    }

    /// Register (or replace) an override resolver for `name`.
    ///
    /// The resolver receives a copy of the name's connection config and its
    /// `driver` field is not required. It is consulted before the factory,
    /// but only when `name` is resolved while still uncached: extending a
    /// name that already has a cached adapter does **not** replace that
    /// adapter.
    ///
    /// # Example
    ///
    /// ```
    /// use pubsub_registry::{ConnectionConfig, ConnectionRegistry, DriverFactory, AdapterFactory, PubSubConfig};
    ///
    /// # async fn example() -> pubsub_registry::Result<()> {
    /// let config = PubSubConfig::new("custom")
    ///     .with_connection("custom", ConnectionConfig::new().with("anything", true));
    /// let registry = ConnectionRegistry::new(config);
    ///
    /// registry.extend("custom", |_config| async {
    ///     DriverFactory.make("local", &ConnectionConfig::new()).await
    /// });
    ///
    /// let adapter = registry.connection(Some("custom")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn extend<F, Fut>(&self, name: impl Into<String>, resolver: F)
    where
        F: Fn(ConnectionConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AdapterPtr>> + Send + 'static,
    {
        // ---
        let resolver: Arc<dyn ResolverFn> = Arc::new(Resolver { func: resolver });
        write_ignore_poison(&self.extensions).insert(name.into(), resolver);
    }

    /// True if an override resolver is registered for `name`.
    pub fn has_extension(&self, name: &str) -> bool {
        read_ignore_poison(&self.extensions).contains_key(name)
    }

    /// True if `name` has a constructed, cached adapter.
    pub fn is_cached(&self, name: &str) -> bool {
        lock_ignore_poison(&self.cache)
            .get(name)
            .is_some_and(|slot| slot.ready().is_some())
    }

    /// Names with a constructed, cached adapter, sorted.
    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_ignore_poison(&self.cache)
            .iter()
            .filter(|(_, slot)| slot.ready().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Close every cached adapter.
    ///
    /// Adapters stay cached; this only releases their backend resources.
    /// All adapters are closed even if some fail; the first error is returned.
    pub async fn close_all(&self) -> Result<()> {
        // ---
        let adapters: Vec<AdapterPtr> = lock_ignore_poison(&self.cache)
            .values()
            .filter_map(|slot| slot.ready().cloned())
            .collect();

        let mut first_err = None;
        for adapter in adapters {
            if let Err(err) = adapter.close().await {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry(connections: serde_json::Value) -> ConnectionRegistry {
        let config = serde_json::from_value(json!({ "default": "a", "connections": connections }))
            .expect("valid registry config");
        ConnectionRegistry::new(config)
    }

    fn entries(registry: &ConnectionRegistry) -> usize {
        lock_ignore_poison(&registry.cache).len()
    }

    #[tokio::test]
    async fn failed_lookups_leave_no_cache_entry() {
        let registry = registry(json!({ "a": {}, "b": { "driver": "carrier-pigeon" } }));

        assert!(registry.connection(Some("missing")).await.is_err());
        assert!(registry.connection(Some("a")).await.is_err());
        assert!(registry.connection(Some("b")).await.is_err());

        assert_eq!(entries(&registry), 0);
    }

    #[tokio::test]
    async fn successful_lookup_leaves_a_ready_entry() {
        let registry = registry(json!({ "a": { "driver": "local" } }));

        registry.connection(None).await.unwrap();

        let cache = lock_ignore_poison(&registry.cache);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").and_then(Slot::ready).is_some());
    }

    #[test]
    fn shared_errors_keep_their_kind() {
        let shared = PubSubError::Shared(Arc::new(PubSubError::MissingDriver("a".into())));
        assert!(shared.is_configuration());
        assert_eq!(
            shared.to_string(),
            "The pub-sub connection [a] is missing a \"driver\" config var."
        );
    }
}
