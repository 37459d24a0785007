//! Provider service registry.
//!
//! The [`ProviderServiceRegistry`] hands out at most one instance of each
//! capability per provider. Instances are constructed lazily from an explicit
//! [`DispatchTable`] and memoized for the registry's lifetime.
//!
//! The registry is an explicit object: build one (usually with
//! [`ProviderServiceRegistry::with_builtins`]), wrap it in an `Arc`, and pass
//! it to every [`Database`](crate::Database) that should share instances.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::error::{DataError, Result};

use super::provider::ProviderIdentity;
use super::traits::{BulkCopier, QueryTranslator, SyntaxProvider, TableGenerator};

/// Type-erased constructor for capability `C`.
pub type Constructor<C> = Arc<dyn Fn(&ServiceContext<'_>) -> Result<Arc<C>> + Send + Sync>;

/// A capability contract that can be registered and resolved per provider.
///
/// Implemented for the contract trait objects (`dyn SyntaxProvider`, ...).
pub trait Capability: Send + Sync + 'static {
    /// Display name used in errors and logs.
    const NAME: &'static str;

    /// This contract's slot in a provider's constructor set.
    fn constructor(set: &ProviderConstructors) -> Option<&Constructor<Self>>;
}

impl Capability for dyn SyntaxProvider {
    const NAME: &'static str = "syntax provider";

    fn constructor(set: &ProviderConstructors) -> Option<&Constructor<Self>> {
        set.syntax.as_ref()
    }
}

impl Capability for dyn QueryTranslator {
    const NAME: &'static str = "query translator";

    fn constructor(set: &ProviderConstructors) -> Option<&Constructor<Self>> {
        set.translator.as_ref()
    }
}

impl Capability for dyn TableGenerator {
    const NAME: &'static str = "table generator";

    fn constructor(set: &ProviderConstructors) -> Option<&Constructor<Self>> {
        set.table_generator.as_ref()
    }
}

impl Capability for dyn BulkCopier {
    const NAME: &'static str = "bulk copier";

    fn constructor(set: &ProviderConstructors) -> Option<&Constructor<Self>> {
        set.bulk_copier.as_ref()
    }
}

/// What a constructor sees: the provider being built for and the registry,
/// so one capability can depend on another bound to the same provider.
pub struct ServiceContext<'a> {
    provider: &'a ProviderIdentity,
    registry: &'a ProviderServiceRegistry,
}

impl<'a> ServiceContext<'a> {
    pub fn provider(&self) -> &'a ProviderIdentity {
        self.provider
    }

    pub fn registry(&self) -> &'a ProviderServiceRegistry {
        self.registry
    }

    /// Resolve another capability for the same provider.
    pub fn get_service<C: Capability + ?Sized>(&self) -> Result<Arc<C>> {
        self.registry.get_service::<C>(self.provider)
    }
}

fn erase<C, F>(f: F) -> Constructor<C>
where
    C: ?Sized,
    F: Fn(&ServiceContext<'_>) -> Result<Arc<C>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Constructors for every capability one provider supports.
///
/// Missing entries are unsupported combinations. Cloning shares the
/// constructors, which is how close relatives (e.g. the two Oracle drivers)
/// reuse one set.
#[derive(Clone, Default)]
pub struct ProviderConstructors {
    syntax: Option<Constructor<dyn SyntaxProvider>>,
    translator: Option<Constructor<dyn QueryTranslator>>,
    table_generator: Option<Constructor<dyn TableGenerator>>,
    bulk_copier: Option<Constructor<dyn BulkCopier>>,
}

impl ProviderConstructors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn syntax<S, F>(mut self, f: F) -> Self
    where
        S: SyntaxProvider + 'static,
        F: Fn(&ServiceContext<'_>) -> Result<S> + Send + Sync + 'static,
    {
        self.syntax = Some(erase(move |ctx| {
            Ok(Arc::new(f(ctx)?) as Arc<dyn SyntaxProvider>)
        }));
        self
    }

    pub fn translator<T, F>(mut self, f: F) -> Self
    where
        T: QueryTranslator + 'static,
        F: Fn(&ServiceContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.translator = Some(erase(move |ctx| {
            Ok(Arc::new(f(ctx)?) as Arc<dyn QueryTranslator>)
        }));
        self
    }

    pub fn table_generator<G, F>(mut self, f: F) -> Self
    where
        G: TableGenerator + 'static,
        F: Fn(&ServiceContext<'_>) -> Result<G> + Send + Sync + 'static,
    {
        self.table_generator = Some(erase(move |ctx| {
            Ok(Arc::new(f(ctx)?) as Arc<dyn TableGenerator>)
        }));
        self
    }

    pub fn bulk_copier<B, F>(mut self, f: F) -> Self
    where
        B: BulkCopier + 'static,
        F: Fn(&ServiceContext<'_>) -> Result<B> + Send + Sync + 'static,
    {
        self.bulk_copier = Some(erase(move |ctx| {
            Ok(Arc::new(f(ctx)?) as Arc<dyn BulkCopier>)
        }));
        self
    }

    /// Names of the capabilities this set can construct.
    pub fn capability_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.syntax.is_some() {
            names.push(<dyn SyntaxProvider as Capability>::NAME);
        }
        if self.translator.is_some() {
            names.push(<dyn QueryTranslator as Capability>::NAME);
        }
        if self.table_generator.is_some() {
            names.push(<dyn TableGenerator as Capability>::NAME);
        }
        if self.bulk_copier.is_some() {
            names.push(<dyn BulkCopier as Capability>::NAME);
        }
        names
    }
}

impl fmt::Debug for ProviderConstructors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.capability_names()).finish()
    }
}

/// Provider → constructor set.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<ProviderIdentity, ProviderConstructors>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a provider to its constructor set, replacing any previous entry.
    pub fn insert(&mut self, provider: ProviderIdentity, constructors: ProviderConstructors) {
        self.entries.insert(provider, constructors);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, provider: ProviderIdentity, constructors: ProviderConstructors) -> Self {
        self.insert(provider, constructors);
        self
    }

    pub fn get(&self, provider: &ProviderIdentity) -> Option<&ProviderConstructors> {
        self.entries.get(provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderIdentity> {
        self.entries.keys()
    }
}

/// Outcome of [`ProviderServiceRegistry::resolve`].
pub enum Resolution<C: ?Sized> {
    /// A memoized instance was returned.
    Found(Arc<C>),
    /// The instance was constructed (or lost a construction race) and is now memoized.
    Constructed(Arc<C>),
    /// No mapping exists for this (provider, capability); nothing was constructed.
    Unsupported,
}

impl<C: ?Sized> Resolution<C> {
    pub fn instance(self) -> Option<Arc<C>> {
        match self {
            Resolution::Found(c) | Resolution::Constructed(c) => Some(c),
            Resolution::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Resolution::Unsupported)
    }
}

impl<C: ?Sized> fmt::Debug for Resolution<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resolution::Found(_) => "Found",
            Resolution::Constructed(_) => "Constructed",
            Resolution::Unsupported => "Unsupported",
        })
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ServiceKey {
    provider: ProviderIdentity,
    capability: TypeId,
}

impl ServiceKey {
    fn of<C: Capability + ?Sized>(provider: &ProviderIdentity) -> Self {
        Self {
            provider: provider.clone(),
            capability: TypeId::of::<C>(),
        }
    }
}

/// Per-(provider, capability) memoized capability instances.
pub struct ProviderServiceRegistry {
    dispatch: DispatchTable,
    /// Values are `Arc<C>` for the key's capability `C`.
    instances: RwLock<HashMap<ServiceKey, Box<dyn Any + Send + Sync>>>,
}

impl ProviderServiceRegistry {
    /// Create a registry resolving through `dispatch`.
    pub fn new(dispatch: DispatchTable) -> Self {
        Self {
            dispatch,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry over the built-in dispatch table.
    pub fn with_builtins() -> Self {
        Self::new(crate::drivers::builtin_dispatch())
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Providers with a dispatch entry, sorted by name.
    pub fn providers(&self) -> Vec<ProviderIdentity> {
        let mut providers: Vec<_> = self.dispatch.providers().cloned().collect();
        providers.sort_by(|a, b| a.name().cmp(b.name()));
        providers
    }

    /// Register an instance directly.
    ///
    /// Fails with `DuplicateRegistration` if an instance is already memoized
    /// for this (provider, capability).
    pub fn register<C: Capability + ?Sized>(
        &self,
        provider: &ProviderIdentity,
        instance: Arc<C>,
    ) -> Result<()> {
        let key = ServiceKey::of::<C>(provider);
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if instances.contains_key(&key) {
            return Err(DataError::DuplicateRegistration {
                provider: provider.to_string(),
                capability: C::NAME,
            });
        }
        instances.insert(key, Box::new(instance));
        debug!("Registered {} for {}", C::NAME, provider);
        Ok(())
    }

    /// Register an instance, replacing (and returning) any memoized one.
    pub fn register_or_replace<C: Capability + ?Sized>(
        &self,
        provider: &ProviderIdentity,
        instance: Arc<C>,
    ) -> Option<Arc<C>> {
        let key = ServiceKey::of::<C>(provider);
        let previous = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Box::new(instance));
        if previous.is_some() {
            debug!("Replaced {} for {}", C::NAME, provider);
        } else {
            debug!("Registered {} for {}", C::NAME, provider);
        }
        previous.and_then(|boxed| boxed.downcast::<Arc<C>>().ok().map(|arc| *arc))
    }

    /// Memoized instance only; never constructs.
    pub fn lookup<C: Capability + ?Sized>(&self, provider: &ProviderIdentity) -> Option<Arc<C>> {
        let key = ServiceKey::of::<C>(provider);
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .and_then(|boxed| boxed.downcast_ref::<Arc<C>>())
            .cloned()
    }

    /// Resolve a capability, constructing and memoizing it on first use.
    ///
    /// The constructor runs without holding the lock. If another thread
    /// publishes first, its instance wins and ours is discarded, so every
    /// caller observes the same instance.
    pub fn resolve<C: Capability + ?Sized>(
        &self,
        provider: &ProviderIdentity,
    ) -> Result<Resolution<C>> {
        if let Some(found) = self.lookup::<C>(provider) {
            trace!("{} for {}: memoized", C::NAME, provider);
            return Ok(Resolution::Found(found));
        }

        let Some(constructor) = self.dispatch.get(provider).and_then(C::constructor) else {
            return Ok(Resolution::Unsupported);
        };

        let ctx = ServiceContext {
            provider,
            registry: self,
        };
        let built = (**constructor)(&ctx)?;

        let key = ServiceKey::of::<C>(provider);
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(winner) = instances
            .get(&key)
            .and_then(|boxed| boxed.downcast_ref::<Arc<C>>())
        {
            debug!(
                "{} for {}: discarding instance that lost a construction race",
                C::NAME,
                provider
            );
            return Ok(Resolution::Constructed(winner.clone()));
        }
        instances.insert(key, Box::new(built.clone()));
        debug!("Constructed {} for {}", C::NAME, provider);
        Ok(Resolution::Constructed(built))
    }

    /// Resolve a capability or fail with `UnsupportedProvider`.
    pub fn get_service<C: Capability + ?Sized>(&self, provider: &ProviderIdentity) -> Result<Arc<C>> {
        self.resolve::<C>(provider)?
            .instance()
            .ok_or_else(|| DataError::unsupported(provider, C::NAME))
    }

    /// Whether the capability is memoized or constructible for `provider`.
    pub fn supports<C: Capability + ?Sized>(&self, provider: &ProviderIdentity) -> bool {
        self.lookup::<C>(provider).is_some()
            || self
                .dispatch
                .get(provider)
                .and_then(C::constructor)
                .is_some()
    }
}

impl Default for ProviderServiceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ProviderServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let memoized = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ProviderServiceRegistry")
            .field("dispatch", &self.dispatch)
            .field("memoized", &memoized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::Engine;
    use crate::core::schema::ColumnMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    struct CountingSyntax {
        provider: ProviderIdentity,
    }

    impl SyntaxProvider for CountingSyntax {
        fn provider(&self) -> &ProviderIdentity {
            &self.provider
        }

        fn column_type(&self, _column: &ColumnMetadata) -> String {
            "TEXT".to_string()
        }

        fn table_exists_sql(&self, _schema: Option<&str>, table: &str) -> String {
            format!("SELECT COUNT(*) FROM tables WHERE name = '{}'", table)
        }

        fn paginate(&self, sql: &str, _: Option<u64>, _: Option<u64>, _: bool) -> String {
            sql.to_string()
        }
    }

    fn counting_registry(calls: Arc<AtomicUsize>) -> ProviderServiceRegistry {
        let constructors = ProviderConstructors::new().syntax(move |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(CountingSyntax {
                provider: ctx.provider().clone(),
            })
        });
        ProviderServiceRegistry::new(
            DispatchTable::new().with(ProviderIdentity::sqlite(), constructors),
        )
    }

    #[test]
    fn test_get_service_returns_same_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());
        let provider = ProviderIdentity::sqlite();

        let first = registry.get_service::<dyn SyntaxProvider>(&provider).unwrap();
        let second = registry.get_service::<dyn SyntaxProvider>(&provider).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_reports_found_after_constructed() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        let provider = ProviderIdentity::sqlite();

        let first = registry.resolve::<dyn SyntaxProvider>(&provider).unwrap();
        assert!(matches!(first, Resolution::Constructed(_)));
        let second = registry.resolve::<dyn SyntaxProvider>(&provider).unwrap();
        assert!(matches!(second, Resolution::Found(_)));
    }

    #[test]
    fn test_concurrent_first_access_publishes_one_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(calls));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_service::<dyn SyntaxProvider>(&ProviderIdentity::sqlite())
                        .unwrap()
                })
            })
            .collect();

        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[test]
    fn test_unsupported_constructs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());

        let resolution = registry
            .resolve::<dyn BulkCopier>(&ProviderIdentity::sqlite())
            .unwrap();
        assert!(!resolution.is_supported());

        let err = registry
            .get_service::<dyn SyntaxProvider>(&ProviderIdentity::firebird())
            .err()
            .unwrap();
        match err {
            DataError::UnsupportedProvider {
                provider,
                capability,
            } => {
                assert_eq!(provider, "Firebird");
                assert_eq!(capability, "syntax provider");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let registry = ProviderServiceRegistry::new(DispatchTable::new());
        let provider = ProviderIdentity::new("Custom", Engine::Sqlite);
        let make = || {
            Arc::new(CountingSyntax {
                provider: ProviderIdentity::new("Custom", Engine::Sqlite),
            }) as Arc<dyn SyntaxProvider>
        };

        registry.register(&provider, make()).unwrap();
        let err = registry.register(&provider, make()).unwrap_err();
        assert!(matches!(err, DataError::DuplicateRegistration { .. }));

        let replacement = make();
        let previous = registry.register_or_replace(&provider, replacement.clone());
        assert!(previous.is_some());
        let current = registry.lookup::<dyn SyntaxProvider>(&provider).unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_register_or_replace_logs_replacement_only_when_memoized() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let registry = ProviderServiceRegistry::new(DispatchTable::new());
        let provider = ProviderIdentity::new("Custom", Engine::Sqlite);
        let make = || {
            Arc::new(CountingSyntax {
                provider: ProviderIdentity::new("Custom", Engine::Sqlite),
            }) as Arc<dyn SyntaxProvider>
        };

        tracing::subscriber::with_default(subscriber, || {
            assert!(registry.register_or_replace(&provider, make()).is_none());
            assert!(!logs.contents().contains("Replaced"));
            assert!(logs.contents().contains("Registered syntax provider for Custom"));

            assert!(registry.register_or_replace(&provider, make()).is_some());
            assert!(logs.contents().contains("Replaced syntax provider for Custom"));
        });
    }

    #[test]
    fn test_registered_instance_wins_over_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(calls.clone());
        let provider = ProviderIdentity::sqlite();
        let injected: Arc<dyn SyntaxProvider> = Arc::new(CountingSyntax {
            provider: provider.clone(),
        });

        registry.register(&provider, injected.clone()).unwrap();
        let resolved = registry.get_service::<dyn SyntaxProvider>(&provider).unwrap();

        assert!(Arc::ptr_eq(&resolved, &injected));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_supports() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        assert!(registry.supports::<dyn SyntaxProvider>(&ProviderIdentity::sqlite()));
        assert!(!registry.supports::<dyn TableGenerator>(&ProviderIdentity::sqlite()));
        assert!(!registry.supports::<dyn SyntaxProvider>(&ProviderIdentity::mssql()));
    }
}
