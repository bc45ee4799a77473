//! Command registry and dispatcher (§4.F): maps a request's key to a
//! handler, running an ordered filter chain around it.

use crate::error::{Error, Result, SetupError};
use crate::framer::Request;
use crate::session::Session;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Everything a command handler or filter needs to act on one request
/// (§4.F). `cancel` starts `false`; a filter's `on_executing` sets it to
/// `true` to skip the handler without closing the session (§4.F step 4).
pub struct CommandContext {
    pub session: Arc<Session>,
    pub request: Request,
    pub cancel: bool,
}

impl CommandContext {
    pub fn new(session: Arc<Session>, request: Request) -> Self {
        Self { session, request, cancel: false }
    }
}

/// A single command's business logic (§4.F). Stored as a trait object in
/// the registry, so this uses `#[async_trait]` rather than native async
/// fn in traits.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, ctx: &mut CommandContext) -> Result<()>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(&mut CommandContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    async fn execute(&self, ctx: &mut CommandContext) -> Result<()> {
        (self)(ctx).await
    }
}

/// A cross-cutting wrapper invoked before and after a command's
/// `execute` (§4.F): logging, metrics, authorization, and the like.
/// Filters registered for a command run in registration order around the
/// handler; any filter returning `Err` short-circuits the remaining
/// chain and the handler itself.
#[async_trait]
pub trait CommandFilter: Send + Sync {
    /// Named for the info-level log line emitted when this filter sets
    /// `ctx.cancel = true` (§4.F step 4).
    fn name(&self) -> &str;

    async fn on_executing(&self, ctx: &mut CommandContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn on_executed(&self, ctx: &mut CommandContext, outcome: &Result<()>) {
        let _ = (ctx, outcome);
    }
}

#[derive(Clone)]
struct Entry {
    handler: Arc<dyn CommandHandler>,
    filters: Arc<Vec<Arc<dyn CommandFilter>>>,
}

/// A resolved registry lookup: callers invoke the handler/filter chain
/// through this handle. Holds its own `Arc`s, so it outlives the
/// `ArcSwap` snapshot it was read from (§4.F, §9 design note on
/// copy-on-write registries).
pub struct LookupEntry {
    entry: Entry,
}

impl LookupEntry {
    /// Runs `on_executing` in filter order; if one sets `ctx.cancel`, the
    /// handler (and every `on_executed`) is skipped and dispatch reports
    /// success, since a filter rejection is routine, not an error (§4.F
    /// step 4). Otherwise runs the handler, then `on_executed` for each
    /// filter in registration order.
    pub async fn invoke(&self, ctx: &mut CommandContext) -> Result<()> {
        for filter in self.entry.filters.iter() {
            filter.on_executing(ctx).await?;
            if ctx.cancel {
                info!(filter = filter.name(), command = %ctx.request.key, "command dispatch cancelled by filter");
                return Ok(());
            }
        }

        let outcome = self.entry.handler.execute(ctx).await;

        for filter in self.entry.filters.iter() {
            filter.on_executed(ctx, &outcome).await;
        }

        outcome
    }
}

/// Case-insensitive command table, published as an immutable snapshot via
/// `ArcSwap` so lookups never block a concurrent rebuild (§4.F, §9 design
/// note on copy-on-write registries).
pub struct CommandRegistry {
    table: ArcSwap<HashMap<String, Entry>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder { table: HashMap::new() }
    }

    pub fn lookup(&self, key: &str) -> Option<LookupEntry> {
        let canonical = key.to_ascii_lowercase();
        let table = self.table.load();
        table.get(&canonical).map(|entry| LookupEntry { entry: entry.clone() })
    }

    /// Applies a batch of add/remove/update operations in one copy-on-write
    /// publish (§3 "Rebuilt atomically when loaders report adds/removes/
    /// updates; swapped in by a single publish"). Readers never observe a
    /// partially-applied batch: the whole `HashMap` is cloned, mutated, and
    /// swapped in with one `ArcSwap::store`.
    pub fn apply(&self, updates: Vec<CommandUpdate>) {
        let mut next = (*self.table.load_full()).clone();
        for update in updates {
            match update {
                CommandUpdate::Upsert { key, handler, filters } => {
                    next.insert(key.to_ascii_lowercase(), Entry { handler, filters: Arc::new(filters) });
                }
                CommandUpdate::Remove { key } => {
                    next.remove(&key.to_ascii_lowercase());
                }
            }
        }
        self.table.store(Arc::new(next));
    }
}

/// One add/remove/update operation a [`CommandLoader`] can push at runtime
/// (§9 design note: "still support additional loaders that can push
/// add/remove/update events at runtime").
pub enum CommandUpdate {
    Upsert { key: String, handler: Arc<dyn CommandHandler>, filters: Vec<Arc<dyn CommandFilter>> },
    Remove { key: String },
}

/// Discovers a set of named commands, either at setup time (via
/// [`CommandRegistryBuilder::register_loader`]) or later, by retaining a
/// reference to the built [`CommandRegistry`] and calling
/// [`CommandRegistry::apply`] directly (§6 "discover commands via all
/// loaders"; §9 "reflection-based discovery replaced with an explicit
/// registry-builder... still support additional loaders").
pub trait CommandLoader: Send + Sync {
    /// Commands this loader contributes at setup time.
    fn load(&self) -> Vec<(String, Arc<dyn CommandHandler>)>;
}

/// Builder for a [`CommandRegistry`], rejecting duplicate command names
/// (§4.F, §6 setup sequence).
pub struct CommandRegistryBuilder {
    table: HashMap<String, Entry>,
}

impl CommandRegistryBuilder {
    pub fn register(
        mut self,
        key: impl Into<String>,
        handler: impl CommandHandler + 'static,
    ) -> std::result::Result<Self, SetupError> {
        let key = key.into();
        let canonical = key.to_ascii_lowercase();
        if self.table.contains_key(&canonical) {
            return Err(SetupError::DuplicateCommand(key));
        }
        self.table.insert(
            canonical,
            Entry { handler: Arc::new(handler), filters: Arc::new(Vec::new()) },
        );
        Ok(self)
    }

    /// Discovers commands from a [`CommandLoader`] (§6 setup sequence:
    /// "discover commands via all loaders"). Rejects a duplicate name the
    /// same way [`Self::register`] does — across loaders as well as
    /// explicit `register` calls, a command key is unique.
    pub fn register_loader(mut self, loader: &dyn CommandLoader) -> std::result::Result<Self, SetupError> {
        for (key, handler) in loader.load() {
            let canonical = key.to_ascii_lowercase();
            if self.table.contains_key(&canonical) {
                return Err(SetupError::DuplicateCommand(key));
            }
            self.table.insert(canonical, Entry { handler, filters: Arc::new(Vec::new()) });
        }
        Ok(self)
    }

    pub fn with_filter(
        mut self,
        key: &str,
        filter: impl CommandFilter + 'static,
    ) -> std::result::Result<Self, SetupError> {
        let canonical = key.to_ascii_lowercase();
        let entry = self
            .table
            .get_mut(&canonical)
            .ok_or_else(|| SetupError::InvalidConfig(format!("no such command: {key}")))?;
        Arc::make_mut(&mut entry.filters).push(Arc::new(filter));
        Ok(self)
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry { table: ArcSwap::from_pointee(self.table) }
    }
}

pub type DispatchError = Error;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        async fn execute(&self, _ctx: &mut CommandContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builder_rejects_duplicate_command_names() {
        let result = CommandRegistry::builder().register("ECHO", Noop).unwrap().register("echo", Noop);
        assert!(matches!(result, Err(SetupError::DuplicateCommand(_))));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = CommandRegistry::builder().register("ECHO", Noop).unwrap().build();
        assert!(registry.lookup("echo").is_some());
        assert!(registry.lookup("ECHO").is_some());
        assert!(registry.lookup("other").is_none());
    }

    #[test]
    fn apply_upserts_and_removes_atomically() {
        let registry = CommandRegistry::builder().register("ECHO", Noop).unwrap().build();
        assert!(registry.lookup("ping").is_none());

        registry.apply(vec![
            CommandUpdate::Upsert { key: "PING".into(), handler: Arc::new(Noop), filters: Vec::new() },
            CommandUpdate::Remove { key: "ECHO".into() },
        ]);

        assert!(registry.lookup("ping").is_some());
        assert!(registry.lookup("echo").is_none());
    }

    struct OneCommandLoader;

    impl CommandLoader for OneCommandLoader {
        fn load(&self) -> Vec<(String, Arc<dyn CommandHandler>)> {
            vec![("LOADED".to_string(), Arc::new(Noop))]
        }
    }

    #[test]
    fn register_loader_adds_its_commands() {
        let registry = CommandRegistry::builder().register_loader(&OneCommandLoader).unwrap().build();
        assert!(registry.lookup("loaded").is_some());
    }

    #[test]
    fn register_loader_rejects_duplicate_across_explicit_and_loaded() {
        let result = CommandRegistry::builder()
            .register("LOADED", Noop)
            .unwrap()
            .register_loader(&OneCommandLoader);
        assert!(matches!(result, Err(SetupError::DuplicateCommand(_))));
    }

    struct DenyFilter;

    #[async_trait]
    impl CommandFilter for DenyFilter {
        fn name(&self) -> &str {
            "deny-filter"
        }

        async fn on_executing(&self, ctx: &mut CommandContext) -> Result<()> {
            ctx.cancel = true;
            Ok(())
        }
    }

    struct CountingHandler {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl CommandHandler for CountingHandler {
        async fn execute(&self, _ctx: &mut CommandContext) -> Result<()> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_ctx() -> CommandContext {
        let session = Session::new(
            crate::session::SessionId::new("test"),
            "127.0.0.1:1".parse().unwrap(),
            8,
            true,
        );
        CommandContext::new(session, Request::new("ECHO", Bytes::new()))
    }

    #[tokio::test]
    async fn filter_cancel_skips_handler_without_error() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let registry = CommandRegistry::builder()
            .register("ECHO", CountingHandler { calls: calls.clone() })
            .unwrap()
            .with_filter("ECHO", DenyFilter)
            .unwrap()
            .build();

        let entry = registry.lookup("echo").unwrap();
        let mut ctx = test_ctx();
        let outcome = entry.invoke(&mut ctx).await;

        assert!(outcome.is_ok(), "a filter cancel is not an error");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0, "handler never ran");
        assert!(ctx.cancel);
    }

    #[tokio::test]
    async fn without_cancel_handler_runs_normally() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let registry = CommandRegistry::builder()
            .register("ECHO", CountingHandler { calls: calls.clone() })
            .unwrap()
            .build();

        let entry = registry.lookup("echo").unwrap();
        let mut ctx = test_ctx();
        entry.invoke(&mut ctx).await.unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    struct RecordingFilter {
        label: &'static str,
        executing_log: Arc<std::sync::Mutex<Vec<&'static str>>>,
        executed_log: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl CommandFilter for RecordingFilter {
        fn name(&self) -> &str {
            self.label
        }

        async fn on_executing(&self, _ctx: &mut CommandContext) -> Result<()> {
            self.executing_log.lock().unwrap().push(self.label);
            Ok(())
        }

        async fn on_executed(&self, _ctx: &mut CommandContext, _outcome: &Result<()>) {
            self.executed_log.lock().unwrap().push(self.label);
        }
    }

    #[tokio::test]
    async fn on_executed_runs_in_the_same_order_as_on_executing() {
        let executing_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let executed_log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let registry = CommandRegistry::builder()
            .register("ECHO", Noop)
            .unwrap()
            .with_filter(
                "ECHO",
                RecordingFilter { label: "first", executing_log: executing_log.clone(), executed_log: executed_log.clone() },
            )
            .unwrap()
            .with_filter(
                "ECHO",
                RecordingFilter { label: "second", executing_log: executing_log.clone(), executed_log: executed_log.clone() },
            )
            .unwrap()
            .build();

        let entry = registry.lookup("echo").unwrap();
        let mut ctx = test_ctx();
        entry.invoke(&mut ctx).await.unwrap();

        assert_eq!(*executing_log.lock().unwrap(), vec!["first", "second"], "on_executing runs in registration order");
        assert_eq!(*executed_log.lock().unwrap(), vec!["first", "second"], "on_executed runs in the same, not reversed, order");
    }
}
