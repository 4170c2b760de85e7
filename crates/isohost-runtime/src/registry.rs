//! Instance registry.
//!
//! Maps names to live [`ScriptInstance`]s. Every public operation either
//! completes or leaves the mapping exactly as it found it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;

use crate::bridge;
use crate::buffer::ExternalBuffer;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::instance::{InstanceInfo, ScriptInstance};
use crate::platform::Platform;
use crate::semaphore::Semaphore;
use crate::source::{FsSourceLoader, SourceLoader};
use crate::spawn::{SpawnRequest, spawn_isolate};

pub struct Registry {
    platform: Platform,
    config: RuntimeConfig,
    loader: Arc<dyn SourceLoader>,
    /// Bounds how many invocations execute at once across all instances.
    pool: Arc<Semaphore>,
    instances: DashMap<String, Arc<ScriptInstance>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("instances", &self.instances.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Registry reading scripts from disk, relative to `config.script_root`.
    pub fn new(platform: &Platform, config: RuntimeConfig) -> Self {
        let loader = match &config.script_root {
            Some(root) => FsSourceLoader::with_root(root),
            None => FsSourceLoader::new(),
        };
        Self::with_loader(platform, config, Arc::new(loader))
    }

    pub fn with_loader(
        platform: &Platform,
        config: RuntimeConfig,
        loader: Arc<dyn SourceLoader>,
    ) -> Self {
        let pool = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        Self {
            platform: platform.clone(),
            config,
            loader,
            pool,
            instances: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the script at `location` and register it under `name`.
    pub async fn create(&self, name: &str, location: &str) -> Result<()> {
        self.ensure_vacant(name)?;

        let code = self.loader.load(location).await.map_err(|source| {
            RuntimeError::SourceUnavailable {
                location: self.loader.describe(location),
                source,
            }
        })?;

        self.create_from_source(name, code).await
    }

    /// Register `code` under `name` without going through the loader.
    pub async fn create_from_source(&self, name: &str, code: impl Into<String>) -> Result<()> {
        self.ensure_vacant(name)?;

        let entry = self.config.entry_function.as_str();
        let spawned = spawn_isolate(
            &self.platform,
            SpawnRequest {
                name,
                code: code.into(),
                entry,
                bootstrap_timeout: self.config.bootstrap_timeout(),
            },
        )
        .await?;
        let instance = Arc::new(ScriptInstance::new(name, entry, spawned));

        // Another create for the same name may have finished while this one
        // was compiling.
        let rejected = match self.instances.entry(name.to_string()) {
            Entry::Occupied(_) => Some(instance),
            Entry::Vacant(slot) => {
                slot.insert(instance);
                None
            }
        };
        if let Some(instance) = rejected {
            instance.dispose().await;
            return Err(RuntimeError::AlreadyExists(name.to_string()));
        }

        tracing::info!("Created instance {}", name);
        Ok(())
    }

    /// Remove `name`, wait for any in-flight run, then dispose it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let (_, instance) = self
            .instances
            .remove(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;

        instance.dispose().await;
        tracing::info!("Deleted instance {}", name);
        Ok(())
    }

    /// Delete every instance.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        if names.is_empty() {
            return;
        }
        tracing::info!("Shutting down {} instances", names.len());

        for result in join_all(names.iter().map(|name| self.delete(name))).await {
            // Only a concurrent delete can get here first.
            if let Err(e) = result {
                tracing::debug!("[shutdown_all] {}", e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Point `name` at a new external buffer for subsequent runs.
    pub fn bind_buffer(&self, name: &str, buffer: ExternalBuffer) -> Result<()> {
        self.get(name)?.bind_buffer(buffer);
        Ok(())
    }

    /// Invoke the entry function of `name` with whatever buffer is bound.
    pub async fn run(&self, name: &str, timeout: Duration) -> Result<()> {
        let instance = self.get(name)?;
        bridge::run(instance, Arc::clone(&self.pool), None, timeout).await
    }

    /// [`Registry::run`] with the configured default timeout.
    pub async fn run_default(&self, name: &str) -> Result<()> {
        self.run(name, self.config.default_timeout()).await
    }

    /// Run with `buffer` as the argument for this call only.
    ///
    /// The buffer is picked up after admission, so no other run on `name`
    /// can observe it, and the instance's bound buffer is left untouched.
    pub async fn run_with_buffer(
        &self,
        name: &str,
        buffer: ExternalBuffer,
        timeout: Duration,
    ) -> Result<()> {
        let instance = self.get(name)?;
        bridge::run(instance, Arc::clone(&self.pool), Some(buffer), timeout).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// All instances, sorted by name.
    pub fn list(&self) -> Vec<InstanceInfo> {
        let mut infos: Vec<InstanceInfo> =
            self.instances.iter().map(|e| e.value().info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn info(&self, name: &str) -> Option<InstanceInfo> {
        self.instances.get(name).map(|e| e.value().info())
    }

    /// Handle to a live instance, for inspection.
    pub fn instance(&self, name: &str) -> Option<Arc<ScriptInstance>> {
        self.get(name).ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn get(&self, name: &str) -> Result<Arc<ScriptInstance>> {
        self.instances
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    fn ensure_vacant(&self, name: &str) -> Result<()> {
        if self.instances.contains_key(name) {
            return Err(RuntimeError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySources;
    use tempfile::TempDir;

    const GENEROUS: Duration = Duration::from_secs(5);

    const SUM: &str = r#"
        function user_script(buffer) {
            const frame = new Int32Array(buffer);
            frame[2] = frame[0] + frame[1];
        }
    "#;

    const COUNTER: &str = r#"
        let calls = 0;
        function user_script(buffer) {
            calls += 1;
            new Int32Array(buffer)[0] = calls;
        }
    "#;

    #[repr(C)]
    #[derive(Debug, Default)]
    struct SumFrame {
        a: i32,
        b: i32,
        ans: i32,
    }

    #[repr(C)]
    #[derive(Debug, Default)]
    struct Span {
        start: f64,
        end: f64,
    }

    fn view<T>(frame: &mut T) -> ExternalBuffer {
        unsafe {
            ExternalBuffer::from_raw_parts(frame as *mut T as *mut u8, std::mem::size_of::<T>())
                .unwrap()
        }
    }

    fn registry() -> Registry {
        registry_with(RuntimeConfig::default(), InMemorySources::new())
    }

    fn registry_with(config: RuntimeConfig, sources: InMemorySources) -> Registry {
        let platform = Platform::init().unwrap();
        Registry::with_loader(&platform, config, Arc::new(sources))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Names
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let registry = registry();
        let mut frame = SumFrame::default();

        assert!(matches!(
            registry.run("ghost", GENEROUS).await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(matches!(
            registry.delete("ghost").await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(matches!(
            registry.bind_buffer("ghost", view(&mut frame)),
            Err(RuntimeError::NotFound(_))
        ));
        assert!(registry.info("ghost").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_existing_instance() {
        let registry = registry();
        registry.create_from_source("s", COUNTER).await.unwrap();

        let mut frame = SumFrame::default();
        registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap();

        let err = registry.create_from_source("s", SUM).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyExists(_)));

        // Still the counter script, with its state intact.
        registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap();
        assert_eq!(frame.a, 2);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_have_one_winner() {
        let registry = registry();
        let (first, second) = tokio::join!(
            registry.create_from_source("s", SUM),
            registry.create_from_source("s", SUM),
        );

        assert!(first.is_ok() ^ second.is_ok());
        let loser = first.err().or(second.err()).unwrap();
        assert!(matches!(loser, RuntimeError::AlreadyExists(_)));
        assert_eq!(registry.len(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Running
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sum_script_writes_result() {
        let registry = registry();
        registry.create_from_source("sum", SUM).await.unwrap();

        let mut frame = SumFrame {
            a: 1,
            b: 3,
            ans: 0,
        };
        registry.bind_buffer("sum", view(&mut frame)).unwrap();
        registry.run("sum", GENEROUS).await.unwrap();

        assert_eq!(frame.ans, 4);
    }

    #[tokio::test]
    async fn test_repeated_runs_reuse_compiled_script() {
        let registry = registry();
        registry.create_from_source("s", COUNTER).await.unwrap();

        let mut frame = SumFrame::default();
        registry.bind_buffer("s", view(&mut frame)).unwrap();
        for _ in 0..25 {
            registry.run("s", GENEROUS).await.unwrap();
        }

        // Top-level state survived every call, so nothing was re-bootstrapped.
        assert_eq!(frame.a, 25);
        assert_eq!(registry.info("s").unwrap().runs, 25);
    }

    #[tokio::test]
    async fn test_run_without_buffer_gets_empty_array_buffer() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                function user_script(buffer) {
                    if (buffer.byteLength !== 0) throw new Error('not empty');
                }
                "#,
            )
            .await
            .unwrap();

        registry.run_default("s").await.unwrap();
    }

    #[tokio::test]
    async fn test_rebind_replaces_previous_buffer() {
        let registry = registry();
        registry.create_from_source("sum", SUM).await.unwrap();

        let mut first = SumFrame { a: 1, b: 2, ans: 0 };
        let mut second = SumFrame { a: 10, b: 20, ans: 0 };
        registry.bind_buffer("sum", view(&mut first)).unwrap();
        registry.bind_buffer("sum", view(&mut second)).unwrap();

        registry.run("sum", GENEROUS).await.unwrap();
        assert_eq!(second.ans, 30);
        assert_eq!(first.ans, 0);
    }

    #[tokio::test]
    async fn test_run_with_buffer_leaves_binding_alone() {
        let registry = registry();
        registry.create_from_source("sum", SUM).await.unwrap();

        let mut bound = SumFrame { a: 1, b: 1, ans: 0 };
        let mut once = SumFrame { a: 2, b: 2, ans: 0 };
        registry.bind_buffer("sum", view(&mut bound)).unwrap();

        registry
            .run_with_buffer("sum", view(&mut once), GENEROUS)
            .await
            .unwrap();
        assert_eq!(once.ans, 4);
        assert_eq!(bound.ans, 0);

        registry.run("sum", GENEROUS).await.unwrap();
        assert_eq!(bound.ans, 2);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_and_instance_resumes() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                function user_script(buffer) {
                    const frame = new Int32Array(buffer);
                    if (frame[0] === 1) { while (true) {} }
                    frame[2] = 7;
                }
                "#,
            )
            .await
            .unwrap();

        let mut spin = SumFrame {
            a: 1,
            ..Default::default()
        };
        let err = registry
            .run_with_buffer("s", view(&mut spin), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }));

        let mut frame = SumFrame::default();
        registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap();
        assert_eq!(frame.ans, 7);

        let info = registry.info("s").unwrap();
        assert_eq!(info.timeouts, 1);
        assert_eq!(info.runs, 2);
        assert!(!registry.instance("s").unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_never_settling_promise_times_out_and_instance_resumes() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                function user_script(buffer) {
                    const frame = new Int32Array(buffer);
                    if (frame[0] === 1) {
                        return new Promise(r => Deno.core.queueUserTimer(0, false, 1e9, r));
                    }
                    if (frame[0] === 2) {
                        return Promise.resolve().then(() => { frame[2] = 9; });
                    }
                    frame[2] = 7;
                }
                "#,
            )
            .await
            .unwrap();

        let mut parked = SumFrame {
            a: 1,
            ..Default::default()
        };
        let err = registry
            .run_with_buffer("s", view(&mut parked), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }));

        let mut frame = SumFrame::default();
        registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap();
        assert_eq!(frame.ans, 7);

        // The abandoned timer is still queued; it must not hold up this one.
        let mut frame = SumFrame {
            a: 2,
            ..Default::default()
        };
        registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap();
        assert_eq!(frame.ans, 9);
        assert_eq!(registry.info("s").unwrap().timeouts, 1);
    }

    #[tokio::test]
    async fn test_script_exception_is_not_fatal() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                function user_script(buffer) {
                    const frame = new Int32Array(buffer);
                    if (frame[0] < 0) throw new Error("negative input");
                    frame[2] = frame[0];
                }
                "#,
            )
            .await
            .unwrap();

        let mut bad = SumFrame {
            a: -1,
            ..Default::default()
        };
        match registry.run_with_buffer("s", view(&mut bad), GENEROUS).await {
            Err(RuntimeError::ScriptRuntime { message, .. }) => {
                assert!(message.contains("negative input"))
            }
            other => panic!("expected ScriptRuntime, got {:?}", other),
        }

        let mut good = SumFrame {
            a: 5,
            ..Default::default()
        };
        registry
            .run_with_buffer("s", view(&mut good), GENEROUS)
            .await
            .unwrap();
        assert_eq!(good.ans, 5);
        assert_eq!(registry.info("s").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_async_entry_is_awaited() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                async function user_script(buffer) {
                    const frame = new Int32Array(buffer);
                    const a = await Promise.resolve(frame[0]);
                    if (a < 0) throw new Error("rejected");
                    frame[2] = a * 2;
                }
                "#,
            )
            .await
            .unwrap();

        let mut frame = SumFrame {
            a: 21,
            ..Default::default()
        };
        registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap();
        assert_eq!(frame.ans, 42);

        let mut frame = SumFrame {
            a: -1,
            ..Default::default()
        };
        let err = registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ScriptRuntime { .. }));
    }

    #[tokio::test]
    async fn test_retained_buffer_is_detached_after_run() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                let kept = null;
                function user_script(buffer) {
                    new Int32Array(buffer)[0] = kept === null ? -1 : kept.byteLength;
                    kept = buffer;
                }
                "#,
            )
            .await
            .unwrap();

        let mut first = SumFrame::default();
        registry
            .run_with_buffer("s", view(&mut first), GENEROUS)
            .await
            .unwrap();
        assert_eq!(first.a, -1);

        let mut second = SumFrame::default();
        registry
            .run_with_buffer("s", view(&mut second), GENEROUS)
            .await
            .unwrap();
        assert_eq!(second.a, 0);
    }

    #[tokio::test]
    async fn test_concurrent_runs_on_one_name_are_serialized() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                function user_script(buffer) {
                    const span = new Float64Array(buffer);
                    span[0] = Date.now();
                    const until = span[0] + 50;
                    while (Date.now() < until) {}
                    span[1] = Date.now();
                }
                "#,
            )
            .await
            .unwrap();

        let mut first = Span::default();
        let mut second = Span::default();
        let (a, b) = (view(&mut first), view(&mut second));
        let (r1, r2) = tokio::join!(
            registry.run_with_buffer("s", a, GENEROUS),
            registry.run_with_buffer("s", b, GENEROUS),
        );
        r1.unwrap();
        r2.unwrap();

        assert!(first.end > first.start && second.end > second.start);
        assert!(
            first.end <= second.start || second.end <= first.start,
            "runs overlapped: {:?} {:?}",
            first,
            second
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_different_names_run_in_parallel() {
        let config = RuntimeConfig::default().with_max_concurrent_runs(2);
        let registry = registry_with(config, InMemorySources::new());
        let code = r#"
            function user_script(buffer) {
                const span = new Float64Array(buffer);
                span[0] = Date.now();
                const until = span[0] + 200;
                while (Date.now() < until) {}
                span[1] = Date.now();
            }
        "#;
        registry.create_from_source("a", code).await.unwrap();
        registry.create_from_source("b", code).await.unwrap();

        let mut first = Span::default();
        let mut second = Span::default();
        let (a, b) = (view(&mut first), view(&mut second));
        let (r1, r2) = tokio::join!(
            registry.run_with_buffer("a", a, GENEROUS),
            registry.run_with_buffer("b", b, GENEROUS),
        );
        r1.unwrap();
        r2.unwrap();

        assert!(first.start < second.end && second.start < first.end);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Initialization failures
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_compile_error_is_not_registered() {
        let registry = registry();
        let err = registry
            .create_from_source("s", "function user_script( {")
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::Compile { .. }));
        assert!(err.is_initialization());
        assert!(!registry.contains("s"));
    }

    #[tokio::test]
    async fn test_bootstrap_error_is_not_registered() {
        let registry = registry();
        let err = registry
            .create_from_source("s", "throw new Error('boom'); function user_script() {}")
            .await
            .unwrap_err();

        match err {
            RuntimeError::Bootstrap { message, .. } => assert!(message.contains("boom")),
            other => panic!("expected Bootstrap, got {:?}", other),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_non_callable_entry() {
        let registry = registry();

        let err = registry
            .create_from_source("s", "function other() {}")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::EntryNotFound { .. }));

        let err = registry
            .create_from_source("s", "var user_script = 5;")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::EntryNotFound { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_custom_entry_function() {
        let config = RuntimeConfig::default().with_entry_function("main");
        let registry = registry_with(config, InMemorySources::new());

        registry
            .create_from_source("s", "function main(buffer) {}")
            .await
            .unwrap();
        assert_eq!(registry.info("s").unwrap().entry, "main");
    }

    #[tokio::test]
    async fn test_endless_bootstrap_times_out() {
        let config = RuntimeConfig::default().with_bootstrap_timeout(Duration::from_millis(100));
        let registry = registry_with(config, InMemorySources::new());

        let err = registry
            .create_from_source("s", "while (true) {} function user_script() {}")
            .await
            .unwrap_err();
        match err {
            RuntimeError::Bootstrap { message, .. } => assert!(message.contains("timed out")),
            other => panic!("expected Bootstrap, got {:?}", other),
        }
        assert!(!registry.contains("s"));
    }

    #[tokio::test]
    async fn test_bootstrap_parked_on_timer_times_out() {
        let config = RuntimeConfig::default().with_bootstrap_timeout(Duration::from_millis(100));
        let registry = registry_with(config, InMemorySources::new());

        let err = registry
            .create_from_source(
                "s",
                "Deno.core.queueUserTimer(0, false, 1e9, () => {}); function user_script() {}",
            )
            .await
            .unwrap_err();
        match err {
            RuntimeError::Bootstrap { message, .. } => assert!(message.contains("timed out")),
            other => panic!("expected Bootstrap, got {:?}", other),
        }
        assert!(!registry.contains("s"));
    }

    #[tokio::test]
    async fn test_create_loads_through_source_loader() {
        let sources = InMemorySources::new().with_script("scripts/sum.js", SUM);
        let registry = registry_with(RuntimeConfig::default(), sources);

        registry.create("sum", "scripts/sum.js").await.unwrap();
        let err = registry.create("other", "scripts/missing.js").await.unwrap_err();
        assert!(matches!(err, RuntimeError::SourceUnavailable { .. }));
        assert!(!registry.contains("other"));
    }

    #[tokio::test]
    async fn test_create_from_script_root() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("sum.js"), SUM).await.unwrap();

        let platform = Platform::init().unwrap();
        let registry = Registry::new(
            &platform,
            RuntimeConfig::default().with_script_root(dir.path()),
        );
        registry.create("sum", "sum.js").await.unwrap();

        let mut frame = SumFrame {
            a: 20,
            b: 22,
            ans: 0,
        };
        registry
            .run_with_buffer("sum", view(&mut frame), GENEROUS)
            .await
            .unwrap();
        assert_eq!(frame.ans, 42);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deletion
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_delete_then_recreate_is_fresh() {
        let registry = registry();
        registry.create_from_source("s", COUNTER).await.unwrap();
        let old = registry.instance("s").unwrap();

        let mut frame = SumFrame::default();
        registry.bind_buffer("s", view(&mut frame)).unwrap();
        registry.run("s", GENEROUS).await.unwrap();
        registry.run("s", GENEROUS).await.unwrap();
        assert_eq!(frame.a, 2);

        registry.delete("s").await.unwrap();
        assert!(old.is_closed());
        assert!(matches!(
            registry.run("s", GENEROUS).await,
            Err(RuntimeError::NotFound(_))
        ));

        registry.create_from_source("s", COUNTER).await.unwrap();
        registry
            .run_with_buffer("s", view(&mut frame), GENEROUS)
            .await
            .unwrap();
        assert_eq!(frame.a, 1);
        assert_eq!(registry.info("s").unwrap().runs, 1);
    }

    #[tokio::test]
    async fn test_delete_waits_for_in_flight_run() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                function user_script(buffer) {
                    const until = Date.now() + 150;
                    while (Date.now() < until) {}
                    new Int32Array(buffer)[2] = 1;
                }
                "#,
            )
            .await
            .unwrap();

        let mut frame = SumFrame::default();
        let buffer = view(&mut frame);
        let (run, delete) = tokio::join!(registry.run_with_buffer("s", buffer, GENEROUS), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.delete("s").await
        });

        run.unwrap();
        delete.unwrap();
        assert_eq!(frame.ans, 1);
        assert!(!registry.contains("s"));
    }

    #[tokio::test]
    async fn test_delete_closes_instance_for_queued_runs() {
        let registry = registry();
        registry
            .create_from_source(
                "s",
                r#"
                function user_script(buffer) {
                    const until = Date.now() + 150;
                    while (Date.now() < until) {}
                    new Int32Array(buffer)[2] = 1;
                }
                "#,
            )
            .await
            .unwrap();

        let mut slow = SumFrame::default();
        let mut queued = SumFrame::default();
        let slow_buffer = view(&mut slow);
        let queued_buffer = view(&mut queued);
        let (slow_run, queued_run, delete) = tokio::join!(
            registry.run_with_buffer("s", slow_buffer, GENEROUS),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                registry.run_with_buffer("s", queued_buffer, GENEROUS).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                registry.delete("s").await
            }
        );

        slow_run.unwrap();
        assert_eq!(slow.ans, 1);
        assert!(matches!(queued_run, Err(RuntimeError::InstanceClosed(_))));
        assert_eq!(queued.ans, 0);
        delete.unwrap();
        assert!(!registry.contains("s"));
    }

    #[tokio::test]
    async fn test_shutdown_all_empties_registry() {
        let registry = registry();
        registry.create_from_source("a", SUM).await.unwrap();
        registry.create_from_source("b", SUM).await.unwrap();

        let json = serde_json::to_value(registry.list()).unwrap();
        assert_eq!(json[0]["name"], "a");
        assert_eq!(json[1]["name"], "b");
        assert_eq!(json[1]["entry"], "user_script");
        assert_eq!(json[1]["busy"], false);

        registry.shutdown_all().await;
        assert!(registry.is_empty());
    }
}
