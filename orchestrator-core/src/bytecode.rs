//! Bytecode-Module Executor: sandboxed bytecode-module languages run
//! in-process, one `wasmtime` instance per invocation, rather than as a
//! child process like the scripted/interpreted families.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wasmtime::{Engine, Linker, Memory, MemoryType, Module, Store};

use crate::config::BytecodeConfig;
use crate::error::{ErrorKind, ExecutionError, ExecutionResult};

/// Duck-typed adapter capability set. Every hook is optional; a module
/// with no adapter just gets the default `run(code) -> exitCode` export.
pub trait ModuleAdapter: Send + Sync {
    fn initialize(&self, _memory: &Memory, _store: &mut Store<InstanceState>) -> anyhow::Result<()> {
        Ok(())
    }

    fn prepare_code(&self, code: &str) -> anyhow::Result<String> {
        Ok(code.to_string())
    }

    /// When present, called instead of the default `run` export.
    fn execute(
        &self,
        instance: &wasmtime::Instance,
        store: &mut Store<InstanceState>,
        code: &str,
    ) -> anyhow::Result<i32>;
}

/// Per-invocation host state: the accumulators the imported
/// `handleStdout`/`handleStderr` funnel writes into.
#[derive(Default)]
pub struct InstanceState {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

struct CachedModule {
    engine: Engine,
    module: Module,
    adapter: Option<Arc<dyn ModuleAdapter>>,
    last_used: Instant,
}

/// Loaded-module registry plus the idle-TTL cache/cleanup sweep.
pub struct BytecodeExecutor {
    config: BytecodeConfig,
    modules: Mutex<HashMap<String, CachedModule>>,
}

/// Result of one bytecode invocation, mirroring the shape a `complete`/
/// `error` outbound message would carry for a scripted/interpreted task.
#[derive(Debug, Clone)]
pub struct BytecodeOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub error: Option<String>,
}

impl BytecodeExecutor {
    pub fn new(config: BytecodeConfig) -> Self {
        Self {
            config,
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Loads (or replaces) the module registered under `name`, compiling it
    /// once up front so `execute` never pays compilation cost per call.
    pub fn register_module(
        &self,
        name: &str,
        wasm_bytes: &[u8],
        adapter: Option<Arc<dyn ModuleAdapter>>,
    ) -> anyhow::Result<()> {
        let engine = Engine::default();
        let module = Module::new(&engine, wasm_bytes)?;
        self.modules.lock().expect("bytecode cache lock poisoned").insert(
            name.to_string(),
            CachedModule {
                engine,
                module,
                adapter,
                last_used: Instant::now(),
            },
        );
        Ok(())
    }

    /// Runs `code` against the module registered as `name`. `timeout`
    /// resolves the execution with `exit=1, error="timeout"` rather than
    /// killing anything — wasmtime gives us no native kill for a blocking
    /// host call once it's running.
    pub async fn execute(
        self: &Arc<Self>,
        name: &str,
        code: &str,
        memory_limit_pages: Option<u32>,
        timeout: Duration,
    ) -> ExecutionResult {
        let this = Arc::clone(self);
        let name = name.to_string();
        let code = code.to_string();
        let pages = memory_limit_pages
            .unwrap_or(self.config.max_pages)
            .min(self.config.max_pages);

        let run = tokio::task::spawn_blocking(move || this.run_blocking(&name, &code, pages));

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(Ok(outcome))) => {
                if let Some(message) = outcome.error {
                    Err(ExecutionError::new(ErrorKind::Execution, message))
                } else {
                    Ok(serde_json::json!({
                        "exitCode": outcome.exit_code,
                        "stdout": String::from_utf8_lossy(&outcome.stdout),
                        "stderr": String::from_utf8_lossy(&outcome.stderr),
                    }))
                }
            }
            Ok(Ok(Err(error))) => Err(ExecutionError::new(ErrorKind::Execution, error.to_string())),
            Ok(Err(join_error)) => {
                Err(ExecutionError::new(ErrorKind::Execution, join_error.to_string()))
            }
            Err(_elapsed) => Err(ExecutionError::timeout()),
        }
    }

    fn run_blocking(&self, name: &str, code: &str, pages: u32) -> anyhow::Result<BytecodeOutcome> {
        let mut modules = self.modules.lock().expect("bytecode cache lock poisoned");
        let cached = modules
            .get_mut(name)
            .ok_or_else(|| anyhow::anyhow!("no bytecode module registered for {name}"))?;
        cached.last_used = Instant::now();

        let engine = cached.engine.clone();
        let module = cached.module.clone();
        let adapter = cached.adapter.clone();
        drop(modules);

        let mut store = Store::new(&engine, InstanceState::default());
        let memory_ty = MemoryType::new(pages, Some(pages));
        let memory = Memory::new(&mut store, memory_ty)?;

        let mut linker = Linker::new(&engine);
        linker.define(&store, "env", "memory", memory)?;
        linker.func_wrap("env", "handleStdout", |mut caller: wasmtime::Caller<'_, InstanceState>, byte: i32| {
            caller.data_mut().stdout.push(byte as u8);
        })?;
        linker.func_wrap("env", "handleStderr", |mut caller: wasmtime::Caller<'_, InstanceState>, byte: i32| {
            caller.data_mut().stderr.push(byte as u8);
        })?;

        let instance = linker.instantiate(&mut store, &module)?;

        if let Some(adapter) = &adapter {
            adapter.initialize(&memory, &mut store)?;
        }

        let prepared = match &adapter {
            Some(adapter) => adapter.prepare_code(code)?,
            None => code.to_string(),
        };

        let exit_code = match &adapter {
            Some(adapter) => adapter.execute(&instance, &mut store, &prepared)?,
            None => {
                let run = instance.get_typed_func::<(), i32>(&mut store, "run")?;
                run.call(&mut store, ())?
            }
        };

        let state = store.into_data();
        Ok(BytecodeOutcome {
            exit_code,
            stdout: state.stdout,
            stderr: state.stderr,
            error: None,
        })
    }

    /// Reclaims modules unused for longer than `instance_idle_ttl`.
    pub fn cleanup_idle(&self) {
        let mut modules = self.modules.lock().expect("bytecode cache lock poisoned");
        let ttl = self.config.instance_idle_ttl;
        modules.retain(|_, cached| cached.last_used.elapsed() < ttl);
    }
}
