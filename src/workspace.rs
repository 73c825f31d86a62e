use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::cache::{Cache, CacheValue};
use crate::data::{Data, DataNode, DataNodeBuilder};
use crate::error::WorkspaceError;
use crate::executor::Executor;
use crate::meta::{Meta, Value};
use crate::name::Name;
use crate::task::{Dependency, Task, TaskContext, TaskModel};

/// The registry and orchestrator: named tasks, named configuration targets,
/// the root data tree, and transparent result caching.
///
/// A workspace is sealed once built; running tasks never mutates the
/// registries. Heterogeneous payloads are expressed by choosing a closed
/// enum as the border type `V`.
pub struct Workspace<V: CacheValue> {
    executor: Executor,
    tasks: HashMap<String, Arc<dyn Task<V>>>,
    targets: HashMap<String, Meta>,
    data: DataNode<V>,
    cache: Option<Cache>,
}

impl<V: CacheValue> Workspace<V> {
    /// Start configuring a new workspace.
    pub fn config() -> WorkspaceBuilder<V> {
        WorkspaceBuilder::new()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The whole data tree.
    pub fn data(&self) -> &DataNode<V> {
        &self.data
    }

    /// Look up a piece of static data by its fully-qualified path.
    pub fn get_data(&self, path: &str) -> Result<&Data<V>, WorkspaceError> {
        self.data
            .get(&Name::of(path))
            .ok_or_else(|| WorkspaceError::DataNotFound(path.to_string()))
    }

    pub fn opt_task(&self, name: &str) -> Option<Arc<dyn Task<V>>> {
        self.tasks.get(name).cloned()
    }

    pub fn task(&self, name: &str) -> Result<Arc<dyn Task<V>>, WorkspaceError> {
        self.opt_task(name)
            .ok_or_else(|| WorkspaceError::TaskNotFound(name.to_string()))
    }

    /// Look up a configuration target, following its `@parent` chain.
    pub fn opt_target(&self, name: &str) -> Option<Meta> {
        let target = self.targets.get(name)?;
        Some(self.resolve_parents(target))
    }

    pub fn target(&self, name: &str) -> Result<Meta, WorkspaceError> {
        self.opt_target(name)
            .ok_or_else(|| WorkspaceError::TargetNotFound(name.to_string()))
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Follow the `@parent` chain by name lookup, laminating each child
    /// over its parent. A dangling parent reference is logged and ignored.
    /// There is no cycle guard; targets referencing each other in a loop do
    /// not terminate.
    fn resolve_parents(&self, meta: &Meta) -> Meta {
        let Some(Value::String(parent)) = meta.value("@parent") else {
            return meta.clone();
        };

        match self.targets.get(parent) {
            Some(base) => meta.over(&self.resolve_parents(base)),
            None => {
                tracing::warn!("parent target '{parent}' not found, ignoring");
                meta.clone()
            }
        }
    }

    /// Run a task by name with the given configuration, laminating it over
    /// a target named like the configuration when one exists.
    pub fn run_task(&self, name: &str, config: Meta) -> Result<DataNode<V>, WorkspaceError> {
        self.run_task_with(name, config, true)
    }

    /// Run a task by name, using the target stored under the same name (if
    /// any) as its configuration.
    pub fn run_task_default(&self, name: &str) -> Result<DataNode<V>, WorkspaceError> {
        let config = self.opt_target(name).unwrap_or_else(Meta::empty);
        self.run_task_with(name, config, false)
    }

    /// Run a task by name. When `overlay` is set and a target named like
    /// the configuration exists, the configuration is laminated over it.
    pub fn run_task_with(
        &self,
        name: &str,
        config: Meta,
        overlay: bool,
    ) -> Result<DataNode<V>, WorkspaceError> {
        let task = self.task(name)?;

        let merged = match self.opt_target(config.name()) {
            Some(target) if overlay => config.over(&target),
            _ => config,
        };

        let model = task.model(self, merged)?;
        self.run_model(&model)
    }

    /// Run a resolved task model: gather dependencies, check input types,
    /// execute, and wrap the result in the cache.
    pub fn run_model(&self, model: &TaskModel) -> Result<DataNode<V>, WorkspaceError> {
        let task = self.task(model.name())?;
        tracing::info!("running task '{}'", model.name());

        // Dependency gathering is eager and synchronous; the gathered
        // leaves themselves stay lazy behind their goals.
        let mut input = DataNode::build();
        for dependency in model.dependencies() {
            self.apply_dependency(dependency, &mut input)?;
        }
        let input = input.build();

        // Fail fast, before any computation starts.
        if let Some(expected) = task.declared_input() {
            for (name, data) in input.data(true) {
                if data.tag() != expected {
                    return Err(WorkspaceError::TypeMismatch {
                        task: model.name().to_string(),
                        name: name.to_string(),
                        expected: expected.to_string(),
                        found: data.tag().to_string(),
                    });
                }
            }
        }

        let context = TaskContext {
            workspace: self,
            model,
        };
        let output = task
            .run(&context, &input)
            .map_err(|err| WorkspaceError::Task(model.name().to_string(), err))?;

        if let Some(cache) = &self.cache
            && model.meta().bool_or("cache.enabled", true)
        {
            let wrapped =
                cache.cache_node(model.name(), &output, &|name, data| model.identity(name, data));
            return Ok(wrapped);
        }

        Ok(output)
    }

    fn apply_dependency(
        &self,
        dependency: &Dependency,
        input: &mut DataNodeBuilder<V>,
    ) -> Result<(), WorkspaceError> {
        match dependency {
            Dependency::Data { mask, target } => {
                let pattern = glob::Pattern::new(mask)
                    .map_err(|err| WorkspaceError::Mask(mask.clone(), err))?;

                for (name, data) in self.data.data(true) {
                    if pattern.matches(&name.to_string()) {
                        let placed = Name::join([target.clone(), name]);
                        input.put_data(&placed, data.clone());
                    }
                }
            }
            Dependency::Node { source, target } => {
                let node = self
                    .data
                    .get_node(source)
                    .ok_or_else(|| WorkspaceError::DataNotFound(source.to_string()))?;
                input.put_node(target, node.clone());
            }
            Dependency::Task { model, key } => {
                let result = self.run_model(model)?;
                input.put_node(key, result);
            }
        }

        Ok(())
    }

    /// Invalidate all caches. Task and target registrations are untouched.
    pub fn clean(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }
}

impl<V: CacheValue> std::fmt::Debug for Workspace<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .field("data", &self.data.len())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

enum CacheConfig {
    Default,
    Disabled,
    Custom(Cache),
}

/// A builder for [`Workspace`]. Registration happens here; the workspace is
/// immutable once `finish` is called.
pub struct WorkspaceBuilder<V: CacheValue> {
    executor: Executor,
    tasks: HashMap<String, Arc<dyn Task<V>>>,
    targets: HashMap<String, Meta>,
    data: DataNodeBuilder<V>,
    cache: CacheConfig,
}

impl<V: CacheValue> WorkspaceBuilder<V> {
    fn new() -> Self {
        WorkspaceBuilder {
            executor: Executor::global(),
            tasks: HashMap::new(),
            targets: HashMap::new(),
            data: DataNode::build(),
            cache: CacheConfig::Default,
        }
    }

    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Register a task under its own name.
    pub fn task(mut self, task: impl Task<V> + 'static) -> Self {
        self.tasks.insert(task.name().to_string(), Arc::new(task));
        self
    }

    /// Register a named configuration target.
    pub fn target(mut self, name: &str, meta: Meta) -> Self {
        self.targets.insert(name.to_string(), meta);
        self
    }

    /// Add data under the given path in the root tree.
    pub fn data(mut self, key: &str, data: Data<V>) -> Self {
        self.data.put_data(&Name::of(key), data);
        self
    }

    /// Add a whole node under the given path in the root tree.
    pub fn data_node(mut self, key: &str, node: DataNode<V>) -> Self {
        self.data.put_node(&Name::of(key), node);
        self
    }

    /// Add a static value under the given path in the root tree.
    pub fn value(self, key: &str, value: V) -> Self {
        self.data(key, Data::value(value))
    }

    /// Use the given cache instead of the default one.
    pub fn cache(mut self, cache: Cache) -> Self {
        self.cache = CacheConfig::Custom(cache);
        self
    }

    /// Disable result caching entirely.
    pub fn without_cache(mut self) -> Self {
        self.cache = CacheConfig::Disabled;
        self
    }

    /// Seal the builder. The default cache lives under the process
    /// temporary directory; if it cannot be created the workspace runs
    /// without caching, since caching is only an optimization.
    pub fn finish(self) -> Result<Workspace<V>, WorkspaceError> {
        if self.tasks.keys().any(|name| name.is_empty()) {
            return Err(WorkspaceError::AnonymousNotAllowed);
        }

        let cache = match self.cache {
            CacheConfig::Custom(cache) => Some(cache),
            CacheConfig::Disabled => None,
            CacheConfig::Default => match default_cache() {
                Ok(cache) => Some(cache.with_executor(self.executor.clone())),
                Err(err) => {
                    tracing::warn!("can't open the default cache, caching disabled: {err}");
                    None
                }
            },
        };

        Ok(Workspace {
            executor: self.executor,
            tasks: self.tasks,
            targets: self.targets,
            data: self.data.build(),
            cache,
        })
    }
}

fn default_cache() -> anyhow::Result<Cache> {
    let root = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .map_err(|path| anyhow::anyhow!("temporary directory is not UTF-8: {path:?}"))?
        .join("karakuri")
        .join("cache");
    Ok(Cache::new(root)?)
}
