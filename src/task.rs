use std::sync::Arc;

use crate::cache::CacheValue;
use crate::data::{Data, DataNode};
use crate::error::WorkspaceError;
use crate::meta::Meta;
use crate::name::Name;
use crate::workspace::Workspace;

/// The context passed to every task execution.
pub struct TaskContext<'a, V: CacheValue> {
    /// The workspace the task runs in.
    pub workspace: &'a Workspace<V>,
    /// The resolved model: task name, merged configuration, dependencies.
    pub model: &'a TaskModel,
}

/// A named transformation from an input data tree to an output data tree.
///
/// Tasks are stateless descriptors; everything an invocation needs travels
/// through the [`TaskModel`] built by [`Task::model`]. The model declares
/// dependencies on other tasks and on raw workspace data, which the
/// workspace gathers into the input tree before calling [`Task::run`].
pub trait Task<V: CacheValue>: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve dependencies and configuration into an executable model.
    fn model(&self, workspace: &Workspace<V>, meta: Meta) -> Result<TaskModel, WorkspaceError>;

    /// Transform the gathered input tree into the result tree.
    ///
    /// Leaves of the result should stay lazy: derive them from input goals
    /// with [`Goal::pipe`](crate::Goal::pipe) rather than computing values
    /// eagerly here.
    fn run(&self, context: &TaskContext<V>, input: &DataNode<V>) -> anyhow::Result<DataNode<V>>;

    /// The expected input type tag. When present, every input leaf is
    /// checked against it before any computation starts.
    fn declared_input(&self) -> Option<&str> {
        None
    }
}

/// A declared input of a task model. The variant set is closed; dependency
/// gathering dispatches over it explicitly.
#[derive(Clone, Debug)]
pub enum Dependency {
    /// Raw workspace data whose fully-qualified names match a glob mask,
    /// placed under `target` (kept in place when `target` is empty).
    Data { mask: String, target: Name },
    /// A whole subtree of the workspace data tree.
    Node { source: Name, target: Name },
    /// The result of another task, placed under `key`; an empty key merges
    /// the result into the input root.
    Task { model: TaskModel, key: Name },
}

/// The immutable model for one task invocation: name, merged configuration
/// and declared dependencies. Computed without running the task.
#[derive(Clone, Debug)]
pub struct TaskModel {
    name: String,
    meta: Meta,
    dependencies: Vec<Dependency>,
}

impl TaskModel {
    /// Start building a model against a workspace.
    pub fn builder<'a, V: CacheValue>(
        workspace: &'a Workspace<V>,
        name: &str,
        meta: Meta,
    ) -> TaskModelBuilder<'a, V> {
        TaskModelBuilder {
            workspace,
            name: name.to_string(),
            meta,
            dependencies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task configuration, laminated over any named target.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Derive the cache identity for a single result leaf: the task name,
    /// the leaf's own name and tag, and the merged configuration.
    pub fn identity<V: Send + Sync + 'static>(&self, name: &Name, data: &Data<V>) -> Meta {
        let mut id = Meta::new("id")
            .put("task", self.name.as_str())
            .put("data", name.to_string())
            .put("type", data.tag())
            .put_node("meta", self.meta.clone());

        if !data.meta().is_empty() {
            id = id.put_node("dataMeta", data.meta().clone());
        }

        id
    }
}

/// A builder for [`TaskModel`]. Dependency-declaring methods may recurse
/// into the workspace to build models for upstream tasks.
pub struct TaskModelBuilder<'a, V: CacheValue> {
    workspace: &'a Workspace<V>,
    name: String,
    meta: Meta,
    dependencies: Vec<Dependency>,
}

impl<'a, V: CacheValue> TaskModelBuilder<'a, V> {
    pub fn workspace(&self) -> &'a Workspace<V> {
        self.workspace
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Depend on workspace data matching a glob mask over qualified names.
    pub fn data(&mut self, mask: &str) -> &mut Self {
        self.data_as(mask, Name::empty())
    }

    /// Like [`TaskModelBuilder::data`], placing matches under `target`.
    pub fn data_as(&mut self, mask: &str, target: Name) -> &mut Self {
        self.dependencies.push(Dependency::Data {
            mask: mask.to_string(),
            target,
        });
        self
    }

    /// Depend on every piece of workspace data.
    pub fn all_data(&mut self) -> &mut Self {
        self.data("*")
    }

    /// Depend on a subtree of the workspace data tree.
    pub fn node(&mut self, source: Name, target: Name) -> &mut Self {
        self.dependencies.push(Dependency::Node { source, target });
        self
    }

    /// Depend on another task run with the given configuration; its result
    /// lands under `key` (the input root when `key` is empty). The upstream
    /// model is resolved immediately, so a missing task fails here.
    pub fn depends_on(
        &mut self,
        task: &str,
        meta: Meta,
        key: &str,
    ) -> Result<&mut Self, WorkspaceError> {
        let upstream = self.workspace.task(task)?;
        let model = upstream.model(self.workspace, meta)?;
        self.dependencies.push(Dependency::Task {
            model,
            key: Name::of(key),
        });
        Ok(self)
    }

    /// Rename the model. An empty name is not allowed.
    pub fn rename(&mut self, name: &str) -> Result<&mut Self, WorkspaceError> {
        if name.is_empty() {
            return Err(WorkspaceError::AnonymousNotAllowed);
        }
        self.name = name.to_string();
        Ok(self)
    }

    pub fn build(self) -> TaskModel {
        TaskModel {
            name: self.name,
            meta: self.meta,
            dependencies: self.dependencies,
        }
    }
}

type ModelFn<V> =
    Box<dyn Fn(&mut TaskModelBuilder<V>, &Meta) -> Result<(), WorkspaceError> + Send + Sync>;
type TransformFn<V> = Arc<dyn Fn(&Name, Arc<V>, &Meta) -> anyhow::Result<V> + Send + Sync>;

/// A one-to-one task: every input leaf is piped through a transform into an
/// identically-named output leaf. Covers the common case of element-wise
/// pipeline stages without a hand-written [`Task`] impl.
pub struct PipeTask<V: CacheValue> {
    name: String,
    input_tag: Option<String>,
    model_fn: ModelFn<V>,
    transform: TransformFn<V>,
}

impl<V: CacheValue> PipeTask<V> {
    pub fn new(
        name: &str,
        model_fn: impl Fn(&mut TaskModelBuilder<V>, &Meta) -> Result<(), WorkspaceError>
        + Send
        + Sync
        + 'static,
        transform: impl Fn(&Name, Arc<V>, &Meta) -> anyhow::Result<V> + Send + Sync + 'static,
    ) -> Self {
        PipeTask {
            name: name.to_string(),
            input_tag: None,
            model_fn: Box::new(model_fn),
            transform: Arc::new(transform),
        }
    }

    /// Declare the expected input type tag for the fail-fast check.
    pub fn with_input_tag(mut self, tag: &str) -> Self {
        self.input_tag = Some(tag.to_string());
        self
    }
}

impl<V: CacheValue> Task<V> for PipeTask<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self, workspace: &Workspace<V>, meta: Meta) -> Result<TaskModel, WorkspaceError> {
        let mut builder = TaskModel::builder(workspace, &self.name, meta.clone());
        (self.model_fn)(&mut builder, &meta)?;
        Ok(builder.build())
    }

    fn run(&self, context: &TaskContext<V>, input: &DataNode<V>) -> anyhow::Result<DataNode<V>> {
        let executor = context.workspace.executor();
        let mut output = DataNode::build();

        for (name, data) in input.data(true) {
            let transform = self.transform.clone();
            let meta = context.model.meta().clone();
            let leaf_name = name.clone();

            let goal = data
                .goal()
                .pipe(executor, move |value| transform(&leaf_name, value, &meta));

            output.put_data(&name, Data::new(goal, data.meta().clone()));
        }

        Ok(output.build())
    }

    fn declared_input(&self) -> Option<&str> {
        self.input_tag.as_deref()
    }
}

impl<V: CacheValue> std::fmt::Debug for PipeTask<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PipeTask({})", self.name)
    }
}
