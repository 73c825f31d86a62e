use std::collections::BTreeMap;

use crate::error::GoalError;
use crate::executor::Executor;
use crate::goal::{Goal, Outcome};
use crate::meta::Meta;
use crate::name::Name;

/// The trailing segment of a type path, used as the default data tag.
pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// A lazily-valued piece of data: a goal that computes the value, the
/// descriptive metadata, and a declared type tag.
///
/// `Data` is immutable once created; its goal may or may not have executed
/// yet. Clones share the same goal, so every consumer observes the same
/// computation.
pub struct Data<T> {
    goal: Goal<T>,
    meta: Meta,
    tag: String,
}

impl<T> Clone for Data<T> {
    fn clone(&self) -> Self {
        Data {
            goal: self.goal.clone(),
            meta: self.meta.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Data<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("meta", &self.meta)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Data<T> {
    pub fn new(goal: Goal<T>, meta: Meta) -> Self {
        Data {
            goal,
            meta,
            tag: short_type_name::<T>().to_string(),
        }
    }

    /// Static data holding an already-computed value.
    pub fn value(value: T) -> Self {
        Data::new(Goal::ready(value), Meta::empty())
    }

    pub fn value_with_meta(value: T, meta: Meta) -> Self {
        Data::new(Goal::ready(value), meta)
    }

    /// Override the declared type tag, e.g. to distinguish variants of a
    /// shared payload enum.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn goal(&self) -> &Goal<T> {
        &self.goal
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Compute (if needed) and return the value.
    pub fn get(&self) -> Outcome<T> {
        self.goal.wait()
    }
}

enum Item<T> {
    Leaf(Data<T>),
    Node(DataNode<T>),
}

impl<T> Clone for Item<T> {
    fn clone(&self) -> Self {
        match self {
            Item::Leaf(data) => Item::Leaf(data.clone()),
            Item::Node(node) => Item::Node(node.clone()),
        }
    }
}

impl<T> std::fmt::Debug for Item<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Item::Leaf(data) => f.debug_tuple("Leaf").field(data).finish(),
            Item::Node(node) => f.debug_tuple("Node").field(node).finish(),
        }
    }
}

/// An immutable tree of [`Data`] leaves and named child nodes.
///
/// Sibling names are unique within a node; lookups route through children by
/// the leading name token. Build one with [`DataNode::build`], then treat it
/// as a value — rebuilding goes through [`DataNode::to_builder`].
pub struct DataNode<T> {
    name: Name,
    meta: Meta,
    items: BTreeMap<String, Item<T>>,
}

impl<T> Clone for DataNode<T> {
    fn clone(&self) -> Self {
        DataNode {
            name: self.name.clone(),
            meta: self.meta.clone(),
            items: self.items.clone(),
        }
    }
}

impl<T> std::fmt::Debug for DataNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataNode")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .field("items", &self.items)
            .finish()
    }
}

impl<T: Send + Sync + 'static> DataNode<T> {
    pub fn build() -> DataNodeBuilder<T> {
        DataNodeBuilder {
            name: Name::empty(),
            meta: Meta::empty(),
            items: BTreeMap::new(),
        }
    }

    /// Copy this node back into a builder for editing.
    pub fn to_builder(&self) -> DataNodeBuilder<T> {
        DataNodeBuilder {
            name: self.name.clone(),
            meta: self.meta.clone(),
            items: self
                .items
                .iter()
                .map(|(key, item)| {
                    let item = match item {
                        Item::Leaf(data) => BuilderItem::Leaf(data.clone()),
                        Item::Node(node) => BuilderItem::Node(node.to_builder()),
                    };
                    (key.clone(), item)
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Look a leaf up by name, routing through child nodes. Absence is not
    /// an error; orchestration code probes existence with this.
    pub fn get(&self, name: &Name) -> Option<&Data<T>> {
        match self.items.get(name.entry())? {
            Item::Leaf(data) if name.len() == 1 => Some(data),
            Item::Node(node) if name.len() > 1 => node.get(&name.cut_first().ok()?),
            _ => None,
        }
    }

    /// Look a child node up by name, routing through intermediate nodes.
    /// The empty name resolves to this node itself.
    pub fn get_node(&self, name: &Name) -> Option<&DataNode<T>> {
        if name.is_empty() {
            return Some(self);
        }

        match self.items.get(name.entry())? {
            Item::Node(node) if name.len() == 1 => Some(node),
            Item::Node(node) => node.get_node(&name.cut_first().ok()?),
            Item::Leaf(_) => None,
        }
    }

    /// Depth-first leaves with names qualified relative to this node.
    pub fn data(&self, recursive: bool) -> Vec<(Name, &Data<T>)> {
        let mut out = Vec::new();
        self.collect_data(recursive, &Name::empty(), &mut out);
        out
    }

    fn collect_data<'a>(
        &'a self,
        recursive: bool,
        prefix: &Name,
        out: &mut Vec<(Name, &'a Data<T>)>,
    ) {
        for (key, item) in &self.items {
            let name = prefix + &Name::of_token_body(key);
            match item {
                Item::Leaf(data) => out.push((name, data)),
                Item::Node(node) if recursive => node.collect_data(true, &name, out),
                Item::Node(_) => {}
            }
        }
    }

    /// Child nodes with names qualified relative to this node.
    pub fn nodes(&self, recursive: bool) -> Vec<(Name, &DataNode<T>)> {
        let mut out = Vec::new();
        self.collect_nodes(recursive, &Name::empty(), &mut out);
        out
    }

    fn collect_nodes<'a>(
        &'a self,
        recursive: bool,
        prefix: &Name,
        out: &mut Vec<(Name, &'a DataNode<T>)>,
    ) {
        for (key, item) in &self.items {
            if let Item::Node(node) = item {
                let name = prefix + &Name::of_token_body(key);
                out.push((name.clone(), node));
                if recursive {
                    node.collect_nodes(true, &name, out);
                }
            }
        }
    }

    /// The number of leaves, including subnodes.
    pub fn len(&self) -> usize {
        self.data(true).len()
    }

    pub fn is_empty(&self) -> bool {
        self.data(true).is_empty()
    }

    /// Start every leaf goal and wait for completion, returning the first
    /// failure if any.
    pub fn compute_all(&self, executor: &Executor) -> Result<(), GoalError> {
        let goals = self
            .data(true)
            .into_iter()
            .map(|(_, data)| data.goal().erased());
        Goal::<()>::all(executor, goals).wait().map(|_| ())
    }
}

enum BuilderItem<T> {
    Leaf(Data<T>),
    Node(DataNodeBuilder<T>),
}

/// A mutable builder for [`DataNode`]. Multi-token names route through
/// intermediate nodes, which are created on demand.
pub struct DataNodeBuilder<T> {
    name: Name,
    meta: Meta,
    items: BTreeMap<String, BuilderItem<T>>,
}

impl<T: Send + Sync + 'static> DataNodeBuilder<T> {
    pub fn with_name(mut self, name: Name) -> Self {
        self.name = name;
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Insert a leaf, replacing any previous item with the same name.
    pub fn put_data(&mut self, name: &Name, data: Data<T>) -> &mut Self {
        if name.is_empty() {
            return self;
        }

        let key = name.entry().to_string();
        if name.len() == 1 {
            self.items.insert(key, BuilderItem::Leaf(data));
        } else {
            let rest = name.cut_first().expect("multi-token name");
            if let BuilderItem::Node(child) = self.intermediate(key) {
                child.put_data(&rest, data);
            }
        }
        self
    }

    /// Get or create the intermediate node under `key`, replacing a leaf if
    /// one is in the way.
    fn intermediate(&mut self, key: String) -> &mut BuilderItem<T> {
        let entry = self
            .items
            .entry(key)
            .or_insert_with(|| BuilderItem::Node(DataNode::build()));
        if !matches!(entry, BuilderItem::Node(_)) {
            *entry = BuilderItem::Node(DataNode::build());
        }
        entry
    }

    /// Insert a child node, replacing any previous item with the same name.
    /// An empty name merges the node's items into this builder.
    pub fn put_node(&mut self, name: &Name, node: DataNode<T>) -> &mut Self {
        if name.is_empty() {
            for (key, item) in node.to_builder().items {
                self.items.insert(key, item);
            }
            return self;
        }

        let key = name.entry().to_string();
        if name.len() == 1 {
            self.items.insert(key, BuilderItem::Node(node.to_builder()));
        } else {
            let rest = name.cut_first().expect("multi-token name");
            if let BuilderItem::Node(child) = self.intermediate(key) {
                child.put_node(&rest, node);
            }
        }
        self
    }

    /// Remove a leaf by name. Unknown names are ignored.
    pub fn remove_data(&mut self, name: &Name) -> &mut Self {
        if name.is_empty() {
            return self;
        }

        let key = name.entry();
        if name.len() == 1 {
            if matches!(self.items.get(key), Some(BuilderItem::Leaf(_))) {
                self.items.remove(key);
            }
        } else if let Some(BuilderItem::Node(child)) = self.items.get_mut(key) {
            let rest = name.cut_first().expect("multi-token name");
            child.remove_data(&rest);
        }
        self
    }

    /// Seal the builder into an immutable node.
    pub fn build(self) -> DataNode<T> {
        DataNode {
            name: self.name,
            meta: self.meta,
            items: self
                .items
                .into_iter()
                .map(|(key, item)| {
                    let item = match item {
                        BuilderItem::Leaf(data) => Item::Leaf(data),
                        BuilderItem::Node(child) => Item::Node(child.build()),
                    };
                    (key, item)
                })
                .collect(),
        }
    }
}
