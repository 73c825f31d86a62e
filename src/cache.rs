use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::{Data, DataNode};
use crate::error::CacheError;
use crate::executor::Executor;
use crate::goal::Goal;
use crate::meta::Meta;
use crate::name::Name;

/// Values storable in the persistent tier.
///
/// This is the compile-time rendition of a serializability check: anything
/// that cannot satisfy it never reaches the cache in the first place.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> CacheValue for T {}

type Dynamic = Arc<dyn Any + Send + Sync>;
type BypassFn = dyn Fn(&Meta) -> bool + Send + Sync;

/// Derives a cache identity for a single result leaf from its
/// fully-qualified name.
pub type IdentityFn<'a, T> = dyn Fn(&Name, &Data<T>) -> Meta + 'a;

const MAGIC: &[u8; 4] = b"KRK1";
const EXTENSION: &str = "krk";
const DEFAULT_CAPACITY: u64 = 500;

/// The envelope header persisted in front of every payload. It carries
/// enough to re-verify a hit against the full identity, not just the file
/// name hash.
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    tag: String,
    identity: Meta,
}

/// A two-tier content-addressed result cache.
///
/// Entries are keyed by `(region, identity)` where the identity is a
/// structured [`Meta`] descriptor. Each region owns a bounded in-memory map
/// and a directory of envelope files under the cache root; the directory is
/// re-indexed by scanning whenever a region is first opened, so the index
/// always reflects on-disk reality.
///
/// Caching is an optimization, never a correctness requirement: every fault
/// on the read/write hot path is logged and recovered from by falling back
/// to recomputation.
pub struct Cache {
    root: Utf8PathBuf,
    capacity: u64,
    persist: bool,
    executor: Executor,
    bypass: Option<Box<BypassFn>>,
    regions: Mutex<HashMap<String, Arc<Region>>>,
}

impl Cache {
    /// Open a cache rooted at the given directory, creating it if needed.
    pub fn new(root: impl AsRef<Utf8Path>) -> Result<Self, CacheError> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(&root)?;

        Ok(Cache {
            root,
            capacity: DEFAULT_CAPACITY,
            persist: true,
            executor: Executor::global(),
            bypass: None,
            regions: Mutex::new(HashMap::new()),
        })
    }

    /// Maximum number of entries kept per region in the in-memory tier.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Disable the persistent tier; entries then live only in memory.
    pub fn memory_only(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Set a predicate that opts data out of caching based on its meta.
    pub fn with_bypass(mut self, bypass: impl Fn(&Meta) -> bool + Send + Sync + 'static) -> Self {
        self.bypass = Some(Box::new(bypass));
        self
    }

    fn region(&self, name: &str) -> Arc<Region> {
        let mut regions = self.regions.lock().unwrap();
        regions
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Region::open(
                    name,
                    self.root.join(name),
                    self.capacity,
                    self.persist,
                ))
            })
            .clone()
    }

    /// Whether an entry for the identity exists in either tier.
    pub fn contains(&self, region: &str, identity: &Meta) -> bool {
        self.region(region).contains(identity)
    }

    /// Wrap a piece of data in transparent caching.
    ///
    /// The returned data computes through the cache: if an entry for the
    /// identity exists in either tier it is loaded instead of running the
    /// original goal, otherwise the original goal runs and its result is
    /// stored in both tiers. At most one computation per `(region,
    /// identity)` pair is ever started; the per-region lock makes concurrent
    /// requesters for the same identity observe one shared execution.
    ///
    /// Data matched by the bypass predicate is returned unchanged.
    pub fn cache<T: CacheValue>(&self, region: &str, data: Data<T>, identity: Meta) -> Data<T> {
        if let Some(bypass) = &self.bypass
            && bypass(data.meta())
        {
            return data;
        }

        let region = self.region(region);
        let original = data.goal().clone();
        let tag = data.tag().to_string();
        let instance = {
            let name = data.meta().name();
            (!name.is_empty()).then(|| name.to_string())
        };

        // When the entry already exists the value is obtainable without
        // recomputation, so the wrapped goal declares no dependencies.
        let deps = if region.contains(&identity) {
            Vec::new()
        } else {
            vec![original.erased()]
        };

        let goal = {
            let region = region.clone();
            let tag = tag.clone();

            // Reported-only dependencies: the closure below decides whether
            // the original goal actually runs.
            Goal::from_parts(
                &self.executor,
                deps,
                false,
                Box::new(move || {
                    let _guard = region.op.lock().unwrap();

                    // An already-computed original is adopted directly.
                    if let Some(outcome) = original.peek() {
                        return outcome;
                    }

                    if let Some(value) = region.load::<T>(&identity, &tag) {
                        tracing::debug!(
                            "cache hit in '{}' for id {}, restoring result",
                            region.name,
                            identity.identity_hash(),
                        );
                        return Ok(value);
                    }

                    let value = original.wait()?;
                    region.store(&identity, &tag, instance.as_deref(), &*value, value.clone());
                    Ok(value)
                }),
            )
        };

        Data::new(goal, data.meta().clone()).with_tag(tag)
    }

    /// Recursively wrap every leaf of a node through [`Cache::cache`],
    /// preserving tree shape, names and per-node metadata.
    ///
    /// Child subtrees are cached under a derived region name (the parent
    /// region joined with the child's name) so distinct branches never
    /// collide.
    pub fn cache_node<T: CacheValue>(
        &self,
        region: &str,
        node: &DataNode<T>,
        identity_fn: &IdentityFn<'_, T>,
    ) -> DataNode<T> {
        self.cache_node_inner(region, node, &Name::empty(), identity_fn)
    }

    fn cache_node_inner<T: CacheValue>(
        &self,
        region: &str,
        node: &DataNode<T>,
        prefix: &Name,
        identity_fn: &IdentityFn<'_, T>,
    ) -> DataNode<T> {
        let mut builder = DataNode::build()
            .with_name(node.name().clone())
            .with_meta(node.meta().clone());

        for (name, child) in node.nodes(false) {
            let child_region = format!("{region}.{name}");
            let cached = self.cache_node_inner(&child_region, child, &(prefix + &name), identity_fn);
            builder.put_node(&name, cached);
        }

        for (name, data) in node.data(false) {
            let identity = identity_fn(&(prefix + &name), data);
            builder.put_data(&name, self.cache(region, data.clone(), identity));
        }

        builder.build()
    }

    /// Destroy one region: clear its memory tier and delete its files.
    pub fn invalidate(&self, name: &str) {
        let region = self.regions.lock().unwrap().remove(name);
        if let Some(region) = region {
            region.clear();
        } else {
            // The region may still exist on disk from an earlier process.
            let dir = self.root.join(name);
            if dir.exists()
                && let Err(err) = fs::remove_dir_all(&dir)
            {
                tracing::error!("failed to delete cache directory {dir}: {err}");
            }
        }
    }

    /// Destroy every region.
    pub fn invalidate_all(&self) {
        let names: Vec<_> = self.regions.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.invalidate(&name);
        }

        // Sweep directories left over from regions never opened here.
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if entry.path().is_dir()
                    && let Err(err) = fs::remove_dir_all(entry.path())
                {
                    tracing::error!("failed to delete cache directory: {err}");
                }
            }
        }
    }

    /// Names of the currently open regions.
    pub fn region_names(&self) -> Vec<String> {
        self.regions.lock().unwrap().keys().cloned().collect()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("root", &self.root)
            .field("capacity", &self.capacity)
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct IndexEntry {
    identity: Meta,
    hash: u64,
    path: Utf8PathBuf,
}

/// One named cache partition: a bounded memory map plus a directory.
struct Region {
    name: String,
    dir: Utf8PathBuf,
    persist: bool,
    /// Serializes the probe/load/compute/store sequence so at most one
    /// computation per identity is ever started within this region.
    op: Mutex<()>,
    mem: moka::sync::Cache<Meta, Dynamic>,
    index: Mutex<Vec<IndexEntry>>,
}

impl Region {
    fn open(name: &str, dir: Utf8PathBuf, capacity: u64, persist: bool) -> Self {
        let persist = persist
            && match fs::create_dir_all(&dir) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!("can't create cache directory {dir}, disabling persistence: {err}");
                    false
                }
            };

        let index = if persist { scan_directory(&dir) } else { Vec::new() };

        Region {
            name: name.to_string(),
            dir,
            persist,
            op: Mutex::new(()),
            mem: moka::sync::Cache::new(capacity),
            index: Mutex::new(index),
        }
    }

    fn contains(&self, identity: &Meta) -> bool {
        self.mem.contains_key(identity) || self.find_file(identity).is_some()
    }

    fn find_file(&self, identity: &Meta) -> Option<IndexEntry> {
        let hash = identity.identity_hash();
        self.index
            .lock()
            .unwrap()
            .iter()
            // The hash narrows the search; equality decides the hit.
            .find(|entry| entry.hash == hash && entry.identity == *identity)
            .cloned()
    }

    /// Load a value from either tier. Corrupt persistent entries are
    /// deleted and reported as a miss.
    fn load<T: CacheValue>(&self, identity: &Meta, tag: &str) -> Option<Arc<T>> {
        if let Some(found) = self.mem.get(identity) {
            match found.downcast::<T>() {
                Ok(value) => return Some(value),
                Err(_) => {
                    tracing::warn!(
                        "cached value in '{}' has unexpected type, dropping entry",
                        self.name,
                    );
                    self.mem.invalidate(identity);
                }
            }
        }

        let entry = self.find_file(identity)?;
        match read_envelope::<T>(&entry.path) {
            Ok((header, value)) if header.identity == *identity && header.tag == tag => {
                let value = Arc::new(value);
                self.mem.insert(identity.clone(), value.clone());
                Some(value)
            }
            Ok((header, _)) => {
                tracing::warn!(
                    "cache entry {} declares tag '{}', expected '{}', deleting it",
                    entry.path,
                    header.tag,
                    tag,
                );
                self.remove_file(&entry.path);
                None
            }
            Err(err) => {
                tracing::warn!(
                    "failed to read cache entry, deleting corrupted file {}: {err}",
                    entry.path,
                );
                self.remove_file(&entry.path);
                None
            }
        }
    }

    /// Store a value in both tiers. Persistence failures are logged and
    /// swallowed; the in-memory entry stays valid either way.
    fn store<T: CacheValue>(
        &self,
        identity: &Meta,
        tag: &str,
        instance: Option<&str>,
        value: &T,
        dynamic: Arc<T>,
    ) {
        self.mem.insert(identity.clone(), dynamic);

        if !self.persist {
            return;
        }

        let hash = identity.identity_hash();
        let path = self.dir.join(file_name(tag, instance, hash));
        let header = Header {
            tag: tag.to_string(),
            identity: identity.clone(),
        };

        match write_envelope(&path, &header, value) {
            Ok(()) => {
                let mut index = self.index.lock().unwrap();
                index.retain(|entry| entry.path != path);
                index.push(IndexEntry {
                    identity: identity.clone(),
                    hash,
                    path,
                });
            }
            Err(err) => {
                tracing::error!(
                    "failed to persist cache entry {hash} in '{}': {err}",
                    self.name,
                );
            }
        }
    }

    fn remove_file(&self, path: &Utf8Path) {
        self.index.lock().unwrap().retain(|entry| entry.path != path);
        if let Err(err) = fs::remove_file(path) {
            tracing::error!("failed to delete cache file {path}: {err}");
        }
    }

    fn clear(&self) {
        self.mem.invalidate_all();
        self.index.lock().unwrap().clear();
        if self.persist
            && self.dir.exists()
            && let Err(err) = fs::remove_dir_all(&self.dir)
        {
            tracing::error!("failed to delete cache directory {}: {err}", self.dir);
        }
    }
}

/// Rebuild the region index from on-disk reality. Unreadable files are
/// deleted so they can't reappear as phantom entries on the next scan.
fn scan_directory(dir: &Utf8Path) -> Vec<IndexEntry> {
    let mut index = Vec::new();

    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("can't list cache directory {dir}: {err}");
            return index;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension() != Some(EXTENSION) {
            continue;
        }

        match read_header(path) {
            Ok(header) => index.push(IndexEntry {
                hash: header.identity.identity_hash(),
                identity: header.identity,
                path: path.to_owned(),
            }),
            Err(err) => {
                tracing::warn!("failed to read cache file {path}, deleting it: {err}");
                if let Err(err) = fs::remove_file(path) {
                    tracing::error!("failed to delete cache file {path}: {err}");
                }
            }
        }
    }

    index
}

/// Stable file name: type tag, optional instance name, unsigned decimal
/// identity hash. Two processes using the same identity converge on the
/// same name; the header check decides the actual hit.
fn file_name(tag: &str, instance: Option<&str>, hash: u64) -> String {
    match instance {
        Some(instance) => format!("{tag}[{instance}]{hash}.{EXTENSION}"),
        None => format!("{tag}{hash}.{EXTENSION}"),
    }
}

fn read_header(path: &Utf8Path) -> anyhow::Result<Header> {
    let mut file = fs::File::open(path)?;
    read_header_from(&mut file)
}

fn read_header_from(file: &mut fs::File) -> anyhow::Result<Header> {
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    anyhow::ensure!(&magic == MAGIC, "bad envelope magic");

    let mut len = [0u8; 4];
    file.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;

    let mut header = vec![0u8; len];
    file.read_exact(&mut header)?;
    Ok(ciborium::from_reader(header.as_slice())?)
}

fn read_envelope<T: CacheValue>(path: &Utf8Path) -> anyhow::Result<(Header, T)> {
    let mut file = fs::File::open(path)?;
    let header = read_header_from(&mut file)?;
    let value = ciborium::from_reader::<T, _>(&mut file)?;
    Ok((header, value))
}

fn write_envelope<T: CacheValue>(path: &Utf8Path, header: &Header, value: &T) -> anyhow::Result<()> {
    let mut header_bytes = Vec::new();
    ciborium::into_writer(header, &mut header_bytes)?;

    let mut file = fs::File::create(path)?;
    file.write_all(MAGIC)?;
    file.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
    file.write_all(&header_bytes)?;
    ciborium::into_writer(value, &mut file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::Goal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_data(counter: &Arc<AtomicUsize>, value: f64) -> Data<f64> {
        let counter = counter.clone();
        Data::new(
            Goal::new(&Executor::global(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }),
            Meta::empty(),
        )
    }

    fn identity(key: i64) -> Meta {
        Meta::new("id").put("key", key)
    }

    fn temp_cache() -> (tempfile::TempDir, Cache) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let cache = Cache::new(root).unwrap();
        (dir, cache)
    }

    #[test]
    fn hit_avoids_recomputation() {
        let (_dir, cache) = temp_cache();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = cache.cache("region", counting_data(&counter, 1.5), identity(1));
        assert_eq!(*first.get().unwrap(), 1.5);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // different underlying value, same identity -> first result wins
        let second = cache.cache("region", counting_data(&counter, 99.0), identity(1));
        assert!(second.goal().dependencies().is_empty());
        assert_eq!(*second.get().unwrap(), 1.5);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn miss_declares_the_original_as_dependency() {
        let (_dir, cache) = temp_cache();
        let counter = Arc::new(AtomicUsize::new(0));

        let wrapped = cache.cache("region", counting_data(&counter, 1.0), identity(7));
        assert_eq!(wrapped.goal().dependencies().len(), 1);
    }

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let cache = Cache::new(&root).unwrap();
            let data = cache.cache("region", counting_data(&counter, 4.25), identity(5));
            assert_eq!(*data.get().unwrap(), 4.25);
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }

        // a fresh instance with an empty memory tier finds the file
        let cache = Cache::new(&root).unwrap();
        assert!(cache.contains("region", &identity(5)));

        let data = cache.cache("region", counting_data(&counter, 0.0), identity(5));
        assert_eq!(*data.get().unwrap(), 4.25);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn corrupted_payload_recovers_by_recomputation() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let cache = Cache::new(&root).unwrap();
            let data = cache.cache("region", counting_data(&counter, 2.0), identity(3));
            assert_eq!(*data.get().unwrap(), 2.0);
        }

        // truncate the payload while keeping the header readable
        let file = fs::read_dir(root.join("region"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let bytes = fs::read(&file).unwrap();
        fs::write(&file, &bytes[..bytes.len() - 4]).unwrap();

        let cache = Cache::new(&root).unwrap();
        let data = cache.cache("region", counting_data(&counter, 2.0), identity(3));
        assert_eq!(*data.get().unwrap(), 2.0);
        // the corrupted entry was a clean miss: recomputed exactly once
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // and the recomputed value was re-persisted over the bad file
        let cache = Cache::new(&root).unwrap();
        assert!(cache.contains("region", &identity(3)));
        let data = cache.cache("region", counting_data(&counter, 0.0), identity(3));
        assert_eq!(*data.get().unwrap(), 2.0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unreadable_file_is_deleted_during_scan() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let region_dir = root.join("region");
        fs::create_dir_all(&region_dir).unwrap();
        let bogus = region_dir.join(format!("junk.{EXTENSION}"));
        fs::write(&bogus, b"not an envelope").unwrap();

        let cache = Cache::new(&root).unwrap();
        assert!(!cache.contains("region", &identity(1)));
        assert!(!bogus.exists());
    }

    #[test]
    fn cache_node_preserves_shape() {
        let (_dir, cache) = temp_cache();

        let mut builder = DataNode::build().with_name(Name::of("results"));
        builder.put_data(&Name::of("a"), Data::value(1.0));
        builder.put_data(&Name::of("sub.b"), Data::value(2.0));
        builder.put_data(&Name::of("sub.deep.c"), Data::value(3.0));
        let node = builder.build();

        let cached = cache.cache_node("task", &node, &|name, _data| {
            Meta::new("id").put("name", name.to_string())
        });

        assert_eq!(cached.name(), node.name());
        let names: Vec<_> = cached
            .data(true)
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect();
        assert_eq!(names, vec!["a", "sub.b", "sub.deep.c"]);

        for (name, data) in cached.data(true) {
            let original = node.get(&name).unwrap();
            assert_eq!(*data.get().unwrap(), *original.get().unwrap());
        }

        // subtrees land in derived regions
        let mut regions = cache.region_names();
        regions.sort();
        assert_eq!(regions, vec!["task", "task.sub", "task.sub.deep"]);
    }

    #[test]
    fn invalidate_then_miss() {
        let (_dir, cache) = temp_cache();
        let counter = Arc::new(AtomicUsize::new(0));

        let data = cache.cache("region", counting_data(&counter, 1.0), identity(9));
        assert_eq!(*data.get().unwrap(), 1.0);
        assert!(cache.contains("region", &identity(9)));

        cache.invalidate("region");
        assert!(!cache.region_names().contains(&"region".to_string()));
        assert!(!cache.contains("region", &identity(9)));

        let data = cache.cache("region", counting_data(&counter, 5.0), identity(9));
        assert_eq!(*data.get().unwrap(), 5.0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bypass_returns_data_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let cache = Cache::new(root)
            .unwrap()
            .with_bypass(|meta| meta.bool_or("nostore", false));

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let data = Data::new(
            Goal::new(&Executor::global(), move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(1.0)
            }),
            Meta::empty().put("nostore", true),
        );

        let wrapped = cache.cache("region", data, identity(1));
        assert_eq!(*wrapped.get().unwrap(), 1.0);
        // no region was ever opened
        assert!(cache.region_names().is_empty());
    }

    #[test]
    fn completed_original_is_adopted_without_storing() {
        let (_dir, cache) = temp_cache();
        let counter = Arc::new(AtomicUsize::new(0));

        let data = counting_data(&counter, 3.5);
        assert_eq!(*data.get().unwrap(), 3.5);

        let wrapped = cache.cache("region", data, identity(11));
        assert_eq!(*wrapped.get().unwrap(), 3.5);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // adoption does not persist the value
        assert!(!cache.contains("region", &identity(11)));
    }

    #[test]
    fn failures_are_never_cached() {
        let (_dir, cache) = temp_cache();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let failing: Data<f64> = Data::new(
            Goal::new(&Executor::global(), move || {
                c.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }),
            Meta::empty(),
        );

        let wrapped = cache.cache("region", failing, identity(2));
        assert!(wrapped.get().is_err());
        assert!(!cache.contains("region", &identity(2)));

        // a later attempt with the same identity recomputes
        let data = cache.cache("region", counting_data(&counter, 8.0), identity(2));
        assert_eq!(*data.get().unwrap(), 8.0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_requests_share_one_execution() {
        let (_dir, cache) = temp_cache();
        let cache = Arc::new(cache);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let c = counter.clone();
                    let data = Data::new(
                        Goal::new(&Executor::global(), move || {
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            c.fetch_add(1, Ordering::SeqCst);
                            Ok(6.0)
                        }),
                        Meta::empty(),
                    );
                    let wrapped = cache.cache("region", data, identity(42));
                    *wrapped.get().unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 6.0);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_names_are_stable() {
        assert_eq!(file_name("f64", None, 17), "f6417.krk");
        assert_eq!(file_name("f64", Some("scan"), 17), "f64[scan]17.krk");
    }
}
