//! # GraphStore: Durable Property Graph
//!
//! The CMA keeps drones, rings and the links between them in a small
//! property graph persisted to sled.
//!
//! ## Tree Layout
//!
//! | Tree            | Key                              | Value            |
//! |-----------------|----------------------------------|------------------|
//! | `nodes`         | `bincode(GraphKey)`              | `bincode(record)`|
//! | `relationships` | `bincode((from, rel_type, to))`  | empty            |
//!
//! ## Transactions
//!
//! The whole graph is mirrored in memory. Mutations apply to the mirror
//! immediately (so a handler reads its own writes) and are recorded in a
//! journal. [`GraphStore::commit`] replays the journal into one `Batch` per
//! tree, applies both inside a single multi-tree sled transaction and
//! flushes; [`GraphStore::abort`] undoes it in reverse. Nothing touches disk
//! until commit, and a commit lands on both trees or on neither.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Batch, Db, Transactional, Tree};
use tracing::debug;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("node not found: {0}")]
    NotFound(GraphKey),

    #[error("graph transaction aborted")]
    Aborted,
}

pub type StoreResult<T> = Result<T, StoreError>;

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Label of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Drone,
    Ring,
}

/// Identifies one node: its label plus its unique key within that label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphKey {
    pub kind: NodeKind,
    pub key: String,
}

impl GraphKey {
    pub fn new(kind: NodeKind, key: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
        }
    }

    pub fn drone(designation: &str) -> Self {
        Self::new(NodeKind::Drone, designation)
    }

    pub fn ring(name: &str) -> Self {
        Self::new(NodeKind::Ring, name)
    }
}

impl fmt::Display for GraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.key)
    }
}

/// A record type that lives in the graph.
pub trait GraphNode: Serialize + DeserializeOwned {
    const KIND: NodeKind;

    /// Unique key within [`Self::KIND`].
    fn node_key(&self) -> &str;

    fn graph_key(&self) -> GraphKey {
        GraphKey::new(Self::KIND, self.node_key())
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

type RelKey = (GraphKey, String, GraphKey);

#[derive(Debug, Clone)]
enum Mutation {
    /// A node was written; `previous` is what the mirror held before.
    PutNode {
        key: GraphKey,
        previous: Option<Vec<u8>>,
    },
    Relate(RelKey),
    Separate(RelKey),
}

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

pub struct GraphStore {
    db: Db,
    nodes_tree: Tree,
    rels_tree: Tree,
    nodes: BTreeMap<GraphKey, Vec<u8>>,
    /// (from, rel_type) -> targets
    outgoing: BTreeMap<(GraphKey, String), BTreeSet<GraphKey>>,
    /// (to, rel_type) -> sources
    incoming: BTreeMap<(GraphKey, String), BTreeSet<GraphKey>>,
    journal: Vec<Mutation>,
    /// Aborts the next commit between the two trees.
    #[cfg(test)]
    fail_between_trees: bool,
}

impl GraphStore {
    /// Opens (or creates) a store at `path` and loads the graph into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that is discarded when dropped. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let nodes_tree = db.open_tree("nodes")?;
        let rels_tree = db.open_tree("relationships")?;

        let mut store = Self {
            db,
            nodes_tree,
            rels_tree,
            nodes: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            journal: Vec::new(),
            #[cfg(test)]
            fail_between_trees: false,
        };

        for entry in store.nodes_tree.iter() {
            let (k, v) = entry?;
            let key: GraphKey = decode(&k)?;
            store.nodes.insert(key, v.to_vec());
        }
        for entry in store.rels_tree.iter() {
            let (k, _) = entry?;
            let rel: RelKey = decode(&k)?;
            store.link(&rel);
        }

        debug!(
            nodes = store.nodes.len(),
            relationships = store.rels_tree.len(),
            "graph store loaded"
        );
        Ok(store)
    }

    // -- Nodes --------------------------------------------------------------

    /// Loads the node of type `T` with key `key`, creating it with `create`
    /// if it does not exist. The flag is `true` when the node was created.
    pub fn load_or_create<T, F>(&mut self, key: &str, create: F) -> StoreResult<(T, bool)>
    where
        T: GraphNode,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.load::<T>(key)? {
            return Ok((existing, false));
        }
        let node = create();
        self.save(&node)?;
        Ok((node, true))
    }

    pub fn load<T: GraphNode>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.nodes.get(&GraphKey::new(T::KIND, key)) {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`load`](Self::load) but a missing node is an error.
    pub fn get<T: GraphNode>(&self, key: &str) -> StoreResult<T> {
        self.load(key)?
            .ok_or_else(|| StoreError::NotFound(GraphKey::new(T::KIND, key)))
    }

    /// Writes `node`, replacing any previous version.
    pub fn save<T: GraphNode>(&mut self, node: &T) -> StoreResult<()> {
        let key = node.graph_key();
        let bytes = encode(node)?;
        if self.nodes.get(&key) == Some(&bytes) {
            return Ok(());
        }
        let previous = self.nodes.insert(key.clone(), bytes);
        self.journal.push(Mutation::PutNode { key, previous });
        Ok(())
    }

    /// Every node of type `T`, in key order.
    pub fn load_all<T: GraphNode>(&self) -> StoreResult<Vec<T>> {
        self.nodes
            .iter()
            .filter(|(key, _)| key.kind == T::KIND)
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    // -- Relationships ------------------------------------------------------

    /// Adds a directed `rel_type` relationship. Relating twice is a no-op.
    pub fn relate(&mut self, from: &GraphKey, rel_type: &str, to: &GraphKey) {
        let rel = (from.clone(), rel_type.to_string(), to.clone());
        if self.link(&rel) {
            self.journal.push(Mutation::Relate(rel));
        }
    }

    /// Removes a directed relationship. Returns `false` if it did not exist.
    pub fn separate(&mut self, from: &GraphKey, rel_type: &str, to: &GraphKey) -> bool {
        let rel = (from.clone(), rel_type.to_string(), to.clone());
        let removed = self.unlink(&rel);
        if removed {
            self.journal.push(Mutation::Separate(rel));
        }
        removed
    }

    /// Targets of `rel_type` relationships leaving `from`.
    pub fn load_related(&self, from: &GraphKey, rel_type: &str) -> Vec<GraphKey> {
        self.outgoing
            .get(&(from.clone(), rel_type.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sources of `rel_type` relationships arriving at `to`.
    pub fn load_in_related(&self, to: &GraphKey, rel_type: &str) -> Vec<GraphKey> {
        self.incoming
            .get(&(to.clone(), rel_type.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_related(&self, from: &GraphKey, rel_type: &str, to: &GraphKey) -> bool {
        self.outgoing
            .get(&(from.clone(), rel_type.to_string()))
            .is_some_and(|set| set.contains(to))
    }

    /// Relationship types of any `prefix`-prefixed relationship arriving at
    /// `to`, with their sources.
    pub fn incoming_with_prefix(&self, to: &GraphKey, prefix: &str) -> Vec<(String, GraphKey)> {
        self.incoming
            .iter()
            .filter(|((target, rel_type), _)| target == to && rel_type.starts_with(prefix))
            .flat_map(|((_, rel_type), sources)| {
                sources.iter().map(move |s| (rel_type.clone(), s.clone()))
            })
            .collect()
    }

    fn link(&mut self, rel: &RelKey) -> bool {
        let (from, rel_type, to) = rel;
        let inserted = self
            .outgoing
            .entry((from.clone(), rel_type.clone()))
            .or_default()
            .insert(to.clone());
        self.incoming
            .entry((to.clone(), rel_type.clone()))
            .or_default()
            .insert(from.clone());
        inserted
    }

    fn unlink(&mut self, rel: &RelKey) -> bool {
        let (from, rel_type, to) = rel;
        let out_key = (from.clone(), rel_type.clone());
        let removed = match self.outgoing.get_mut(&out_key) {
            Some(set) => {
                let removed = set.remove(to);
                if set.is_empty() {
                    self.outgoing.remove(&out_key);
                }
                removed
            }
            None => false,
        };
        let in_key = (to.clone(), rel_type.clone());
        if let Some(set) = self.incoming.get_mut(&in_key) {
            set.remove(from);
            if set.is_empty() {
                self.incoming.remove(&in_key);
            }
        }
        removed
    }

    // -- Transactions -------------------------------------------------------

    /// Whether uncommitted mutations exist.
    pub fn has_pending(&self) -> bool {
        !self.journal.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.journal.len()
    }

    /// Persists every pending mutation and flushes to disk.
    pub fn commit(&mut self) -> StoreResult<()> {
        if self.journal.is_empty() {
            return Ok(());
        }

        let mut node_batch = Batch::default();
        let mut rel_batch = Batch::default();
        for mutation in &self.journal {
            match mutation {
                Mutation::PutNode { key, .. } => {
                    let k = encode(key)?;
                    match self.nodes.get(key) {
                        Some(bytes) => node_batch.insert(k, bytes.clone()),
                        None => node_batch.remove(k),
                    }
                }
                Mutation::Relate(rel) => rel_batch.insert(encode(rel)?, Vec::<u8>::new()),
                Mutation::Separate(rel) => rel_batch.remove(encode(rel)?),
            }
        }

        #[cfg(test)]
        let fail_between_trees = std::mem::take(&mut self.fail_between_trees);
        #[cfg(not(test))]
        let fail_between_trees = false;

        (&self.nodes_tree, &self.rels_tree)
            .transaction(|(nodes, rels)| -> ConflictableTransactionResult<()> {
                nodes.apply_batch(&node_batch)?;
                if fail_between_trees {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                rels.apply_batch(&rel_batch)?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => StoreError::Aborted,
                TransactionError::Storage(e) => StoreError::Sled(e),
            })?;
        self.db.flush()?;

        debug!(mutations = self.journal.len(), "graph transaction committed");
        self.journal.clear();
        Ok(())
    }

    /// Discards every pending mutation, restoring the last committed graph.
    pub fn abort(&mut self) {
        let journal = std::mem::take(&mut self.journal);
        if journal.is_empty() {
            return;
        }
        debug!(mutations = journal.len(), "graph transaction aborted");
        for mutation in journal.into_iter().rev() {
            match mutation {
                Mutation::PutNode { key, previous } => match previous {
                    Some(bytes) => {
                        self.nodes.insert(key, bytes);
                    }
                    None => {
                        self.nodes.remove(&key);
                    }
                },
                Mutation::Relate(rel) => {
                    self.unlink(&rel);
                }
                Mutation::Separate(rel) => {
                    self.link(&rel);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Thing {
        name: String,
        count: u32,
    }

    impl GraphNode for Thing {
        const KIND: NodeKind = NodeKind::Drone;
        fn node_key(&self) -> &str {
            &self.name
        }
    }

    fn thing(name: &str, count: u32) -> Thing {
        Thing {
            name: name.into(),
            count,
        }
    }

    #[test]
    fn load_or_create_reports_creation() {
        let mut store = GraphStore::open_temporary().unwrap();
        let (a, created) = store.load_or_create("a", || thing("a", 1)).unwrap();
        assert!(created);
        assert_eq!(a.count, 1);

        let (again, created) = store.load_or_create("a", || thing("a", 99)).unwrap();
        assert!(!created);
        assert_eq!(again.count, 1);
        assert!(store.has_pending());
    }

    #[test]
    fn relationships_are_indexed_both_ways() {
        let mut store = GraphStore::open_temporary().unwrap();
        let (a, b) = (GraphKey::drone("a"), GraphKey::drone("b"));
        store.relate(&a, "Next", &b);
        store.relate(&a, "Next", &b);

        assert_eq!(store.load_related(&a, "Next"), vec![b.clone()]);
        assert_eq!(store.load_in_related(&b, "Next"), vec![a.clone()]);
        assert!(store.is_related(&a, "Next", &b));
        assert!(!store.is_related(&b, "Next", &a));
        assert_eq!(store.pending_count(), 1);

        assert!(store.separate(&a, "Next", &b));
        assert!(!store.separate(&a, "Next", &b));
        assert!(store.load_related(&a, "Next").is_empty());
        assert!(store.load_in_related(&b, "Next").is_empty());
    }

    #[test]
    fn abort_restores_committed_state() {
        let mut store = GraphStore::open_temporary().unwrap();
        let (a, b) = (GraphKey::drone("a"), GraphKey::drone("b"));
        store.save(&thing("a", 1)).unwrap();
        store.relate(&a, "Next", &b);
        store.commit().unwrap();
        assert!(!store.has_pending());

        store.save(&thing("a", 2)).unwrap();
        store.save(&thing("c", 3)).unwrap();
        store.separate(&a, "Next", &b);
        store.relate(&b, "Next", &a);
        store.abort();

        assert!(!store.has_pending());
        assert_eq!(store.get::<Thing>("a").unwrap().count, 1);
        assert!(store.load::<Thing>("c").unwrap().is_none());
        assert!(store.is_related(&a, "Next", &b));
        assert!(!store.is_related(&b, "Next", &a));
    }

    #[test]
    fn unchanged_save_is_not_a_mutation() {
        let mut store = GraphStore::open_temporary().unwrap();
        store.save(&thing("a", 1)).unwrap();
        store.commit().unwrap();
        store.save(&thing("a", 1)).unwrap();
        assert!(!store.has_pending());
    }

    #[test]
    fn committed_graph_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (GraphKey::drone("a"), GraphKey::drone("b"));
        {
            let mut store = GraphStore::open(dir.path()).unwrap();
            store.save(&thing("a", 7)).unwrap();
            store.save(&thing("b", 8)).unwrap();
            store.relate(&a, "Next", &b);
            store.relate(&b, "Next", &a);
            store.commit().unwrap();
            store.separate(&b, "Next", &a);
            store.commit().unwrap();
            // Uncommitted work is lost.
            store.save(&thing("z", 0)).unwrap();
        }

        let store = GraphStore::open(dir.path()).unwrap();
        let all = store.load_all::<Thing>().unwrap();
        assert_eq!(all, vec![thing("a", 7), thing("b", 8)]);
        assert!(store.is_related(&a, "Next", &b));
        assert!(!store.is_related(&b, "Next", &a));
    }

    #[test]
    fn failed_commit_writes_neither_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (GraphKey::drone("a"), GraphKey::drone("b"));
        {
            let mut store = GraphStore::open(dir.path()).unwrap();
            store.save(&thing("a", 1)).unwrap();
            store.commit().unwrap();

            store.save(&thing("a", 2)).unwrap();
            store.save(&thing("b", 3)).unwrap();
            store.relate(&a, "Next", &b);
            store.fail_between_trees = true;
            assert!(matches!(store.commit(), Err(StoreError::Aborted)));
            assert!(store.has_pending());
            store.abort();
        }

        let store = GraphStore::open(dir.path()).unwrap();
        assert_eq!(store.load_all::<Thing>().unwrap(), vec![thing("a", 1)]);
        assert!(!store.is_related(&a, "Next", &b));
    }

    #[test]
    fn missing_node_is_not_found() {
        let store = GraphStore::open_temporary().unwrap();
        assert!(matches!(
            store.get::<Thing>("ghost"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn incoming_prefix_lookup() {
        let mut store = GraphStore::open_temporary().unwrap();
        let d = GraphKey::drone("d");
        store.relate(&GraphKey::ring("r1"), "RingMember_r1", &d);
        store.relate(&GraphKey::ring("r2"), "RingMember_r2", &d);
        store.relate(&GraphKey::drone("x"), "RingNext_r1", &d);

        let mut found = store.incoming_with_prefix(&d, "RingMember_");
        found.sort();
        assert_eq!(
            found,
            vec![
                ("RingMember_r1".to_string(), GraphKey::ring("r1")),
                ("RingMember_r2".to_string(), GraphKey::ring("r2")),
            ]
        );
    }
}
