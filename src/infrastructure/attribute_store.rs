use super::{AttributeStore, StoreError, StoreMutation};
use crate::domain::attribute::{AttributeSet, CLASS_ATTRIBUTE, Entity, EntityKind};
use arc_swap::ArcSwap;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, instrument};

/// Ids per value of one attribute. Tables and buckets are shared between
/// snapshots and copied only when a write touches them.
type ValueIndex = HashMap<String, Arc<BTreeSet<String>>>;

/// Immutable view of every entity of one kind, with an inverted
/// `attribute -> value -> ids` index over the same entities.
#[derive(Debug, Clone, Default)]
pub struct AttributeSnapshot {
    version: u64,
    entities: HashMap<String, Arc<Entity>>,
    index: HashMap<String, Arc<ValueIndex>>,
}

impl AttributeSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    /// Ids of entities whose `attribute` has exactly `value`.
    pub fn ids_with(&self, attribute: &str, value: &str) -> Option<&BTreeSet<String>> {
        self.index
            .get(attribute)
            .and_then(|values| values.get(value))
            .map(|ids| &**ids)
    }

    pub fn all_of_class<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.ids_with(CLASS_ATTRIBUTE, class)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    fn apply(&mut self, mutation: StoreMutation) {
        match mutation {
            StoreMutation::Upsert(entity) => {
                if let Some(previous) = self.entities.remove(&entity.id) {
                    self.unindex(&previous);
                }
                self.index_entity(&entity);
                self.entities.insert(entity.id.clone(), Arc::new(entity));
            }
            StoreMutation::Remove(id) => {
                if let Some(previous) = self.entities.remove(&id) {
                    self.unindex(&previous);
                }
            }
        }
    }

    fn index_entity(&mut self, entity: &Entity) {
        for (name, value) in entity.pairs() {
            let values = Arc::make_mut(self.index.entry(name.to_string()).or_default());
            Arc::make_mut(values.entry(value.to_string()).or_default()).insert(entity.id.clone());
        }
    }

    fn unindex(&mut self, entity: &Entity) {
        for (name, value) in entity.pairs() {
            let Some(values) = self.index.get_mut(name) else {
                continue;
            };
            let values = Arc::make_mut(values);
            if let Some(ids) = values.get_mut(value) {
                Arc::make_mut(ids).remove(&entity.id);
                if ids.is_empty() {
                    values.remove(value);
                }
            }
            if values.is_empty() {
                self.index.remove(name);
            }
        }
    }
}

/// Lazily walks the members of one class in a held snapshot.
pub struct ClassMembers {
    snapshot: Arc<AttributeSnapshot>,
    class: String,
    cursor: Option<String>,
}

impl Iterator for ClassMembers {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let ids = self.snapshot.ids_with(CLASS_ATTRIBUTE, &self.class)?;
        let lower = match &self.cursor {
            Some(last) => Bound::Excluded(last.as_str()),
            None => Bound::Unbounded,
        };
        let next = ids
            .range::<str, _>((lower, Bound::Unbounded))
            .next()?
            .clone();
        self.cursor = Some(next.clone());
        Some(next)
    }
}

/// Copy-on-write store: writers are serialized and publish a fresh snapshot,
/// readers load the current one without locking.
///
/// A write costs O(store size) in pointer copies: the entity map and the
/// per-attribute table are cloned shallowly, and only the index tables and
/// buckets the batch touches are copied in full. Feed batches amortize this
/// over many records.
pub struct InMemoryAttributeStore {
    kind: EntityKind,
    current: ArcSwap<AttributeSnapshot>,
    writer: Mutex<()>,
}

impl InMemoryAttributeStore {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            current: ArcSwap::from_pointee(AttributeSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn with_entities(kind: EntityKind, entities: Vec<Entity>) -> Self {
        let store = Self::new(kind);
        store.apply(entities.into_iter().map(StoreMutation::Upsert).collect());
        store
    }
}

impl AttributeStore for InMemoryAttributeStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn upsert(&self, id: &str, class: &str, attributes: AttributeSet) -> u64 {
        self.apply(vec![StoreMutation::Upsert(Entity::new(id, class, attributes))])
    }

    fn remove(&self, id: &str) -> u64 {
        self.apply(vec![StoreMutation::Remove(id.to_string())])
    }

    #[instrument(skip(self, mutations), fields(kind = %self.kind, count = mutations.len()))]
    fn apply(&self, mutations: Vec<StoreMutation>) -> u64 {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = AttributeSnapshot::clone(&self.current.load());
        for mutation in mutations {
            next.apply(mutation);
        }
        next.version += 1;
        let version = next.version;
        debug!(store_version = version, entities = next.len(), "Attribute snapshot installed");
        self.current.store(Arc::new(next));
        version
    }

    fn get(&self, id: &str) -> Result<Arc<Entity>, StoreError> {
        self.current
            .load()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: self.kind,
                id: id.to_string(),
            })
    }

    fn all_of_class(&self, class: &str) -> ClassMembers {
        ClassMembers {
            snapshot: self.snapshot(),
            class: class.to_string(),
            cursor: None,
        }
    }

    fn snapshot(&self) -> Arc<AttributeSnapshot> {
        self.current.load_full()
    }
}
