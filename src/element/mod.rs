pub mod kind;
pub mod sync;

pub use kind::{ElementKind, Interaction, UnknownKind};
pub use sync::{Counter, ElementState, SyncCounters};

use crate::{
    connection::{
        data::{Format, Sort},
        Connection, ConnectionKind, ConnectionListener, ConnectionSpec, PoolError, SubscriptionId,
    },
    dataset::{cut::PartialCut, Dataset},
    style::{StyleValue, Styles},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElementError {
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),
    #[error("element {index} is a {current} and can't become a {requested}")]
    KindChanged {
        index: usize,
        current: ElementKind,
        requested: String,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Typed replacement for the `element:ready` event.
pub trait ElementListener: Send + Sync {
    fn on_ready(&self, element: &Element);
}

fn default_display() -> bool {
    true
}

fn default_aggregation() -> String {
    "sum".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSettings {
    pub field: String,
    #[serde(default)]
    pub bucket: Option<f64>,
    #[serde(default)]
    pub bucket_interval: Option<f64>,
    #[serde(default)]
    pub sort: Option<Sort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSettings {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_display")]
    pub display: bool,
    #[serde(default)]
    pub dimensions: Vec<DimensionSettings>,
    #[serde(default)]
    pub measure: Option<String>,
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
    #[serde(default)]
    pub format: Format,
}

/// Cut change requested by a click on an element.
#[derive(Debug, Clone, PartialEq)]
pub enum CutIntent {
    Add(PartialCut),
    Remove(Vec<String>),
    DrillDown {
        dimension: String,
        trigger_level: u32,
        parent_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRow {
    pub id: String,
    pub label: String,
    pub total: f64,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSeries {
    pub field: Option<String>,
    pub label: String,
    pub total: Option<f64>,
    pub rows: Vec<ResolvedRow>,
}

/// Render-ready snapshot of an element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedElement {
    pub index: usize,
    pub kind: ElementKind,
    pub title: Option<String>,
    pub color: Option<StyleValue>,
    pub series: Vec<ResolvedSeries>,
}

struct Planned {
    dimension_index: Option<usize>,
    spec: ConnectionSpec,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    loaded: bool,
    pending: bool,
}

struct OwnedConnection {
    dimension_index: Option<usize>,
    connection: Arc<Connection>,
    subscription: SubscriptionId,
    _binding: Arc<Binding>,
}

struct Inner {
    settings: ElementSettings,
    connected: bool,
    generation: u64,
    last_change: u64,
    slots: Vec<Slot>,
    owned: Vec<OwnedConnection>,
    counters: SyncCounters,
}

/// Connection listener bound to one slot of one connection set. Events of
/// an older set carry a stale generation and are ignored.
struct Binding {
    element: Weak<Element>,
    generation: u64,
    slot: usize,
}

impl ConnectionListener for Binding {
    fn on_fetching(&self, _connection: &Connection) {
        if let Some(element) = self.element.upgrade() {
            element.slot_fetching(self.generation, self.slot);
        }
    }

    fn on_synced(&self, connection: &Connection) {
        if let Some(element) = self.element.upgrade() {
            element.slot_synced(self.generation, self.slot, connection.kind());
        }
    }

    fn on_changed(&self, _connection: &Connection, change: u64) {
        if let Some(element) = self.element.upgrade() {
            element.slot_changed(self.generation, change);
        }
    }
}

/// One chart of a visualisation. Owns a connection per dimension, plus a
/// labels connection for fields that don't label themselves, and reports
/// ready once every one of them has loaded.
pub struct Element {
    me: Weak<Element>,
    index: usize,
    kind: ElementKind,
    dataset: Arc<Dataset>,
    listener: Weak<dyn ElementListener>,
    inner: parking_lot::Mutex<Inner>,
}

impl Element {
    /// Resolves the element type and acquires its connections.
    pub fn new(
        index: usize,
        settings: ElementSettings,
        dataset: Arc<Dataset>,
        listener: Weak<dyn ElementListener>,
    ) -> Result<Arc<Self>, ElementError> {
        let kind: ElementKind = settings.kind.parse()?;
        let element = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            index,
            kind,
            dataset,
            listener,
            inner: parking_lot::Mutex::new(Inner {
                settings,
                connected: false,
                generation: 0,
                last_change: 0,
                slots: Vec::new(),
                owned: Vec::new(),
                counters: SyncCounters::default(),
            }),
        });
        element.add_connections();
        Ok(element)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn settings(&self) -> ElementSettings {
        self.inner.lock().settings.clone()
    }

    pub fn sync_counters(&self) -> SyncCounters {
        self.inner.lock().counters
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .lock()
            .owned
            .iter()
            .map(|owned| Arc::clone(&owned.connection))
            .collect()
    }

    pub fn state(&self) -> ElementState {
        Self::state_of(&self.inner.lock())
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ElementState::Ready
    }

    fn state_of(inner: &Inner) -> ElementState {
        if !inner.settings.display {
            return ElementState::Ready;
        }
        if !inner.connected {
            return ElementState::Uninitialized;
        }
        match inner
            .slots
            .iter()
            .filter(|slot| !slot.loaded || slot.pending)
            .count()
        {
            0 => ElementState::Ready,
            outstanding => ElementState::Connecting { outstanding },
        }
    }

    fn requires_labels(&self, field: &str) -> bool {
        self.dataset
            .get_field(field)
            .map_or(false, |field| field.kind.requires_labels())
    }

    fn plan(&self, settings: &ElementSettings) -> Vec<Planned> {
        let measure = settings.measure.as_deref();
        let aggregation = settings.aggregation.as_str();
        if settings.dimensions.is_empty() {
            return vec![Planned {
                dimension_index: None,
                spec: ConnectionSpec::observations(None, measure, aggregation),
            }];
        }
        let mut planned = Vec::new();
        for (index, dimension) in settings.dimensions.iter().enumerate() {
            planned.push(Planned {
                dimension_index: Some(index),
                spec: ConnectionSpec::observations(Some(&dimension.field), measure, aggregation)
                    .with_bucket(dimension.bucket, dimension.bucket_interval),
            });
            if self.requires_labels(&dimension.field) {
                planned.push(Planned {
                    dimension_index: Some(index),
                    spec: ConnectionSpec::dimensions(&dimension.field, measure, aggregation),
                });
            }
        }
        planned
    }

    fn add_connections(&self) {
        let (generation, planned) = {
            let mut inner = self.inner.lock();
            inner.connected = true;
            if !inner.settings.display {
                return;
            }
            let planned = self.plan(&inner.settings);
            inner.generation += 1;
            inner.slots = vec![
                Slot {
                    loaded: false,
                    pending: true,
                };
                planned.len()
            ];
            inner.counters = SyncCounters::default();
            for item in &planned {
                if let Some(counter) = inner.counters.counter_mut(&item.spec.kind) {
                    counter.num += 1;
                }
            }
            (inner.generation, planned)
        };
        log::debug!(
            target: "element",
            "element {} ({}) acquiring {} connections",
            self.index,
            self.kind,
            planned.len()
        );

        for (slot, item) in planned.into_iter().enumerate() {
            let binding = Arc::new(Binding {
                element: self.me.clone(),
                generation,
                slot,
            });
            let listener = Arc::downgrade(&binding) as Weak<dyn ConnectionListener>;
            let (connection, subscription) = self.dataset.get_connection_with(&item.spec, listener);
            if subscription.settled {
                self.slot_synced(generation, slot, connection.kind());
            }
            self.inner.lock().owned.push(OwnedConnection {
                dimension_index: item.dimension_index,
                connection,
                subscription: subscription.id,
                _binding: binding,
            });
        }
    }

    /// Unsubscribes from and releases every owned connection.
    pub fn remove_connections(&self) -> Result<(), PoolError> {
        let owned = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.connected = false;
            inner.slots.clear();
            inner.counters = SyncCounters::default();
            std::mem::take(&mut inner.owned)
        };
        for owned in &owned {
            owned.connection.unsubscribe(owned.subscription);
        }
        for owned in &owned {
            self.dataset.release_connection(&owned.connection)?;
        }
        Ok(())
    }

    /// Swaps in new settings and re-acquires connections. The element type
    /// can't change.
    pub fn reconfigure(&self, settings: ElementSettings) -> Result<(), ElementError> {
        let requested: ElementKind = settings.kind.parse()?;
        if requested != self.kind {
            return Err(ElementError::KindChanged {
                index: self.index,
                current: self.kind,
                requested: settings.kind,
            });
        }
        self.remove_connections()?;
        self.inner.lock().settings = settings;
        self.add_connections();
        Ok(())
    }

    fn slot_fetching(&self, generation: u64, slot: usize) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        if let Some(slot) = inner.slots.get_mut(slot) {
            slot.pending = true;
        }
    }

    fn slot_synced(&self, generation: u64, slot: usize, kind: &ConnectionKind) {
        let ready = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            if let Some(slot) = inner.slots.get_mut(slot) {
                slot.loaded = true;
                slot.pending = false;
            }
            if let Some(counter) = inner.counters.counter_mut(kind) {
                counter.loaded += 1;
            }
            Self::state_of(&inner) == ElementState::Ready
        };
        if ready {
            self.emit_ready();
        }
    }

    /// Re-signals ready once per cut change, however many owned
    /// connections report it.
    fn slot_changed(&self, generation: u64, change: u64) {
        let ready = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.last_change == change {
                return;
            }
            inner.last_change = change;
            Self::state_of(&inner) == ElementState::Ready
        };
        if ready {
            self.emit_ready();
        }
    }

    fn emit_ready(&self) {
        log::debug!(target: "element", "element {} ({}) ready", self.index, self.kind);
        if let Some(listener) = self.listener.upgrade() {
            listener.on_ready(self);
        }
    }

    fn observations_for(&self, dimension_index: Option<usize>) -> Option<Arc<Connection>> {
        self.find_owned(dimension_index, &ConnectionKind::Observations)
    }

    fn find_owned(
        &self,
        dimension_index: Option<usize>,
        kind: &ConnectionKind,
    ) -> Option<Arc<Connection>> {
        self.inner
            .lock()
            .owned
            .iter()
            .find(|owned| {
                owned.dimension_index == dimension_index && owned.connection.kind() == kind
            })
            .map(|owned| Arc::clone(&owned.connection))
    }

    /// What a click on the value at `value_index` (in rendered order) of
    /// the dimension at `dimension_index` asks for.
    pub fn select(&self, dimension_index: usize, value_index: usize) -> Option<CutIntent> {
        let interaction = self.kind.interaction();
        if interaction == Interaction::None {
            return None;
        }
        let dimension = self
            .inner
            .lock()
            .settings
            .dimensions
            .get(dimension_index)
            .cloned()?;
        let id = self
            .observations_for(Some(dimension_index))?
            .get_data(Format::Absolute, dimension.sort)?
            .get(value_index)?
            .id
            .clone();

        if interaction == Interaction::Drill {
            if let Some(hierarchy) = self.dataset.get_dimension_hierarchy(&dimension.field) {
                let levels = hierarchy.levels();
                let level = hierarchy
                    .current_level(&self.dataset.get_cut())
                    .unwrap_or(levels.upper_bound);
                if level > levels.lower_bound {
                    return Some(CutIntent::DrillDown {
                        dimension: dimension.field,
                        trigger_level: level,
                        parent_id: id,
                    });
                }
            }
        }
        if self.dataset.has_cut_id(&dimension.field, &id) {
            Some(CutIntent::Remove(vec![dimension.field]))
        } else {
            Some(CutIntent::Add(PartialCut::new().set(dimension.field, id)))
        }
    }

    /// `None` while loading and for hidden elements.
    pub fn resolve(&self, styles: &Styles) -> Option<ResolvedElement> {
        let settings = {
            let inner = self.inner.lock();
            if !inner.settings.display || Self::state_of(&inner) != ElementState::Ready {
                return None;
            }
            inner.settings.clone()
        };
        let series = if settings.dimensions.is_empty() {
            let label = settings
                .measure
                .clone()
                .unwrap_or_else(|| settings.aggregation.clone());
            vec![self.resolve_series(None, None, label, None, settings.format)?]
        } else {
            settings
                .dimensions
                .iter()
                .enumerate()
                .map(|(index, dimension)| {
                    let label = self
                        .dataset
                        .get_field(&dimension.field)
                        .and_then(|field| field.label.clone())
                        .unwrap_or_else(|| dimension.field.clone());
                    self.resolve_series(
                        Some(index),
                        Some(&dimension.field),
                        label,
                        dimension.sort,
                        settings.format,
                    )
                })
                .collect::<Option<Vec<_>>>()?
        };
        Some(ResolvedElement {
            index: self.index,
            kind: self.kind,
            title: settings.title,
            color: styles.get_style("color", Some(self.kind)).cloned(),
            series,
        })
    }

    fn resolve_series(
        &self,
        dimension_index: Option<usize>,
        field: Option<&str>,
        label: String,
        sort: Option<Sort>,
        format: Format,
    ) -> Option<ResolvedSeries> {
        let observations = self.observations_for(dimension_index)?;
        let labels = self.find_owned(dimension_index, &ConnectionKind::Dimensions);
        let rows = observations
            .get_data(format, sort)?
            .into_iter()
            .map(|observation| ResolvedRow {
                label: labels
                    .as_ref()
                    .and_then(|labels| labels.label_for(&observation.id))
                    .unwrap_or_else(|| observation.id.clone()),
                selected: field.map_or(false, |field| {
                    self.dataset.has_cut_id(field, &observation.id)
                }),
                id: observation.id,
                total: observation.total,
            })
            .collect();
        Some(ResolvedSeries {
            field: field.map(str::to_string),
            label,
            total: observations.get_total(),
            rows,
        })
    }
}
