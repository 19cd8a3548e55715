pub mod cut;
pub mod hierarchy;

use crate::{
    connection::{
        data::{Datum, Format},
        Connection, ConnectionListener, ConnectionPool, ConnectionSpec, Lookup, PoolError,
        Subscription,
    },
    fetcher::Fetcher,
    settings::ConnectionSettings,
};
use cut::{Cut, CutValue, PartialCut};
use hierarchy::Hierarchy;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// Typed replacement for the `cut:add` / `cut:remove` events.
pub trait CutListener: Send + Sync {
    fn on_cut_added(&self, partial: &PartialCut);
    fn on_cut_removed(&self, _keys: &[String]) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Date,
    Geo,
}

impl FieldType {
    /// Numbers and dates are their own labels.
    pub fn requires_labels(&self) -> bool {
        matches!(self, Self::String | Self::Geo)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: FieldType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescription {
    pub id: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub hierarchies: HashMap<String, Hierarchy>,
    /// Cut in effect before any interaction.
    #[serde(default)]
    pub cut: Cut,
}

/// Owns the canonical cut and the connection pool, and keeps every pooled
/// connection in step with the cut.
pub struct Dataset {
    description: DatasetDescription,
    pool: ConnectionPool,
    cut: parking_lot::RwLock<Cut>,
    listeners: parking_lot::Mutex<Vec<Weak<dyn CutListener>>>,
    changes: AtomicU64,
}

impl Dataset {
    pub fn new(
        description: DatasetDescription,
        fetcher: Arc<dyn Fetcher>,
        settings: &ConnectionSettings,
    ) -> Self {
        let pool = ConnectionPool::new(
            description.id.clone(),
            fetcher,
            settings.discard_stale_responses,
        );
        Self {
            cut: parking_lot::RwLock::new(description.cut.clone()),
            description,
            pool,
            listeners: Default::default(),
            changes: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.description.id
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn get_field(&self, id: &str) -> Option<&Field> {
        self.description.fields.iter().find(|field| field.id == id)
    }

    pub fn subscribe(&self, listener: Weak<dyn CutListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn get_connection(&self, spec: &ConnectionSpec) -> Arc<Connection> {
        let cut = self.cut.read();
        self.pool.get_connection(spec, &cut)
    }

    pub fn get_connection_with(
        &self,
        spec: &ConnectionSpec,
        listener: Weak<dyn ConnectionListener>,
    ) -> (Arc<Connection>, Subscription) {
        let cut = self.cut.read();
        self.pool.get_connection_with(spec, &cut, listener)
    }

    pub fn release_connection(&self, connection: &Arc<Connection>) -> Result<(), PoolError> {
        self.pool.release_connection(connection)
    }

    pub fn get_cut(&self) -> Cut {
        self.cut.read().clone()
    }

    pub fn get_cut_value(&self, dimension: &str) -> Option<CutValue> {
        self.cut.read().get(dimension).cloned()
    }

    pub fn is_cut(&self, dimension: &str) -> bool {
        self.cut.read().contains(dimension)
    }

    pub fn has_cut_id(&self, dimension: &str, id: &str) -> bool {
        self.cut
            .read()
            .get(dimension)
            .map_or(false, |value| value.matches_id(id))
    }

    /// Whether the observation at `index` of the dimension's pooled data is
    /// the one the dimension is cut to.
    pub fn has_cut_value(&self, dimension: &str, index: usize) -> bool {
        let Some(cut_value) = self.get_cut_value(dimension) else {
            return false;
        };
        let Some(connection) = self.pool.find_observations(dimension) else {
            return false;
        };
        match connection.get_value(Lookup::Index(index), Format::Absolute) {
            Some(Datum::Observation(observation)) => cut_value.matches_id(&observation.id),
            _ => false,
        }
    }

    pub fn add_cut(&self, partial: &PartialCut) {
        if self.apply_cut(partial) {
            self.notify(|listener| listener.on_cut_added(partial));
        }
    }

    pub fn remove_cut<S: AsRef<str>>(&self, keys: &[S]) {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        if self.apply_cut(&PartialCut::removing(keys.iter().cloned())) {
            self.notify(|listener| listener.on_cut_removed(&keys));
        }
    }

    /// Merges `partial` into the cut and hands the new cut to every pooled
    /// connection. A connection is re-fetched unless the change is a single
    /// dimension that is the connection's own: cutting a dimension on
    /// itself doesn't change its value range, a re-render is enough.
    fn apply_cut(&self, partial: &PartialCut) -> bool {
        if partial.is_empty() {
            return false;
        }
        let single = partial.single_dimension();
        let (change, refetch, rerender) = {
            let mut cut = self.cut.write();
            let change = self.changes.fetch_add(1, Ordering::SeqCst) + 1;
            cut.apply(partial);
            log::info!(target: "dataset", "cut changed by {:?}, now {:?}", partial, *cut);
            let connections = self.pool.connections();
            for connection in &connections {
                connection.set_cut(cut.clone());
            }
            let refetched = |connection: &Arc<Connection>| match single {
                Some(dimension) => connection.dimension() != Some(dimension),
                None => true,
            };
            let (refetch, rerender): (Vec<_>, Vec<_>) =
                connections.into_iter().partition(refetched);
            (change, refetch, rerender)
        };
        for connection in &refetch {
            connection.fetch();
        }
        for connection in &rerender {
            connection.emit_changed(change);
        }
        log::debug!(
            target: "dataset",
            "{} connections re-fetched, {} re-rendered",
            refetch.len(),
            rerender.len()
        );
        true
    }

    /// Hierarchy of `id` with its level bounds filled in.
    pub fn get_dimension_hierarchy(&self, id: &str) -> Option<Hierarchy> {
        self.description.hierarchies.get(id).map(|hierarchy| {
            let mut hierarchy = hierarchy.clone();
            let levels = hierarchy.levels();
            hierarchy.available_levels.lower_bound = Some(levels.lower_bound);
            hierarchy.available_levels.upper_bound = Some(levels.upper_bound);
            hierarchy
        })
    }

    /// Returns whether the cut changed.
    pub fn drill_down(&self, dimension: &str, trigger_level: u32, parent_id: &str) -> bool {
        let partial = self
            .description
            .hierarchies
            .get(dimension)
            .and_then(|hierarchy| hierarchy.drill_down_cut(trigger_level, parent_id));
        match partial {
            Some(partial) => {
                log::info!(
                    target: "dataset",
                    "drill down on {} from level {} into {}",
                    dimension,
                    trigger_level,
                    parent_id
                );
                self.add_cut(&partial);
                true
            }
            None => false,
        }
    }

    /// Returns whether the cut changed.
    pub fn drill_up(&self, dimension: &str, trigger_level: u32) -> bool {
        let partial = self
            .description
            .hierarchies
            .get(dimension)
            .and_then(|hierarchy| hierarchy.drill_up_cut(trigger_level));
        match partial {
            Some(partial) => {
                log::info!(
                    target: "dataset",
                    "drill up on {} to level {}",
                    dimension,
                    trigger_level
                );
                self.add_cut(&partial);
                true
            }
            None => false,
        }
    }

    fn notify(&self, f: impl Fn(&dyn CutListener)) {
        let listeners: Vec<_> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            f(listener.as_ref());
        }
    }
}
