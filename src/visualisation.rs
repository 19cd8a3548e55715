use crate::{
    connection::PoolError,
    dataset::{cut::PartialCut, CutListener, Dataset},
    element::{
        CutIntent, Element, ElementError, ElementKind, ElementListener, ElementSettings,
        ResolvedElement,
    },
    style::{StyleValue, Styles},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{sync::Notify, time::error::Elapsed};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualisationConfig {
    #[serde(default)]
    pub elements: Vec<ElementSettings>,
    /// Merged over the default style table.
    #[serde(default)]
    pub styles: HashMap<String, StyleValue>,
}

/// Elements sharing one dataset and one style table.
pub struct Visualisation {
    me: Weak<Visualisation>,
    dataset: Arc<Dataset>,
    styles: Styles,
    elements: parking_lot::RwLock<Vec<Arc<Element>>>,
    ready: Notify,
    /// Unset while `new` is still creating elements.
    built: AtomicBool,
}

impl Visualisation {
    pub fn new(
        config: VisualisationConfig,
        dataset: Arc<Dataset>,
    ) -> Result<Arc<Self>, ElementError> {
        let visualisation = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            dataset,
            styles: Styles::new(config.styles),
            elements: Default::default(),
            ready: Notify::new(),
            built: AtomicBool::new(false),
        });
        let cut_listener = visualisation.me.clone() as Weak<dyn CutListener>;
        visualisation.dataset.subscribe(cut_listener);

        let mut elements = Vec::with_capacity(config.elements.len());
        for (index, settings) in config.elements.into_iter().enumerate() {
            let dataset = Arc::clone(&visualisation.dataset);
            let listener = visualisation.me.clone() as Weak<dyn ElementListener>;
            match Element::new(index, settings, dataset, listener) {
                Ok(element) => elements.push(element),
                Err(err) => {
                    log::error!(target: "visualisation", "element {} rejected: {}", index, err);
                    for element in &elements {
                        element.remove_connections()?;
                    }
                    return Err(err);
                }
            }
        }
        log::info!(
            target: "visualisation",
            "visualisation of dataset {} built with {} elements",
            visualisation.dataset.id(),
            elements.len()
        );
        *visualisation.elements.write() = elements;
        visualisation.built.store(true, Ordering::SeqCst);
        visualisation.ready.notify_waiters();
        Ok(visualisation)
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn styles(&self) -> &Styles {
        &self.styles
    }

    pub fn get_style(&self, name: &str, kind: Option<ElementKind>) -> Option<&StyleValue> {
        self.styles.get_style(name, kind)
    }

    pub fn elements(&self) -> Vec<Arc<Element>> {
        self.elements.read().clone()
    }

    pub fn element(&self, index: usize) -> Option<Arc<Element>> {
        self.elements.read().get(index).cloned()
    }

    pub fn add_cut(&self, partial: &PartialCut) {
        self.dataset.add_cut(partial);
    }

    pub fn remove_cut<S: AsRef<str>>(&self, keys: &[S]) {
        self.dataset.remove_cut(keys);
    }

    pub fn drill_down(&self, dimension: &str, trigger_level: u32, parent_id: &str) -> bool {
        self.dataset.drill_down(dimension, trigger_level, parent_id)
    }

    pub fn drill_up(&self, dimension: &str, trigger_level: u32) -> bool {
        self.dataset.drill_up(dimension, trigger_level)
    }

    /// Applies what a click on an element value asks for and returns it.
    pub fn select(
        &self,
        element_index: usize,
        dimension_index: usize,
        value_index: usize,
    ) -> Option<CutIntent> {
        let intent = self
            .element(element_index)?
            .select(dimension_index, value_index)?;
        log::debug!(target: "visualisation", "element {} selected {:?}", element_index, intent);
        match &intent {
            CutIntent::Add(partial) => self.dataset.add_cut(partial),
            CutIntent::Remove(keys) => self.dataset.remove_cut(keys),
            CutIntent::DrillDown {
                dimension,
                trigger_level,
                parent_id,
            } => {
                let level = *trigger_level;
                self.dataset.drill_down(dimension, level, parent_id);
            }
        }
        Some(intent)
    }

    pub fn is_ready(&self) -> bool {
        self.built.load(Ordering::SeqCst) && self.elements.read().iter().all(|e| e.is_ready())
    }

    /// Waits until every element is ready. Failed fetches are not retried,
    /// so without a timeout this may wait forever.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), Elapsed> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.ready.notified();
                if self.is_ready() {
                    return;
                }
                notified.await;
            }
        })
        .await
    }

    /// Snapshots of the displayed elements, or `None` while any element is
    /// still loading.
    pub fn resolve(&self) -> Option<Vec<ResolvedElement>> {
        if !self.is_ready() {
            return None;
        }
        self.elements()
            .iter()
            .filter(|element| element.settings().display)
            .map(|element| element.resolve(&self.styles))
            .collect()
    }

    /// Releases the connections of every element.
    pub fn close(&self) -> Result<(), PoolError> {
        for element in self.elements.read().iter() {
            element.remove_connections()?;
        }
        log::info!(
            target: "visualisation",
            "visualisation of dataset {} closed",
            self.dataset.id()
        );
        Ok(())
    }
}

impl CutListener for Visualisation {
    fn on_cut_added(&self, partial: &PartialCut) {
        log::debug!(target: "visualisation", "cut added: {:?}", partial);
        self.ready.notify_waiters();
    }

    fn on_cut_removed(&self, keys: &[String]) {
        log::debug!(target: "visualisation", "cut removed: {:?}", keys);
        self.ready.notify_waiters();
    }
}

impl ElementListener for Visualisation {
    fn on_ready(&self, element: &Element) {
        log::debug!(target: "visualisation", "element {} ready", element.index());
        if self.is_ready() {
            log::info!(target: "visualisation", "all elements ready");
        }
        self.ready.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::{cut::Cut, DatasetDescription},
        settings::ConnectionSettings,
        tests::mock_fetcher::MockFetcher,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const REGION_OBS: &str = "api/datasets/ds/observations/region";
    const REGION_DIM: &str = "api/datasets/ds/dimensions/region";
    const YEAR_OBS: &str = "api/datasets/ds/observations/year";
    const WAIT: Duration = Duration::from_secs(10);

    fn fetcher(gated: bool) -> Arc<MockFetcher> {
        let responses = [
            (
                REGION_OBS,
                json!([{"id": "north", "total": 3}, {"id": "south", "total": 1}]),
            ),
            (
                REGION_DIM,
                json!([{"id": "north", "label": "North"}, {"id": "south", "label": "South"}]),
            ),
            (YEAR_OBS, json!([{"id": 2020, "total": 4}])),
        ];
        Arc::new(if gated {
            MockFetcher::gated(responses)
        } else {
            MockFetcher::new(responses)
        })
    }

    fn dataset(fetcher: Arc<MockFetcher>) -> Arc<Dataset> {
        let description: DatasetDescription = serde_json::from_value(json!({
            "id": "ds",
            "fields": [
                {"id": "region", "label": "Region"},
                {"id": "year", "type": "date"}
            ]
        }))
        .unwrap();
        Arc::new(Dataset::new(description, fetcher, &ConnectionSettings::default()))
    }

    fn config() -> VisualisationConfig {
        serde_json::from_value(json!({
            "elements": [
                {"type": "table", "dimensions": [{"field": "region"}], "measure": "amount"},
                {"type": "line", "dimensions": [{"field": "year"}], "measure": "amount"},
                {"type": "bar", "display": false, "dimensions": [{"field": "region"}]}
            ],
            "styles": {"line.color": "black"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn builds_waits_and_resolves() {
        let dataset = dataset(fetcher(false));
        let visualisation = Visualisation::new(config(), dataset.clone()).unwrap();
        assert_eq!(visualisation.elements().len(), 3);
        assert_eq!(dataset.pool().len(), 3);

        visualisation.wait_until_ready(WAIT).await.unwrap();
        let resolved = visualisation.resolve().unwrap();
        assert_eq!(resolved.len(), 2, "hidden elements are not resolved");
        assert_eq!(resolved[0].series[0].rows[0].label, "North");
        assert_eq!(resolved[1].series[0].rows[0].label, "2020");
        assert_eq!(resolved[1].color, Some(StyleValue::from("black")));
    }

    #[tokio::test]
    async fn wait_times_out_until_every_element_loaded() {
        let fetcher = fetcher(true);
        let dataset = dataset(fetcher.clone());
        let visualisation = Visualisation::new(config(), dataset).unwrap();
        fetcher.wait_pending(3).await;

        fetcher.release(REGION_OBS);
        fetcher.release(REGION_DIM);
        assert!(visualisation
            .wait_until_ready(Duration::from_millis(50))
            .await
            .is_err());
        assert!(!visualisation.is_ready());
        assert_eq!(visualisation.resolve(), None);

        fetcher.release(YEAR_OBS);
        visualisation.wait_until_ready(WAIT).await.unwrap();
        assert!(visualisation.is_ready());
    }

    #[tokio::test]
    async fn select_relays_cut_intents() {
        let fetcher = fetcher(false);
        let dataset = dataset(fetcher.clone());
        let visualisation = Visualisation::new(config(), dataset.clone()).unwrap();
        visualisation.wait_until_ready(WAIT).await.unwrap();

        let intent = visualisation.select(0, 0, 1);
        assert_eq!(
            intent,
            Some(CutIntent::Add(PartialCut::new().set("region", "south")))
        );
        assert!(dataset.has_cut_id("region", "south"));
        fetcher.wait_requests(4).await;
        let year_requests = fetcher.requests_to(YEAR_OBS);
        assert_eq!(year_requests.last().unwrap().param("region"), Some("south"));

        visualisation.select(0, 0, 1);
        assert_eq!(dataset.get_cut(), Cut::default());
        assert_eq!(
            visualisation.select(1, 0, 0),
            None,
            "line charts are passive"
        );
        assert_eq!(visualisation.select(7, 0, 0), None);
    }

    #[tokio::test]
    async fn close_releases_every_connection() {
        let dataset = dataset(fetcher(false));
        let visualisation = Visualisation::new(config(), dataset.clone()).unwrap();
        visualisation.close().unwrap();
        assert!(dataset.pool().is_empty());
    }

    #[tokio::test]
    async fn rejected_element_releases_the_others() {
        let dataset = dataset(fetcher(false));
        let mut config = config();
        let radar = serde_json::from_value(json!({"type": "radar"})).unwrap();
        config.elements.push(radar);
        let err = Visualisation::new(config, dataset.clone()).err().unwrap();
        assert!(matches!(err, ElementError::UnknownKind(_)), "{err}");
        assert!(dataset.pool().is_empty());
    }

    #[tokio::test]
    async fn styles_are_per_visualisation() {
        let dataset = dataset(fetcher(false));
        let custom = Visualisation::new(config(), dataset.clone()).unwrap();
        let plain = Visualisation::new(VisualisationConfig::default(), dataset).unwrap();
        assert_eq!(
            custom.get_style("color", Some(ElementKind::Line)),
            Some(&StyleValue::from("black"))
        );
        assert_eq!(
            plain.get_style("color", Some(ElementKind::Line)),
            Some(&StyleValue::from("#c44e52"))
        );
        assert!(plain.is_ready(), "no elements, nothing to wait for");
    }

    #[tokio::test]
    async fn readiness_covers_every_element_once_built() {
        let fetcher = fetcher(true);
        let dataset = dataset(fetcher.clone());
        let config: VisualisationConfig = serde_json::from_value(json!({
            "elements": [
                {"type": "bar", "display": false, "dimensions": [{"field": "region"}]},
                {"type": "line", "dimensions": [{"field": "year"}]}
            ]
        }))
        .unwrap();
        let first = Visualisation::new(config.clone(), dataset.clone()).unwrap();
        assert!(first.element(0).unwrap().is_ready());
        assert!(!first.is_ready());

        fetcher.wait_pending(1).await;
        fetcher.release(YEAR_OBS);
        first.wait_until_ready(WAIT).await.unwrap();

        // every element joins loaded connections and is ready while building
        let second = Visualisation::new(config, dataset).unwrap();
        assert!(second.is_ready());
        second.wait_until_ready(WAIT).await.unwrap();
    }
}
