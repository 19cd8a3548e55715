use crate::element::kind::ElementKind;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for StyleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for StyleValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for StyleValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

fn default_table() -> HashMap<String, StyleValue> {
    [
        ("color", StyleValue::from("#4c72b0")),
        ("highlight", "#dd8452".into()),
        ("background", "#ffffff".into()),
        ("font-size", 12.0.into()),
        ("bar.color", "#4c72b0".into()),
        ("bubble.color", "#55a868".into()),
        ("line.color", "#c44e52".into()),
        ("line.stroke-width", 2.0.into()),
        ("geo.color", "#8172b3".into()),
        ("table.color", "#333333".into()),
        ("navigation.color", "#937860".into()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

/// Style lookups for one visualisation. Every instance owns its table, so
/// overrides never leak between visualisations.
#[derive(Debug, Clone, PartialEq)]
pub struct Styles {
    table: HashMap<String, StyleValue>,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            table: default_table(),
        }
    }
}

impl Styles {
    pub fn new(overrides: impl IntoIterator<Item = (String, StyleValue)>) -> Self {
        let mut styles = Self::default();
        styles.table.extend(overrides);
        styles
    }

    /// `"{kind}.{name}"` wins over plain `name` when an element kind is given.
    pub fn get_style(&self, name: &str, kind: Option<ElementKind>) -> Option<&StyleValue> {
        kind.and_then(|kind| self.table.get(&format!("{kind}.{name}")))
            .or_else(|| self.table.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_prefers_element_kind() {
        let styles = Styles::default();
        assert_eq!(
            styles.get_style("color", Some(ElementKind::Line)),
            Some(&StyleValue::from("#c44e52"))
        );
        assert_eq!(
            styles.get_style("font-size", Some(ElementKind::Line)),
            Some(&StyleValue::Number(12.0))
        );
        assert_eq!(styles.get_style("missing", None), None);
    }

    #[test]
    fn overrides_stay_per_instance() {
        let custom = Styles::new([("bar.color".to_string(), StyleValue::from("red"))]);
        let plain = Styles::default();
        assert_eq!(
            custom.get_style("color", Some(ElementKind::Bar)),
            Some(&StyleValue::from("red"))
        );
        assert_eq!(
            plain.get_style("color", Some(ElementKind::Bar)),
            Some(&StyleValue::from("#4c72b0"))
        );
    }
}
