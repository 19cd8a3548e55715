use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// What a click on a value does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// Drill into hierarchical dimensions, otherwise toggle a cut.
    Drill,
    /// Toggle a cut on the clicked value.
    Filter,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Bar,
    Bubble,
    Line,
    Table,
    Geo,
    Navigation,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Bubble => "bubble",
            Self::Line => "line",
            Self::Table => "table",
            Self::Geo => "geo",
            Self::Navigation => "navigation",
        }
    }

    pub fn interaction(&self) -> Interaction {
        match self {
            Self::Bar | Self::Bubble | Self::Geo => Interaction::Drill,
            Self::Table | Self::Navigation => Interaction::Filter,
            Self::Line => Interaction::None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown element type '{0}'")]
pub struct UnknownKind(pub String);

/// Resolves the `type` discriminant of an element config.
impl FromStr for ElementKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bar" => Ok(Self::Bar),
            "bubble" => Ok(Self::Bubble),
            "line" => Ok(Self::Line),
            "table" => Ok(Self::Table),
            "geo" => Ok(Self::Geo),
            "navigation" => Ok(Self::Navigation),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_resolves_known_kinds() {
        for kind in [
            ElementKind::Bar,
            ElementKind::Bubble,
            ElementKind::Line,
            ElementKind::Table,
            ElementKind::Geo,
            ElementKind::Navigation,
        ] {
            assert_eq!(kind.as_str().parse::<ElementKind>(), Ok(kind));
        }
        assert_eq!(
            "pie".parse::<ElementKind>(),
            Err(UnknownKind("pie".to_string()))
        );
    }
}
