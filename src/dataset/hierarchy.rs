use super::cut::{Cut, PartialCut};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableLevels {
    #[serde(default)]
    pub lower_bound: Option<u32>,
    #[serde(default)]
    pub upper_bound: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelBounds {
    pub lower_bound: u32,
    pub upper_bound: u32,
}

/// Drill metadata of a hierarchical dimension.
///
/// `ancestor_fields` is ordered top-down: with `n` ancestors the field at
/// index `i` holds the values shown at level `n + 1 - i`, and level 1 is
/// the dimension itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub ancestor_fields: Vec<String>,
    pub level_field: String,
    #[serde(default)]
    pub available_levels: AvailableLevels,
}

impl Hierarchy {
    pub fn new(ancestor_fields: &[&str], level_field: &str) -> Self {
        Self {
            ancestor_fields: ancestor_fields.iter().map(|f| f.to_string()).collect(),
            level_field: level_field.to_string(),
            available_levels: AvailableLevels::default(),
        }
    }

    pub fn with_levels(mut self, lower_bound: u32, upper_bound: u32) -> Self {
        self.available_levels = AvailableLevels {
            lower_bound: Some(lower_bound),
            upper_bound: Some(upper_bound),
        };
        self
    }

    /// Missing bounds default to `1..=ancestor_fields.len()`.
    pub fn levels(&self) -> LevelBounds {
        LevelBounds {
            lower_bound: self.available_levels.lower_bound.unwrap_or(1),
            upper_bound: self
                .available_levels
                .upper_bound
                .unwrap_or(self.ancestor_fields.len() as u32),
        }
    }

    /// Level the cut currently shows, if the level field is cut to a number.
    pub fn current_level(&self, cut: &Cut) -> Option<u32> {
        cut.get(&self.level_field)?.as_id()?.parse().ok()
    }

    fn ancestor_index(&self, level: u32) -> Option<usize> {
        let index = (self.ancestor_fields.len() + 1).checked_sub(level as usize)?;
        (index < self.ancestor_fields.len()).then_some(index)
    }

    /// Uncuts every ancestor holding values of `level` or below.
    fn reset_ancestors(&self, level: u32) -> PartialCut {
        let first = (self.ancestor_fields.len() + 1).saturating_sub(level as usize);
        self.ancestor_fields
            .iter()
            .skip(first)
            .fold(PartialCut::new(), |partial, field| partial.unset(field))
    }

    /// Cut change moving from `trigger_level` one level down, constrained
    /// to children of `parent_id`. `None` at the lowest level.
    pub fn drill_down_cut(&self, trigger_level: u32, parent_id: &str) -> Option<PartialCut> {
        if trigger_level <= self.levels().lower_bound {
            return None;
        }
        let mut partial = self
            .reset_ancestors(trigger_level)
            .set(&self.level_field, (trigger_level - 1).to_string());
        if let Some(index) = self.ancestor_index(trigger_level) {
            partial = partial.set(&self.ancestor_fields[index], parent_id);
        }
        Some(partial)
    }

    /// Cut change moving back up to `trigger_level`. `None` above the
    /// highest level.
    pub fn drill_up_cut(&self, trigger_level: u32) -> Option<PartialCut> {
        if trigger_level > self.levels().upper_bound {
            return None;
        }
        Some(
            self.reset_ancestors(trigger_level)
                .set(&self.level_field, trigger_level.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_levels() {
        let hierarchy = Hierarchy::new(&["A", "B"], "L");
        assert_eq!(
            hierarchy.levels(),
            LevelBounds {
                lower_bound: 1,
                upper_bound: 2
            }
        );

        let partial: Hierarchy = serde_json::from_str(
            r#"{"ancestor_fields": ["A", "B", "C"], "level_field": "L",
                "available_levels": {"lower_bound": 2}}"#,
        )
        .unwrap();
        assert_eq!(
            partial.levels(),
            LevelBounds {
                lower_bound: 2,
                upper_bound: 3
            }
        );
    }

    #[test]
    fn drill_down_from_top() {
        let hierarchy = Hierarchy::new(&["A", "B"], "L").with_levels(1, 3);
        assert_eq!(
            hierarchy.drill_down_cut(3, "p1"),
            Some(PartialCut::new().set("L", "2").set("A", "p1").unset("B"))
        );
    }

    #[test]
    fn drill_down_keeps_higher_constraints() {
        let hierarchy = Hierarchy::new(&["A", "B"], "L").with_levels(1, 3);
        assert_eq!(
            hierarchy.drill_down_cut(2, "q"),
            Some(PartialCut::new().set("L", "1").set("B", "q"))
        );
        assert_eq!(
            hierarchy.drill_up_cut(2),
            Some(PartialCut::new().set("L", "2").unset("B"))
        );
    }

    #[test]
    fn bounds_make_drills_no_ops() {
        let hierarchy = Hierarchy::new(&["A", "B"], "L").with_levels(1, 3);
        assert_eq!(hierarchy.drill_down_cut(1, "x"), None);
        assert_eq!(hierarchy.drill_down_cut(0, "x"), None);
        assert_eq!(hierarchy.drill_up_cut(4), None);
    }

    #[test]
    fn current_level_reads_level_field() {
        let hierarchy = Hierarchy::new(&["A", "B"], "L");
        let cut: Cut = [("L", "2")].into_iter().collect();
        assert_eq!(hierarchy.current_level(&cut), Some(2));
        assert_eq!(hierarchy.current_level(&Cut::default()), None);
    }
}
