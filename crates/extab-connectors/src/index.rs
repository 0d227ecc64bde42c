//! Index set reconciliation between two versions of a table's index
//! definitions, and the storage plan derived from it.

use serde::{Deserialize, Serialize};
use tracing::info;

use extab_core::{IndexDefinition, TableSchema};

/// Definitions to drop and to add. Equivalent definitions present on both
/// sides appear in neither list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDelta {
    pub to_drop: Vec<IndexDefinition>,
    pub to_add: Vec<IndexDefinition>,
}

impl IndexDelta {
    pub fn is_empty(&self) -> bool {
        self.to_drop.is_empty() && self.to_add.is_empty()
    }
}

/// Per-definition diff of `old` against `new`, preserving input order.
pub fn reconcile(old: &[IndexDefinition], new: &[IndexDefinition]) -> IndexDelta {
    let to_drop = old
        .iter()
        .filter(|o| !new.iter().any(|n| n.is_equivalent(o)))
        .cloned()
        .collect();
    let to_add = new
        .iter()
        .filter(|n| !old.iter().any(|o| o.is_equivalent(n)))
        .cloned()
        .collect();
    IndexDelta { to_drop, to_add }
}

/// How index artifacts of a table are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLayout {
    /// One artifact per index instead of one shared artifact.
    pub separate: bool,
}

impl IndexLayout {
    pub fn of_schema(schema: &TableSchema) -> Self {
        Self {
            separate: schema.options.sepindex(),
        }
    }
}

/// Like [`reconcile`], but a layout change drops and re-adds everything.
pub fn reconcile_with_layout(
    old: &[IndexDefinition],
    old_layout: IndexLayout,
    new: &[IndexDefinition],
    new_layout: IndexLayout,
) -> IndexDelta {
    if old_layout != new_layout {
        return IndexDelta {
            to_drop: old.to_vec(),
            to_add: new.to_vec(),
        };
    }
    reconcile(old, new)
}

/// Pending index comparison recorded when an index-affecting DDL is
/// detected, applied when the table is unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCheck {
    pub old: Vec<IndexDefinition>,
    pub old_layout: IndexLayout,
    pub new: Vec<IndexDefinition>,
    pub new_layout: IndexLayout,
}

impl IndexCheck {
    pub fn between(old: &TableSchema, new: &TableSchema) -> Self {
        Self {
            old: old.index_definitions(),
            old_layout: IndexLayout::of_schema(old),
            new: new.index_definitions(),
            new_layout: IndexLayout::of_schema(new),
        }
    }
}

/// Which existing artifacts to remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropScope {
    Nothing,
    /// Every artifact of the table (layout change or shared artifact rebuild).
    All,
    Only(Vec<IndexDefinition>),
}

/// Storage operations to apply, drops first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPlan {
    pub drop: DropScope,
    /// Layout the dropped artifacts are stored in.
    pub drop_layout: IndexLayout,
    pub build: Vec<IndexDefinition>,
    pub build_layout: IndexLayout,
}

impl IndexPlan {
    pub fn is_empty(&self) -> bool {
        self.drop == DropScope::Nothing && self.build.is_empty()
    }
}

/// Derive the storage plan for a pending check.
///
/// With separate artifacts only the per-definition diff is touched. With a
/// shared artifact any change rebuilds it from the full new definition list.
pub fn plan_index_changes(check: &IndexCheck) -> IndexPlan {
    let delta = reconcile_with_layout(&check.old, check.old_layout, &check.new, check.new_layout);
    let plan = if check.old_layout != check.new_layout {
        IndexPlan {
            drop: DropScope::All,
            drop_layout: check.old_layout,
            build: check.new.clone(),
            build_layout: check.new_layout,
        }
    } else if check.new_layout.separate {
        IndexPlan {
            drop: if delta.to_drop.is_empty() {
                DropScope::Nothing
            } else {
                DropScope::Only(delta.to_drop)
            },
            drop_layout: check.old_layout,
            build: delta.to_add,
            build_layout: check.new_layout,
        }
    } else if delta.is_empty() {
        IndexPlan {
            drop: DropScope::Nothing,
            drop_layout: check.old_layout,
            build: Vec::new(),
            build_layout: check.new_layout,
        }
    } else {
        IndexPlan {
            drop: if check.old.is_empty() {
                DropScope::Nothing
            } else {
                DropScope::All
            },
            drop_layout: check.old_layout,
            build: check.new.clone(),
            build_layout: check.new_layout,
        }
    };
    info!(
        drop = ?plan.drop,
        build = plan.build.len(),
        separate = plan.build_layout.separate,
        "index plan computed"
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use extab_core::KeyPart;
    use proptest::prelude::*;

    fn idx(name: &str, unique: bool, cols: &[&str]) -> IndexDefinition {
        IndexDefinition::new(name, unique, cols.iter().map(|c| KeyPart::new(c)).collect())
    }

    fn sep(separate: bool) -> IndexLayout {
        IndexLayout { separate }
    }

    #[test]
    fn test_add_one_index() {
        let old = vec![idx("idx1", true, &["a", "b"])];
        let new = vec![idx("idx1", true, &["a", "b"]), idx("idx2", false, &["c"])];
        let delta = reconcile(&old, &new);
        assert!(delta.to_drop.is_empty());
        assert_eq!(delta.to_add, vec![idx("idx2", false, &["c"])]);
    }

    #[test]
    fn test_changed_definition_is_dropped_and_added() {
        let old = vec![idx("k", false, &["a"])];
        let new = vec![idx("K", true, &["a"])];
        let delta = reconcile(&old, &new);
        assert_eq!(delta.to_drop, old);
        assert_eq!(delta.to_add, new);
    }

    #[test]
    fn test_key_column_case_is_ignored() {
        let old = vec![idx("k", false, &["Col"])];
        let new = vec![idx("K", false, &["col"])];
        let delta = reconcile(&old, &new);
        assert!(delta.is_empty());
        assert!(plan_index_changes(&IndexCheck {
            old,
            old_layout: sep(false),
            new,
            new_layout: sep(false),
        })
        .is_empty());
    }

    #[test]
    fn test_empty_sides() {
        let s = vec![idx("a", false, &["x"]), idx("b", false, &["y"])];
        let delta = reconcile(&[], &s);
        assert_eq!(delta.to_add, s);
        assert!(delta.to_drop.is_empty());
        let delta = reconcile(&s, &[]);
        assert_eq!(delta.to_drop, s);
        assert!(delta.to_add.is_empty());
    }

    #[test]
    fn test_layout_change_rebuilds_everything() {
        let s = vec![idx("a", false, &["x"])];
        let delta = reconcile_with_layout(&s, sep(false), &s, sep(true));
        assert_eq!(delta.to_drop, s);
        assert_eq!(delta.to_add, s);

        let plan = plan_index_changes(&IndexCheck {
            old: s.clone(),
            old_layout: sep(false),
            new: s.clone(),
            new_layout: sep(true),
        });
        assert_eq!(plan.drop, DropScope::All);
        assert!(!plan.drop_layout.separate);
        assert_eq!(plan.build, s);
        assert!(plan.build_layout.separate);
    }

    #[test]
    fn test_separate_layout_touches_only_diff() {
        let keep = idx("keep", false, &["x"]);
        let gone = idx("gone", false, &["y"]);
        let added = idx("added", false, &["z"]);
        let plan = plan_index_changes(&IndexCheck {
            old: vec![keep.clone(), gone.clone()],
            old_layout: sep(true),
            new: vec![keep, added.clone()],
            new_layout: sep(true),
        });
        assert_eq!(plan.drop, DropScope::Only(vec![gone]));
        assert_eq!(plan.build, vec![added]);
    }

    #[test]
    fn test_shared_layout_rebuilds_when_anything_changed() {
        let keep = idx("keep", false, &["x"]);
        let added = idx("added", false, &["z"]);
        let plan = plan_index_changes(&IndexCheck {
            old: vec![keep.clone()],
            old_layout: sep(false),
            new: vec![keep.clone(), added.clone()],
            new_layout: sep(false),
        });
        assert_eq!(plan.drop, DropScope::All);
        assert_eq!(plan.build, vec![keep.clone(), added]);

        let unchanged = plan_index_changes(&IndexCheck {
            old: vec![keep.clone()],
            old_layout: sep(false),
            new: vec![keep],
            new_layout: sep(false),
        });
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_shared_layout_first_index_has_nothing_to_drop() {
        let plan = plan_index_changes(&IndexCheck {
            old: vec![],
            old_layout: sep(false),
            new: vec![idx("a", false, &["x"])],
            new_layout: sep(false),
        });
        assert_eq!(plan.drop, DropScope::Nothing);
        assert_eq!(plan.build.len(), 1);
    }

    fn arb_index() -> impl Strategy<Value = IndexDefinition> {
        (
            "[a-z]{1,6}",
            any::<bool>(),
            prop::collection::vec(("[a-z]{1,4}", 0u32..4), 1..4),
            any::<bool>(),
        )
            .prop_map(|(name, unique, parts, dynamic)| {
                let mut def = IndexDefinition::new(
                    &name,
                    unique,
                    parts
                        .into_iter()
                        .map(|(column, length)| KeyPart { column, length })
                        .collect(),
                );
                def.dynamic = dynamic;
                def
            })
    }

    proptest! {
        #[test]
        fn prop_reconcile_permutation_is_empty(
            (set, shuffled) in prop::collection::vec(arb_index(), 0..8)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let delta = reconcile(&set, &shuffled);
            prop_assert!(delta.to_drop.is_empty());
            prop_assert!(delta.to_add.is_empty());
        }

        #[test]
        fn prop_reconcile_from_empty(set in prop::collection::vec(arb_index(), 0..8)) {
            let delta = reconcile(&[], &set);
            prop_assert_eq!(&delta.to_add, &set);
            prop_assert!(delta.to_drop.is_empty());
            let delta = reconcile(&set, &[]);
            prop_assert_eq!(&delta.to_drop, &set);
            prop_assert!(delta.to_add.is_empty());
        }
    }
}
