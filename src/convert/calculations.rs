//! Calculation dependency resolution
//!
//! Translated formulas still refer to other calculations by internal identifier
//! (`[Calculation_123]`, optionally `'Table'[Calculation_123]`). The resolver substitutes
//! those references using the records it holds:
//!
//! - a record with a target name becomes `[Name]`, or `'Table'[Name]` when the reference
//!   was qualified or points into another table
//! - a converted record without a target name is inlined as `(formula)`
//! - anything else is left untouched
//!
//! Passes repeat until no reference remains, a pass changes nothing, or the depth
//! ceiling is reached. The visited set and depth live in an explicit
//! [`ResolutionState`] so termination does not depend on hidden defaults.

use super::translation::Dependency;
use crate::model::store::{CalculationStore, StoreError};
use crate::models::{CalculationKey, CalculationRecord, CalculationStatus};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

static RE_CALCULATION_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:'((?:[^']|'')+)')?\[(Calculation_\d+)\]").expect("Invalid regex")
});

/// Default ceiling on substitution passes
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Outcome of resolving one expression
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub expression: String,
    /// Substitution passes performed
    pub passes: usize,
    /// Internal identifiers still referenced by the result
    pub unresolved: Vec<String>,
    pub hit_depth_limit: bool,
}

/// Per-call bookkeeping, threaded through every pass
#[derive(Debug, Clone, Default)]
pub struct ResolutionState {
    /// Records already inlined in this call
    pub visited: HashSet<CalculationKey>,
    /// Passes performed so far
    pub depth: usize,
}

/// In-memory calculation table with explicit load/save
#[derive(Debug, Clone)]
pub struct CalculationResolver {
    records: BTreeMap<CalculationKey, CalculationRecord>,
    max_depth: usize,
}

impl Default for CalculationResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl CalculationResolver {
    pub fn new(max_depth: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            max_depth,
        }
    }

    /// Replace the in-memory records with the persisted ones
    pub fn load(&mut self, store: &dyn CalculationStore) -> Result<usize, StoreError> {
        self.records = store
            .load()?
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        debug!("Loaded {} calculation record(s)", self.records.len());
        Ok(self.records.len())
    }

    /// Persist every record, replacing the stored set
    pub fn save(&self, store: &dyn CalculationStore) -> Result<(), StoreError> {
        let records: Vec<CalculationRecord> = self.records.values().cloned().collect();
        store.save(&records)
    }

    /// Insert or replace a record
    pub fn upsert(&mut self, record: CalculationRecord) {
        self.records.insert(record.key(), record);
    }

    pub fn get(&self, key: &CalculationKey) -> Option<&CalculationRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &CalculationKey) -> Option<&mut CalculationRecord> {
        self.records.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &CalculationRecord> {
        self.records.values()
    }

    /// Record for an identifier, preferring the given table and falling back to the first
    /// table (in key order) that defines it
    pub fn find(&self, table_name: Option<&str>, tableau_name: &str) -> Option<&CalculationRecord> {
        if let Some(table) = table_name
            && let Some(record) = self.records.values().find(|r| {
                r.tableau_name == tableau_name && r.table_name.eq_ignore_ascii_case(table)
            })
        {
            return Some(record);
        }
        self.records
            .values()
            .find(|r| r.tableau_name == tableau_name)
    }

    /// A converted record with the same source formula, reusable without translating again
    pub fn converted_with_formula(&self, formula_source: &str) -> Option<&CalculationRecord> {
        self.records.values().find(|r| {
            r.status == CalculationStatus::Converted
                && r.formula_source == formula_source
                && !r.formula_target.is_empty()
        })
    }

    /// Every record as a dependency hint for the translation collaborator
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.records
            .values()
            .map(|r| Dependency {
                tableau_name: r.tableau_name.clone(),
                caption: r.caption.clone(),
                table_name: r.table_name.clone(),
            })
            .collect()
    }

    /// Resolve references in an expression evaluated in the context of `table_name`
    pub fn resolve(&self, table_name: &str, expression: &str) -> Resolution {
        let mut state = ResolutionState::default();
        self.resolve_with(table_name, expression, &mut state)
    }

    /// Resolve a record's translated formula. The record itself counts as visited so it
    /// is never inlined into its own body.
    pub fn resolve_record(&self, key: &CalculationKey) -> Option<Resolution> {
        let record = self.records.get(key)?;
        let mut state = ResolutionState::default();
        state.visited.insert(key.clone());
        Some(self.resolve_with(&record.table_name, &record.formula_target, &mut state))
    }

    /// Resolve with caller-provided state
    pub fn resolve_with(
        &self,
        table_name: &str,
        expression: &str,
        state: &mut ResolutionState,
    ) -> Resolution {
        let mut current = expression.to_string();
        let mut passes = 0;
        let mut hit_depth_limit = false;

        while RE_CALCULATION_REF.is_match(&current) {
            if state.depth >= self.max_depth {
                warn!(
                    "Calculation resolution in '{}' stopped at depth {}: {}",
                    table_name, self.max_depth, current
                );
                hit_depth_limit = true;
                break;
            }
            state.depth += 1;
            passes += 1;

            let next = self.substitute(table_name, &current, state);
            if next == current {
                debug!("Calculation resolution reached a fixed point after {} pass(es)", passes);
                break;
            }
            current = next;
        }

        let unresolved = RE_CALCULATION_REF
            .captures_iter(&current)
            .filter_map(|c| c.get(2).map(|m| m.as_str().to_string()))
            .collect();
        Resolution {
            expression: current,
            passes,
            unresolved,
            hit_depth_limit,
        }
    }

    /// One substitution pass over every reference
    fn substitute(&self, table_name: &str, expression: &str, state: &mut ResolutionState) -> String {
        RE_CALCULATION_REF
            .replace_all(expression, |caps: &Captures<'_>| {
                let original = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                let qualifier = caps.get(1).map(|m| m.as_str().replace("''", "'"));
                let Some(id) = caps.get(2).map(|m| m.as_str()) else {
                    return original.to_string();
                };
                let scope = qualifier.as_deref().unwrap_or(table_name);
                let Some(record) = self.find(Some(scope), id) else {
                    return original.to_string();
                };

                if !record.target_name.is_empty() {
                    let cross_table = !record.table_name.eq_ignore_ascii_case(table_name);
                    let column = record.target_name.replace(']', "]]");
                    return if qualifier.is_some() || cross_table {
                        format!("'{}'[{}]", record.table_name.replace('\'', "''"), column)
                    } else {
                        format!("[{}]", column)
                    };
                }
                if record.status == CalculationStatus::Converted
                    && !record.formula_target.is_empty()
                    && state.visited.insert(record.key())
                {
                    return format!("({})", record.formula_target);
                }
                original.to_string()
            })
            .into_owned()
    }
}

/// Internal identifiers referenced by an expression, in order of appearance
pub fn referenced_calculations(expression: &str) -> Vec<String> {
    RE_CALCULATION_REF
        .captures_iter(expression)
        .filter_map(|c| c.get(2).map(|m| m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::store::MemoryStore;

    fn converted(table: &str, id: &str, caption: &str, target: &str) -> CalculationRecord {
        let mut record = CalculationRecord::extracted(table, id, caption, "", false);
        record.mark_converted(target.to_string());
        record
    }

    #[test]
    fn named_references_become_column_refs() {
        let mut resolver = CalculationResolver::default();
        resolver.upsert(converted("Orders", "Calculation_1", "Margin", "[Sales] - [Cost]"));
        resolver.upsert(converted("Customers", "Calculation_2", "Tier", "IF(...)"));

        let r = resolver.resolve("Orders", "[Calculation_1] * 2 + [Calculation_2]");
        assert_eq!(r.expression, "[Margin] * 2 + 'Customers'[Tier]");
        assert!(r.unresolved.is_empty());
        assert!(!r.hit_depth_limit);
    }

    #[test]
    fn closing_brackets_in_names_are_escaped() {
        let mut resolver = CalculationResolver::default();
        resolver.upsert(converted("Orders", "Calculation_1", "Ratio [%]", "[A] / [B]"));
        resolver.upsert(converted("O'Brien", "Calculation_2", "Share]", "[C]"));

        let r = resolver.resolve("Orders", "[Calculation_1] + [Calculation_2]");
        assert_eq!(r.expression, "[Ratio [%]]] + 'O''Brien'[Share]]]");
        assert_eq!(resolver.resolve("Orders", &r.expression).expression, r.expression);
    }

    #[test]
    fn qualified_references_stay_qualified() {
        let mut resolver = CalculationResolver::default();
        resolver.upsert(converted("Orders", "Calculation_1", "Margin", "[Sales]"));
        let r = resolver.resolve("Orders", "SUM('Orders'[Calculation_1])");
        assert_eq!(r.expression, "SUM('Orders'[Margin])");
    }

    #[test]
    fn unknown_references_are_left_untouched() {
        let resolver = CalculationResolver::default();
        let r = resolver.resolve("Orders", "[Calculation_404] + 1");
        assert_eq!(r.expression, "[Calculation_404] + 1");
        assert_eq!(r.unresolved, vec!["Calculation_404".to_string()]);
        assert_eq!(r.passes, 1);
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut resolver = CalculationResolver::default();
        resolver.upsert(converted("Orders", "Calculation_1", "Margin", "[Sales]"));
        let once = resolver.resolve("Orders", "[Calculation_1] / 2").expression;
        let twice = resolver.resolve("Orders", &once).expression;
        assert_eq!(once, twice);
        assert_eq!(resolver.resolve("Orders", &once).passes, 0);
    }

    #[test]
    fn cycles_terminate_by_fixed_point() {
        let mut resolver = CalculationResolver::default();
        let mut a = converted("Orders", "Calculation_1", "", "[Calculation_2] + 1");
        a.target_name.clear();
        let mut b = converted("Orders", "Calculation_2", "", "[Calculation_1] * 2");
        b.target_name.clear();
        resolver.upsert(a);
        resolver.upsert(b);

        let r = resolver.resolve("Orders", "[Calculation_1]");
        assert_eq!(r.expression, "(([Calculation_1] * 2) + 1)");
        assert!(!r.hit_depth_limit);
        assert!(r.passes < DEFAULT_MAX_DEPTH);
        assert_eq!(r.unresolved, vec!["Calculation_1".to_string()]);
    }

    #[test]
    fn depth_ceiling_returns_partial_text() {
        let mut resolver = CalculationResolver::new(2);
        for i in 1..=5 {
            let mut record = converted(
                "T",
                &format!("Calculation_{}", i),
                "",
                &format!("[Calculation_{}] + {}", i + 1, i),
            );
            record.target_name.clear();
            resolver.upsert(record);
        }
        let r = resolver.resolve("T", "[Calculation_1]");
        assert!(r.hit_depth_limit);
        assert_eq!(r.passes, 2);
        assert_eq!(r.expression, "(([Calculation_3] + 2) + 1)");
    }

    #[test]
    fn resolve_record_never_inlines_itself() {
        let mut resolver = CalculationResolver::default();
        let mut a = converted("T", "Calculation_1", "", "[Calculation_1] + 1");
        a.target_name.clear();
        resolver.upsert(a);
        let r = resolver
            .resolve_record(&CalculationKey::new("T", "Calculation_1"))
            .unwrap();
        assert_eq!(r.expression, "[Calculation_1] + 1");
    }

    #[test]
    fn load_and_save_go_through_the_store() {
        let store = MemoryStore::with_records(vec![converted("T", "Calculation_7", "Seven", "7")]);
        let mut resolver = CalculationResolver::default();
        assert_eq!(resolver.load(&store).unwrap(), 1);
        resolver.upsert(converted("T", "Calculation_8", "Eight", "8"));
        resolver.save(&store).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
        assert!(resolver.converted_with_formula("").is_some());
    }

    #[test]
    fn finds_references_in_order() {
        assert_eq!(
            referenced_calculations("'A'[Calculation_2] + [Calculation_1]"),
            vec!["Calculation_2".to_string(), "Calculation_1".to_string()]
        );
    }
}
