//! Table and partition deduplication
//!
//! Redundant extraction paths (federated sub-datasources, overlapping datasources in one
//! workbook) produce several tables with the same name. Tables in a name group merge when
//! their column-name sets are similar enough; whatever is left unmerged is renamed with a
//! numeric suffix. Partitions are then reduced to one winner per source relation.

use crate::models::table::unique_name;
use crate::models::{DataType, Partition, Relationship, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Default Jaccard similarity at which two tables merge
pub const DEFAULT_JACCARD_THRESHOLD: f64 = 0.7;

static RE_SOURCE_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["']([^"']+\.(?:xlsx|xlsm|xlsb|xls|csv|tsv|txt|json|parquet|hyper|tde))["']"#)
        .expect("Invalid regex")
});

static RE_SELECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bselect\b").expect("Invalid regex"));

/// Jaccard similarity of two name sets; two empty sets are identical
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Merges tables that were extracted more than once
#[derive(Debug, Clone)]
pub struct TableDeduplicator {
    threshold: f64,
}

impl Default for TableDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_JACCARD_THRESHOLD)
    }
}

struct Cluster {
    members: Vec<Table>,
    /// Source datasource of each member, parallel to `members`
    origins: Vec<usize>,
    names: HashSet<String>,
}

/// Final names of renamed tables, keyed by the datasource the table came from.
///
/// A renamed table keeps its old name in the relationships extracted alongside it; the
/// rename has to follow it there, and only there.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRenames {
    renames: HashMap<(usize, String), String>,
}

impl TableRenames {
    /// New name of `table_name` as seen by datasource `origin`
    pub fn get(&self, origin: usize, table_name: &str) -> Option<&str> {
        self.renames
            .get(&(origin, table_name.to_lowercase()))
            .map(String::as_str)
    }

    /// Point both endpoints of a relationship from datasource `origin` at renamed tables
    pub fn apply(&self, origin: usize, relationship: &mut Relationship) {
        if let Some(name) = self.get(origin, &relationship.from_table) {
            relationship.from_table = name.to_string();
        }
        if let Some(name) = self.get(origin, &relationship.to_table) {
            relationship.to_table = name.to_string();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }
}

impl TableDeduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Deduplicate tables. `relationship_tables` holds the exact table names referenced by
    /// relationships; a member carrying one of them is preferred as the merge base.
    ///
    /// Output names are unique (case-insensitive) and empty tables are dropped.
    pub fn deduplicate(
        &self,
        tables: Vec<Table>,
        relationship_tables: &HashSet<String>,
    ) -> Vec<Table> {
        let sourced = tables.into_iter().map(|t| (0, t)).collect();
        self.deduplicate_sourced(sourced, relationship_tables).0
    }

    /// Like [`TableDeduplicator::deduplicate`] for tables tagged with the index of the
    /// datasource they were mapped from. Also returns the renames each datasource sees.
    pub fn deduplicate_sourced(
        &self,
        tables: Vec<(usize, Table)>,
        relationship_tables: &HashSet<String>,
    ) -> (Vec<Table>, TableRenames) {
        let mut renames = TableRenames::default();
        if tables.is_empty() {
            return (Vec::new(), renames);
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<(usize, Table)>> = HashMap::new();
        for (origin, table) in tables {
            let key = table.source_name.to_lowercase();
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push((origin, table));
        }

        let mut taken: HashSet<String> = order.iter().cloned().collect();
        let mut result = Vec::new();

        for key in order {
            let Some(members) = groups.remove(&key) else {
                continue;
            };
            let clusters = self.cluster(members);
            let cluster_count = clusters.len();

            for (index, cluster) in clusters.into_iter().enumerate() {
                let member_count = cluster.members.len();
                let mut table = merge_cluster(cluster.members, relationship_tables);
                if member_count > 1 {
                    info!(
                        "Merged {} tables named '{}' into one",
                        member_count, table.source_name
                    );
                }
                if index > 0 {
                    let renamed = unique_name(&table.source_name, &taken);
                    info!(
                        "Renamed dissimilar table '{}' to '{}' ({} clusters)",
                        table.source_name, renamed, cluster_count
                    );
                    taken.insert(renamed.to_lowercase());
                    for origin in cluster.origins {
                        renames
                            .renames
                            .insert((origin, key.clone()), renamed.clone());
                    }
                    table.source_name = renamed;
                }
                table.partitions = deduplicate_partitions(std::mem::take(&mut table.partitions));
                result.push(table);
            }
        }

        result.retain(|t| {
            if t.is_empty() {
                debug!("Discarding empty table '{}'", t.source_name);
                false
            } else {
                true
            }
        });
        (result, renames)
    }

    /// Greedy clustering in input order: a member joins the first cluster whose combined
    /// column set it is similar enough to.
    fn cluster(&self, members: Vec<(usize, Table)>) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = Vec::new();
        for (origin, table) in members {
            let names = table.column_name_set();
            match clusters
                .iter_mut()
                .find(|c| jaccard(&c.names, &names) >= self.threshold)
            {
                Some(cluster) => {
                    cluster.names.extend(names);
                    cluster.members.push(table);
                    cluster.origins.push(origin);
                }
                None => clusters.push(Cluster {
                    members: vec![table],
                    origins: vec![origin],
                    names,
                }),
            }
        }
        clusters
    }
}

/// Merge one cluster into its base member
fn merge_cluster(mut members: Vec<Table>, relationship_tables: &HashSet<String>) -> Table {
    let base_index = members
        .iter()
        .position(|t| relationship_tables.contains(&t.source_name))
        .unwrap_or_else(|| heaviest(&members));
    let mut base = members.remove(base_index);

    for other in members {
        for column in other.columns {
            match base.columns.iter_mut().find(|c| c.key() == column.key()) {
                Some(existing) => {
                    if existing.datatype == DataType::String && column.datatype != DataType::String {
                        debug!(
                            "Column '{}.{}' upgraded from string to {}",
                            base.source_name, existing.source_name, column.datatype
                        );
                        existing.datatype = column.datatype;
                        existing.summarize_by = column.summarize_by;
                    }
                }
                None => base.add_column(column),
            }
        }
        for measure in other.measures {
            if !base.member_names().contains(&measure.key()) {
                base.measures.push(measure);
            }
        }
        for hierarchy in other.hierarchies {
            if !base.hierarchies.iter().any(|h| h.name == hierarchy.name) {
                base.hierarchies.push(hierarchy);
            }
        }
        base.partitions.extend(other.partitions);
        if base.description.is_none() {
            base.description = other.description;
        }
    }
    base
}

/// Index of the member with the most columns plus measures (first on ties)
fn heaviest(members: &[Table]) -> usize {
    let mut best = 0;
    for (index, table) in members.iter().enumerate() {
        if table.weight() > members[best].weight() {
            best = index;
        }
    }
    best
}

/// Keep one partition per source relation
///
/// The group key is the relation key plus the source file path found in the expression,
/// or a snippet of the query text. Within a group the highest [`partition_score`] wins;
/// ties go to the smaller expression and then the smaller name, so the winner does not
/// depend on input order.
pub fn deduplicate_partitions(partitions: Vec<Partition>) -> Vec<Partition> {
    if partitions.len() < 2 {
        return partitions;
    }
    let mut order: Vec<String> = Vec::new();
    let mut winners: HashMap<String, Partition> = HashMap::new();

    for partition in partitions {
        let key = partition_group_key(&partition);
        match winners.get(&key) {
            Some(current) if compare_partitions(&partition, current) != Ordering::Greater => {
                debug!("Dropping duplicate partition '{}'", partition.name);
            }
            Some(_) => {
                winners.insert(key, partition);
            }
            None => {
                order.push(key.clone());
                winners.insert(key, partition);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| winners.remove(&key))
        .collect()
}

fn partition_group_key(partition: &Partition) -> String {
    let source = RE_SOURCE_FILE
        .captures(&partition.expression)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .or_else(|| query_snippet(&partition.expression))
        .unwrap_or_default();
    format!("{}#{}", partition.metadata.relation_key, source)
}

/// First 50 characters after `select`, whitespace collapsed and lower-cased
fn query_snippet(expression: &str) -> Option<String> {
    let found = RE_SELECT.find(expression)?;
    let rest = &expression[found.end()..];
    let snippet: String = rest
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(50)
        .collect();
    Some(snippet.to_lowercase())
}

/// Preference score of a partition within its group
pub fn partition_score(partition: &Partition) -> f64 {
    let description = partition.description.as_deref().unwrap_or("");
    let mut score = partition.metadata.field_count() as f64;
    if partition.metadata.has_query {
        score += 10.0;
    }
    score += (partition.expression.len() as f64 / 100.0).min(5.0);
    if !description.is_empty() {
        score += 2.0;
        if description.to_lowercase().contains("query") {
            score += 3.0;
        }
    }
    score
}

/// Greater means preferred. Total over every partition field, so only identical
/// partitions compare equal.
fn compare_partitions(a: &Partition, b: &Partition) -> Ordering {
    let (ma, mb) = (&a.metadata, &b.metadata);
    partition_score(a)
        .total_cmp(&partition_score(b))
        .then_with(|| b.expression.cmp(&a.expression))
        .then_with(|| b.name.cmp(&a.name))
        .then_with(|| b.description.cmp(&a.description))
        .then_with(|| mb.relation_key.cmp(&ma.relation_key))
        .then_with(|| mb.connection_class.cmp(&ma.connection_class))
        .then_with(|| mb.server.cmp(&ma.server))
        .then_with(|| mb.database.cmp(&ma.database))
        .then_with(|| mb.schema.cmp(&ma.schema))
        .then_with(|| mb.has_query.cmp(&ma.has_query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, Measure, PartitionMetadata};

    fn table(name: &str, columns: &[&str]) -> Table {
        let mut t = Table::new(name.to_string());
        for c in columns {
            t.add_column(Column::new(c.to_string(), DataType::String));
        }
        t
    }

    fn partition(name: &str, key: &str, expression: &str) -> Partition {
        Partition::new(
            name.to_string(),
            expression.to_string(),
            PartitionMetadata {
                relation_key: key.to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn jaccard_boundaries() {
        let set = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<HashSet<_>>();
        assert_eq!(jaccard(&set(&["a", "b", "c"]), &set(&["a", "b", "d"])), 0.5);
        assert_eq!(jaccard(&set(&["a", "b", "c"]), &set(&["a", "b", "c", "d"])), 0.75);
        assert_eq!(jaccard(&set(&[]), &set(&[])), 1.0);
    }

    #[test]
    fn similar_tables_merge() {
        let dedup = TableDeduplicator::default();
        let out = dedup.deduplicate(
            vec![table("Orders", &["A", "B", "C"]), table("orders", &["a", "b", "c", "d"])],
            &HashSet::new(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_name, "orders");
        assert_eq!(out[0].columns.len(), 4);
    }

    #[test]
    fn dissimilar_tables_are_renamed() {
        let dedup = TableDeduplicator::default();
        let out = dedup.deduplicate(
            vec![table("Orders", &["A", "B", "C"]), table("Orders", &["A", "B", "D"])],
            &HashSet::new(),
        );
        let names: Vec<_> = out.iter().map(|t| t.source_name.as_str()).collect();
        assert_eq!(names, vec!["Orders", "Orders_1"]);
    }

    #[test]
    fn rename_avoids_existing_suffix() {
        let dedup = TableDeduplicator::default();
        let out = dedup.deduplicate(
            vec![
                table("Orders", &["A"]),
                table("Orders_1", &["Z"]),
                table("Orders", &["B"]),
            ],
            &HashSet::new(),
        );
        let names: Vec<_> = out.iter().map(|t| t.source_name.as_str()).collect();
        assert_eq!(names, vec!["Orders", "Orders_2", "Orders_1"]);
    }

    #[test]
    fn relationship_member_is_the_base() {
        let mut typed = table("orders", &["id"]);
        typed.columns[0].datatype = DataType::Int64;
        let plain = table("Orders", &["ID", "Amount", "Date"]);
        let related: HashSet<String> = ["orders".to_string()].into_iter().collect();

        let out = TableDeduplicator::new(0.3).deduplicate(vec![plain, typed], &related);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_name, "orders");
        assert_eq!(out[0].columns[0].datatype, DataType::Int64);
        assert_eq!(out[0].columns.len(), 3);
    }

    #[test]
    fn non_string_type_wins_on_merge() {
        let base = table("T", &["Amount", "Id", "Name"]);
        let mut other = table("T", &["Amount"]);
        other.columns[0].datatype = DataType::Double;
        other.add_measure(Measure::new(
            "Total".to_string(),
            "SUM([Amount])".to_string(),
            "Calculation_1".to_string(),
        ));

        let out = TableDeduplicator::new(0.3).deduplicate(vec![base, other], &HashSet::new());
        assert_eq!(out[0].columns[0].datatype, DataType::Double);
        assert_eq!(out[0].measures.len(), 1);
    }

    #[test]
    fn empty_tables_are_dropped() {
        let out = TableDeduplicator::default()
            .deduplicate(vec![table("Empty", &[]), table("Full", &["a"])], &HashSet::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_name, "Full");
        assert!(TableDeduplicator::default().deduplicate(vec![], &HashSet::new()).is_empty());
    }

    #[test]
    fn partition_winner_is_permutation_stable() {
        let mut described = partition("p2", "k", "let Source = Sql.Database(\"s\", \"d\") in Source");
        described.description = Some("Custom SQL query partition".to_string());
        let a = partition("p1", "k", "let Source = Sql.Database(\"s\", \"d\") in Source");
        let b = partition("p3", "k", "let Source = Sql.Database(\"s\", \"d\") in Source");

        let forward = deduplicate_partitions(vec![a.clone(), described.clone(), b.clone()]);
        let backward = deduplicate_partitions(vec![b.clone(), described.clone(), a.clone()]);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].name, "p2");
        assert_eq!(forward, backward);

        let tie_forward = deduplicate_partitions(vec![a.clone(), b.clone()]);
        let tie_backward = deduplicate_partitions(vec![b, a]);
        assert_eq!(tie_forward[0].name, "p1");
        assert_eq!(tie_forward, tie_backward);
    }

    #[test]
    fn renames_are_scoped_to_their_datasource() {
        let sourced = vec![
            (0, table("Orders", &["CustA", "X1", "X2"])),
            (1, table("Orders", &["CustB", "Y1", "Y2"])),
            (2, table("orders", &["CustA", "X1", "X2"])),
        ];
        let (out, renames) = TableDeduplicator::default().deduplicate_sourced(sourced, &HashSet::new());

        let names: Vec<&str> = out.iter().map(|t| t.source_name.as_str()).collect();
        assert_eq!(names, vec!["Orders", "Orders_1"]);
        assert_eq!(renames.len(), 1);
        assert_eq!(renames.get(1, "ORDERS"), Some("Orders_1"));
        assert_eq!(renames.get(0, "Orders"), None);
        assert_eq!(renames.get(2, "Orders"), None);

        let mut rel = Relationship::new("Orders", "CustB", "Customers", "Id");
        renames.apply(1, &mut rel);
        assert_eq!(rel.from_table, "Orders_1");
        assert_eq!(rel.to_table, "Customers");
    }

    #[test]
    fn description_breaks_ties_in_any_order() {
        let expression = "Value.NativeQuery(db, \"SELECT * FROM orders\")";
        let mut sales = partition("Custom SQL Query", "k", expression);
        sales.description = Some("Custom SQL query partition for Sales".to_string());
        let mut ops = partition("Custom SQL Query", "k", expression);
        ops.description = Some("Custom SQL query partition for Ops".to_string());
        assert_eq!(partition_score(&sales), partition_score(&ops));

        let forward = deduplicate_partitions(vec![sales.clone(), ops.clone()]);
        let backward = deduplicate_partitions(vec![ops, sales]);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward, backward);
        assert_eq!(
            forward[0].description.as_deref(),
            Some("Custom SQL query partition for Ops")
        );
    }

    #[test]
    fn metadata_breaks_ties_in_any_order() {
        let mut pg = partition("p", "k", "Source");
        pg.metadata.connection_class = Some("postgres".to_string());
        let mut ms = partition("p", "k", "Source");
        ms.metadata.connection_class = Some("sqlserver".to_string());

        let forward = deduplicate_partitions(vec![pg.clone(), ms.clone()]);
        let backward = deduplicate_partitions(vec![ms, pg]);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].metadata.connection_class.as_deref(), Some("postgres"));
    }

    #[test]
    fn different_source_files_stay_apart() {
        let one = partition("a", "k", "Excel.Workbook(File.Contents(\"C:/data/a.xlsx\"))");
        let two = partition("b", "k", "Excel.Workbook(File.Contents(\"C:/data/b.xlsx\"))");
        assert_eq!(deduplicate_partitions(vec![one, two]).len(), 2);
    }

    #[test]
    fn query_snippets_split_groups() {
        let one = partition("a", "k", "Value.NativeQuery(db, \"SELECT a FROM t\")");
        let two = partition("b", "k", "Value.NativeQuery(db, \"SELECT b FROM t\")");
        let three = partition("c", "k", "Value.NativeQuery(db, \"select  a from t\")");
        let out = deduplicate_partitions(vec![one, two, three]);
        assert_eq!(out.len(), 2);
    }
}
