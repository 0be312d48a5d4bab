//! MPTT bounds
//!
//! Trees linked by a many2one with `left`/`right` columns are numbered in
//! preorder: a node's interval contains the intervals of all its
//! descendants, so `child_of` becomes an interval containment join.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::OrmResult;
use crate::fields::Field;
use crate::model::Model;
use crate::query::Sql;
use crate::transaction::Transaction;

/// Preorder numbering of a forest given as `(id, parent)` pairs. Nodes whose
/// parent is missing are roots; nodes caught in a cycle are skipped.
pub(crate) fn number_tree(nodes: &[(i64, Option<i64>)]) -> Vec<(i64, i64, i64)> {
    let known: HashSet<i64> = nodes.iter().map(|(id, _)| *id).collect();
    let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut roots = Vec::new();
    for (id, parent) in nodes {
        match parent {
            Some(parent) if known.contains(parent) && parent != id => {
                children.entry(*parent).or_default().push(*id)
            }
            _ => roots.push(*id),
        }
    }

    let mut bounds = Vec::with_capacity(nodes.len());
    let mut visited = HashSet::new();
    let mut counter = 1;
    for root in roots {
        // (node, left, next child index)
        let mut stack: Vec<(i64, i64, usize)> = Vec::new();
        if visited.insert(root) {
            stack.push((root, counter, 0));
            counter += 1;
        }
        while let Some((node, left, next)) = stack.pop() {
            let child = children.get(&node).and_then(|c| c.get(next)).copied();
            match child {
                Some(child) => {
                    stack.push((node, left, next + 1));
                    if visited.insert(child) {
                        stack.push((child, counter, 0));
                        counter += 1;
                    }
                }
                None => {
                    bounds.push((node, left, counter));
                    counter += 1;
                }
            }
        }
    }
    bounds
}

/// Bounds differing from the stored ones; only those rows are rewritten
pub(crate) fn changed_bounds(
    stored: &HashMap<i64, (Option<i64>, Option<i64>)>,
    bounds: Vec<(i64, i64, i64)>,
) -> Vec<(i64, i64, i64)> {
    bounds
        .into_iter()
        .filter(|(id, l, r)| stored.get(id) != Some(&(Some(*l), Some(*r))))
        .collect()
}

impl Transaction {
    /// Renumber the `left`/`right` columns of the tree linked by `parent`
    pub(crate) async fn rebuild_tree(&mut self, model: &Model, parent: &Field) -> OrmResult<()> {
        let Some((left, right)) = parent.tree_columns() else {
            return Ok(());
        };
        let mut sql = Sql::new("SELECT \"id\", ");
        sql.push_ident(&parent.name)
            .push(", ")
            .push_ident(left)
            .push(", ")
            .push_ident(right)
            .push(" FROM ")
            .push_ident(&model.table)
            .push(" ORDER BY \"id\"");
        let rows = self.fetch_all(&sql).await?;
        let mut nodes = Vec::with_capacity(rows.len());
        let mut stored = HashMap::with_capacity(rows.len());
        for row in &rows {
            let Some(id) = row.get_opt_i64("id") else {
                continue;
            };
            nodes.push((id, row.get_opt_i64(&parent.name)));
            stored.insert(id, (row.get_opt_i64(left), row.get_opt_i64(right)));
        }

        // the whole forest is renumbered but only moved rows are written
        let bounds = changed_bounds(&stored, number_tree(&nodes));
        for (id, l, r) in &bounds {
            let mut update = Sql::new("UPDATE ");
            update
                .push_ident(&model.table)
                .push(" SET ")
                .push_ident(left)
                .push(" = ")
                .push_param(*l)
                .push(", ")
                .push_ident(right)
                .push(" = ")
                .push_param(*r)
                .push(" WHERE \"id\" = ")
                .push_param(*id);
            self.execute(&update).await?;
        }
        debug!("{}: moved {} nodes of {}", model.name, bounds.len(), parent.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preorder_intervals() {
        // 1 -> (2 -> 4), 3 ; 5 alone
        let nodes = [(1, None), (2, Some(1)), (3, Some(1)), (4, Some(2)), (5, None)];
        let mut bounds = number_tree(&nodes);
        bounds.sort();
        assert_eq!(
            bounds,
            vec![(1, 1, 8), (2, 2, 5), (3, 6, 7), (4, 3, 4), (5, 9, 10)]
        );
    }

    #[test]
    fn test_only_moved_nodes_are_rewritten() {
        let nodes = [(1, None), (2, Some(1)), (3, None)];
        let mut stored = HashMap::new();
        stored.insert(1, (Some(1), Some(4)));
        stored.insert(2, (Some(2), Some(3)));
        stored.insert(3, (None, None));
        assert_eq!(changed_bounds(&stored, number_tree(&nodes)), vec![(3, 5, 6)]);
    }

    #[test]
    fn test_cycles_do_not_loop() {
        let nodes = [(1, Some(2)), (2, Some(1)), (3, None)];
        let bounds = number_tree(&nodes);
        assert_eq!(bounds, vec![(3, 1, 2)]);
    }
}
