use std::collections::BTreeSet;

/// The kind of schema constraint a CDC event's `schema.constraints` list may
/// carry. Only `Unique` and `NodeKey` qualify a constraint as identity-bearing
/// (spec section 4.2); others are recorded but never selected as a merge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintType {
    Unique,
    NodeKey,
    Other,
}

impl ConstraintType {
    pub fn is_identity_bearing(self) -> bool {
        matches!(self, ConstraintType::Unique | ConstraintType::NodeKey)
    }
}

/// A declared uniqueness or key rule on a label's properties, sourced from
/// CDC schema metadata (spec section 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub label: String,
    pub kind: ConstraintType,
    pub properties: BTreeSet<String>,
}

/// Grouping key for CDC-Schema node merges. Equality is structural: two
/// events that would produce the same merge/set/label-mutation statement
/// shape must compare equal so the statement grouper (C4) can coalesce them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeSchemaMetadata {
    pub constraints: Vec<ConstraintRef>,
    pub labels_to_add: Vec<String>,
    pub labels_to_delete: Vec<String>,
    pub keys: BTreeSet<String>,
}

/// A constraint as captured in a grouping key: just the facts that affect the
/// emitted statement shape (label + properties), not the full [`Constraint`]
/// (whose `kind` doesn't affect the statement once it has been selected).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintRef {
    pub label: String,
    pub properties: BTreeSet<String>,
}

/// Grouping key for CDC-Schema relationship merges (spec section 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipSchemaMetadata {
    pub rel_type: String,
    pub start_labels: Vec<String>,
    pub end_labels: Vec<String>,
    pub start_keys: BTreeSet<String>,
    pub end_keys: BTreeSet<String>,
}

/// Selects the property keys that form a node's identity from its declared
/// constraints (spec section 4.2).
///
/// Restricts `constraints` to those on a label in `labels` and of an
/// identity-bearing kind, then picks the smallest-cardinality one whose
/// properties are a subset of `property_keys`. Ties break by the label's
/// position in `labels`, then lexicographically by sorted property tuple —
/// the tie-break the original implementation left unspecified and this
/// design fixes (spec section 9).
pub fn get_node_keys(
    labels: &[String],
    property_keys: &BTreeSet<String>,
    constraints: &[Constraint],
) -> BTreeSet<String> {
    let mut candidates: Vec<(usize, &Constraint)> = constraints
        .iter()
        .filter(|c| c.kind.is_identity_bearing())
        .filter_map(|c| {
            let label_rank = labels.iter().position(|l| l == &c.label)?;
            Some((label_rank, c))
        })
        .filter(|(_, c)| c.properties.is_subset(property_keys))
        .collect();

    candidates.sort_by(|(rank_a, a), (rank_b, b)| {
        a.properties
            .len()
            .cmp(&b.properties.len())
            .then(rank_a.cmp(rank_b))
            .then_with(|| {
                let sorted_a: Vec<_> = a.properties.iter().collect();
                let sorted_b: Vec<_> = b.properties.iter().collect();
                sorted_a.cmp(&sorted_b)
            })
    });

    candidates
        .into_iter()
        .next()
        .map(|(_, c)| c.properties.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(label: &str, kind: ConstraintType, props: &[&str]) -> Constraint {
        Constraint {
            label: label.to_string(),
            kind,
            properties: props.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn picks_smallest_qualifying_constraint() {
        let labels = vec!["Person".to_string()];
        let props: BTreeSet<String> = ["id", "email", "name"].iter().map(|s| s.to_string()).collect();
        let constraints = vec![
            constraint("Person", ConstraintType::Unique, &["id", "email"]),
            constraint("Person", ConstraintType::Unique, &["id"]),
            constraint("Person", ConstraintType::Other, &["name"]),
        ];
        let keys = get_node_keys(&labels, &props, &constraints);
        assert_eq!(keys, ["id"].iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn ignores_non_identity_constraints() {
        let labels = vec!["Person".to_string()];
        let props: BTreeSet<String> = ["name"].iter().map(|s| s.to_string()).collect();
        let constraints = vec![constraint("Person", ConstraintType::Other, &["name"])];
        assert!(get_node_keys(&labels, &props, &constraints).is_empty());
    }

    #[test]
    fn ignores_constraints_whose_properties_are_not_a_subset() {
        let labels = vec!["Person".to_string()];
        let props: BTreeSet<String> = ["id"].iter().map(|s| s.to_string()).collect();
        let constraints = vec![constraint("Person", ConstraintType::Unique, &["id", "email"])];
        assert!(get_node_keys(&labels, &props, &constraints).is_empty());
    }

    #[test]
    fn tie_breaks_by_label_order_then_lexicographic_properties() {
        let labels = vec!["A".to_string(), "B".to_string()];
        let props: BTreeSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let constraints = vec![
            constraint("B", ConstraintType::Unique, &["x"]),
            constraint("A", ConstraintType::Unique, &["y"]),
        ];
        let keys = get_node_keys(&labels, &props, &constraints);
        assert_eq!(keys, ["y"].iter().map(|s| s.to_string()).collect());
    }
}
