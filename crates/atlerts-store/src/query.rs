//! Query model: a target collection, equality-style filters, one ordering
//! field and an optional limit.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::{CollectionPath, Document, DocumentPath};

/// Where a query looks for documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Direct children of one collection.
    Collection(CollectionPath),
    /// Every collection with this name, at any depth (e.g. all `messages`
    /// across all conversations).
    CollectionGroup(String),
}

impl Target {
    pub fn contains(&self, path: &DocumentPath) -> bool {
        let parent = path.parent();
        match self {
            Target::Collection(collection) => parent == *collection,
            Target::CollectionGroup(name) => parent.name() == name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn not_eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FilterOp::NotEq,
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            field: field.to_string(),
            op: FilterOp::In,
            value: Value::Array(values.into_iter().map(Into::into).collect()),
        }
    }

    /// A document without the field never matches, whatever the operator.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => *actual == self.value,
            FilterOp::NotEq => *actual != self.value,
            FilterOp::In => self
                .value
                .as_array()
                .map(|candidates| candidates.contains(actual))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub target: Target,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(path: CollectionPath) -> Self {
        Self {
            target: Target::Collection(path),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn collection_group(name: &str) -> Self {
        Self {
            target: Target::CollectionGroup(name.to_string()),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(field, value))
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Target and filters only. Documents lacking the ordering field are
    /// excluded as well, the way ordered queries behave in hosted stores.
    pub fn matches(&self, doc: &Document) -> bool {
        if !self.target.contains(&doc.path) {
            return false;
        }
        if let Some(order) = &self.order_by {
            if doc.get(&order.field).is_none() {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filter, sort and truncate a candidate set.
    pub fn evaluate<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        let mut results: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect();

        results.sort_by(|a, b| self.compare(a, b));

        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }

    /// Ordering used by [`evaluate`](Self::evaluate): the order field, then
    /// the document path so ties are deterministic.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_field = match &self.order_by {
            Some(order) => {
                let ordering = compare_values(a.get(&order.field), b.get(&order.field));
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            }
            None => Ordering::Equal,
        };
        by_field.then_with(|| a.path.cmp(&b.path))
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Target::Collection(path) => write!(f, "{path}")?,
            Target::CollectionGroup(name) => write!(f, "*/{name}")?,
        }
        for filter in &self.filters {
            let op = match filter.op {
                FilterOp::Eq => "==",
                FilterOp::NotEq => "!=",
                FilterOp::In => "in",
            };
            write!(f, " [{} {} {}]", filter.field, op, filter.value)?;
        }
        if let Some(order) = &self.order_by {
            let dir = match order.direction {
                Direction::Ascending => "asc",
                Direction::Descending => "desc",
            };
            write!(f, " order by {} {}", order.field, dir)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit {limit}")?;
        }
        Ok(())
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over field values. Missing sorts before everything, then
/// values are ranked by type and compared within a type.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
    };

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(Some(left), Some(right));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Fields;
    use serde_json::json;

    fn doc(path: &str, body: Value) -> Document {
        let fields: Fields = body.as_object().cloned().unwrap_or_default();
        Document::new(DocumentPath::new(path).unwrap(), fields)
    }

    #[test]
    fn test_collection_group_matches_any_parent() {
        let query = Query::collection_group("messages").where_eq("toId", "bob");
        assert!(query.matches(&doc(
            "conversations/alice_bob/messages/m1",
            json!({ "toId": "bob" })
        )));
        assert!(query.matches(&doc(
            "conversations/bob_carol/messages/m2",
            json!({ "toId": "bob" })
        )));
        assert!(!query.matches(&doc("broadcasts/b1", json!({ "toId": "bob" }))));
    }

    #[test]
    fn test_collection_target_is_exact() {
        let path = CollectionPath::new("conversations/alice_bob/messages").unwrap();
        let query = Query::collection(path);
        assert!(query.matches(&doc("conversations/alice_bob/messages/m1", json!({}))));
        assert!(!query.matches(&doc("conversations/alice_carol/messages/m1", json!({}))));
    }

    #[test]
    fn test_filters() {
        let d = doc("users/bob", json!({ "uid": "bob", "isRead": false }));
        assert!(Filter::eq("isRead", false).matches(&d));
        assert!(Filter::not_eq("uid", "alice").matches(&d));
        assert!(Filter::is_in("uid", ["alice", "bob"]).matches(&d));
        assert!(!Filter::is_in("uid", ["alice"]).matches(&d));
        assert!(!Filter::eq("missing", 1).matches(&d));
        assert!(!Filter::not_eq("missing", 1).matches(&d));
    }

    #[test]
    fn test_evaluate_orders_ties_by_path_and_limits() {
        let docs = vec![
            doc("broadcasts/c", json!({ "sentAt": 20 })),
            doc("broadcasts/a", json!({ "sentAt": 10 })),
            doc("broadcasts/b", json!({ "sentAt": 20 })),
            doc("broadcasts/untimed", json!({})),
        ];

        let ascending = Query::collection(CollectionPath::new("broadcasts").unwrap())
            .order_by("sentAt", Direction::Ascending)
            .evaluate(&docs);
        let ids: Vec<&str> = ascending.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let newest = Query::collection(CollectionPath::new("broadcasts").unwrap())
            .order_by("sentAt", Direction::Descending)
            .limit(2)
            .evaluate(&docs);
        let ids: Vec<&str> = newest.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_compare_values_across_types() {
        assert_eq!(compare_values(None, Some(&json!(0))), Ordering::Less);
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!("b")), Some(&json!("a"))),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(Some(&json!(true)), Some(&json!("a"))),
            Ordering::Less
        );
    }
}
