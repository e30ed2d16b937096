//! Store-agnostic description of a find: filter, sort and window.

use serde_json::{Map, Value};

/// Reserved field name addressing the document id.
pub const ID_FIELD: &str = "id";
/// Reserved field name addressing the creation timestamp.
pub const CREATED_AT: &str = "created_at";
/// Reserved field name addressing the last update timestamp.
pub const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The field holds exactly this JSON value.
    Equals { field: String, value: Value },
    /// The field is a string matching `pattern` case-insensitively.
    Matches { field: String, pattern: String },
    /// The field holds one of these JSON values. Nothing matches an empty set.
    OneOf { field: String, values: Vec<Value> },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::Equals { field, .. } | Self::Matches { field, .. } | Self::OneOf { field, .. } => {
                field
            }
        }
    }
}

/// Conjunction of conditions. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn matches(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.conditions.push(Condition::Matches {
            field: field.into(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn one_of(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::OneOf {
            field: field.into(),
            values,
        });
        self
    }

    /// Builds an equality filter from a JSON object. Returns the offending key
    /// when a value is not a scalar.
    pub fn from_object(object: &Map<String, Value>) -> Result<Self, String> {
        object
            .iter()
            .try_fold(Self::new(), |filter, (field, value)| match value {
                Value::Array(_) | Value::Object(_) => Err(field.clone()),
                scalar => Ok(filter.equals(field.clone(), scalar.clone())),
            })
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

impl Default for Sort {
    /// Most recently created first.
    fn default() -> Self {
        Self::descending(CREATED_AT)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Sort,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn window(mut self, skip: u64, limit: u64) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_from_object_accepts_scalars() {
        let object = json!({ "status": "1", "order": 3, "active": true });
        let filter = Filter::from_object(object.as_object().unwrap()).unwrap();
        assert_eq!(filter.conditions().len(), 3);
    }

    #[test]
    fn filter_from_object_rejects_nested_values() {
        let object = json!({ "status": "1", "tags": ["a"] });
        let err = Filter::from_object(object.as_object().unwrap()).unwrap_err();
        assert_eq!(err, "tags");
    }

    #[test]
    fn default_sort_is_newest_first() {
        let query = FindQuery::default();
        assert_eq!(query.sort, Sort::descending(CREATED_AT));
        assert_eq!(query.limit, None);
    }
}
