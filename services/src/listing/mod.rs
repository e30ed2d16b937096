//! Paginated, filterable, searchable listing shared by every collection.
//!
//! Raw query-string options are parsed into [`ListOptions`] up front so that
//! every rejection happens before the store is touched. [`list`] then runs
//! either an unpaginated filtered find or a page find plus a concurrent
//! count.
//!
//! The `hasNext` flag is computed as `total > skip`, which is `true` for the
//! last non-empty page as well. Clients rely on this and it is kept as is.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::documents::populate::expand;
use crate::documents::schema::Relation;
use crate::documents::{Collection, DocumentStore, Filter, FindQuery, Sort, StorageError};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

/// Listing options as they arrive on the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
    pub filter: Option<String>,
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
    pub paginate: Option<String>,
    pub populate: Option<String>,
}

/// A `field:pattern` search, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    pub field: String,
    pub pattern: String,
}

impl SearchSpec {
    pub fn parse(raw: &str) -> Result<Self, ListError> {
        let invalid = |reason: &str| ListError::InvalidOption {
            option: "search",
            reason: reason.to_owned(),
        };

        let (field, pattern) = raw
            .split_once(':')
            .ok_or_else(|| invalid("search must look like field:pattern"))?;
        let field = field.trim();
        if field.is_empty() || pattern.is_empty() {
            return Err(invalid("search must look like field:pattern"));
        }
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| invalid(&format!("invalid search pattern: {e}")))?;

        Ok(Self {
            field: field.to_owned(),
            pattern: pattern.to_owned(),
        })
    }

    pub fn to_filter(&self) -> Filter {
        Filter::new().matches(self.field.clone(), self.pattern.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub page: u64,
    pub limit: u64,
    pub search: Option<SearchSpec>,
    pub filter: Option<Filter>,
    pub sort: Sort,
    pub paginate: bool,
    pub populate: Vec<Relation>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            search: None,
            filter: None,
            sort: Sort::default(),
            paginate: true,
            populate: Vec::new(),
        }
    }
}

fn positive(option: &'static str, raw: Option<&str>, default: u64) -> Result<u64, ListError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => Err(ListError::InvalidOption {
            option,
            reason: format!("{option} must be a positive integer"),
        }),
    }
}

fn parse_sort(raw: &str) -> Result<Sort, ListError> {
    let invalid = |reason: &str| ListError::InvalidOption {
        option: "sortBy",
        reason: reason.to_owned(),
    };

    let (field, direction) = raw.split_once(':').unwrap_or((raw, ""));
    let field = field.trim();
    if field.is_empty() {
        return Err(invalid("sortBy must name a field"));
    }
    match direction.trim() {
        "" | "asc" => Ok(Sort::ascending(field)),
        "desc" => Ok(Sort::descending(field)),
        _ => Err(invalid("sort direction must be asc or desc")),
    }
}

fn parse_filter(raw: &str) -> Result<Filter, ListError> {
    let invalid = |reason: String| ListError::InvalidOption {
        option: "filter",
        reason,
    };

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| invalid(format!("filter must be a JSON object: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| invalid("filter must be a JSON object".to_owned()))?;
    Filter::from_object(object)
        .map_err(|field| invalid(format!("filter value for {field} must be a scalar")))
}

impl ListOptions {
    pub fn parse(collection: Collection, raw: &ListQuery) -> Result<Self, ListError> {
        let page = positive("page", raw.page.as_deref(), DEFAULT_PAGE)?;
        let limit = positive("limit", raw.limit.as_deref(), DEFAULT_LIMIT)?;
        let options = Self {
            page,
            limit,
            ..Self::default()
        };
        options.skip()?;

        let search = raw
            .search
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(SearchSpec::parse)
            .transpose()?;

        let filter = raw
            .filter
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(parse_filter)
            .transpose()?;

        let sort = match raw.sort_by.as_deref().filter(|raw| !raw.is_empty()) {
            Some(raw) => parse_sort(raw)?,
            None => Sort::default(),
        };

        let paginate = match raw.paginate.as_deref().map(str::trim) {
            None | Some("") | Some("true") => true,
            Some("false") => false,
            Some(_) => {
                return Err(ListError::InvalidOption {
                    option: "paginate",
                    reason: "paginate must be true or false".to_owned(),
                });
            }
        };

        let populate = parse_populate(collection, raw.populate.as_deref())?;

        Ok(Self {
            search,
            filter,
            sort,
            paginate,
            populate,
            ..options
        })
    }

    /// Number of records before the requested page.
    pub fn skip(&self) -> Result<u64, ListError> {
        self.page
            .checked_sub(1)
            .and_then(|pages| pages.checked_mul(self.limit))
            .ok_or_else(|| ListError::InvalidOption {
                option: "page",
                reason: "page and limit are too large".to_owned(),
            })
    }

    /// The filter the find will run with: an explicit filter wins, otherwise
    /// the search is turned into a case-insensitive match.
    pub fn effective_filter(&self) -> Option<Filter> {
        self.filter
            .clone()
            .or_else(|| self.search.as_ref().map(SearchSpec::to_filter))
    }
}

/// Resolves relation names against the collection's schema.
pub fn parse_populate(collection: Collection, raw: Option<&str>) -> Result<Vec<Relation>, ListError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            collection
                .relation(name)
                .ok_or_else(|| ListError::InvalidOption {
                    option: "populate",
                    reason: format!("{collection} has no relation named {name}"),
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(rename = "hasNext", skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("Invalid {option}: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ListError {
    /// A pattern the store could not compile is the caller's fault.
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPattern(reason) => Self::InvalidOption {
                option: "search",
                reason: format!("invalid search pattern: {reason}"),
            },
            other => Self::Storage(other),
        }
    }
}

#[tracing::instrument(skip(store, options))]
pub async fn list<D: DocumentStore>(
    store: &D,
    collection: Collection,
    options: &ListOptions,
) -> Result<ListPage, ListError> {
    let filter = options.effective_filter();

    if !options.paginate || filter.is_some() {
        let query = FindQuery::new(filter.unwrap_or_default()).sorted(options.sort.clone());
        let docs = store.find(collection, &query).await?;
        let items = expand(store, &docs, &options.populate).await?;
        tracing::debug!(count = items.len(), "unpaginated listing");
        return Ok(ListPage {
            items,
            page: None,
            has_next: None,
        });
    }

    let skip = options.skip()?;
    let query = FindQuery::default()
        .sorted(options.sort.clone())
        .window(skip, options.limit);
    let everything = Filter::new();
    let (docs, total) = tokio::try_join!(
        store.find(collection, &query),
        store.count(collection, &everything)
    )?;
    let items = expand(store, &docs, &options.populate).await?;
    tracing::debug!(count = items.len(), total, skip, "paginated listing");

    Ok(ListPage {
        items,
        page: Some(options.page),
        has_next: Some(total > skip),
    })
}
