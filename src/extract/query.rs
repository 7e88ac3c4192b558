use chrono::NaiveDateTime;
use derive_builder::Builder;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Field the range clause applies to when none is configured.
pub const DEFAULT_TIME_FIELD: &str = "timestamp";

/// Describes which documents an extraction should return.
///
/// The model is immutable once built. Every decision about the shape of the
/// rendered query is a pure function of the time bounds, the equality filters
/// and the requested fields.
///
/// ```rust,ignore
/// let model = QueryModelBuilder::default()
///     .start_time(start)
///     .filters(BTreeMap::from([("status".to_string(), json!("active"))]))
///     .build()?;
/// let spec = model.render();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct QueryModel {
    /// Document field holding the event time.
    #[builder(default = "DEFAULT_TIME_FIELD.to_string()")]
    time_field: String,

    /// Inclusive lower bound.
    #[builder(default, setter(into, strip_option))]
    start_time: Option<NaiveDateTime>,

    /// Exclusive upper bound.
    #[builder(default, setter(into, strip_option))]
    end_time: Option<NaiveDateTime>,

    /// Equality constraints, one per field.
    #[builder(default, setter(into, strip_option))]
    filters: Option<BTreeMap<String, Value>>,

    /// Dotted field paths to return, in request order.
    #[builder(default, setter(into, strip_option))]
    source_fields: Option<Vec<String>>,
}

impl QueryModelBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(field) = &self.time_field {
            if field.trim().is_empty() {
                return Err("time_field must not be empty".to_string());
            }
        }

        if let (Some(start), Some(end)) = (self.start_time.flatten(), self.end_time.flatten()) {
            if start >= end {
                return Err(format!(
                    "start_time ({start}) must be earlier than end_time ({end})"
                ));
            }
        }

        if let Some(Some(filters)) = &self.filters {
            for (field, value) in filters {
                if field.trim().is_empty() {
                    return Err("filter field names must not be empty".to_string());
                }
                if !is_scalar(value) {
                    return Err(format!(
                        "filter on '{field}' must compare against a scalar value"
                    ));
                }
            }
        }

        if let Some(Some(fields)) = &self.source_fields {
            if fields.iter().any(|f| f.trim().is_empty()) {
                return Err("source_fields must not contain empty paths".to_string());
            }
        }

        Ok(())
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

impl QueryModel {
    /// A model with no constraints at all.
    pub fn match_all() -> Self {
        Self {
            time_field: DEFAULT_TIME_FIELD.to_string(),
            start_time: None,
            end_time: None,
            filters: None,
            source_fields: None,
        }
    }

    pub fn time_field(&self) -> &str {
        &self.time_field
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<NaiveDateTime> {
        self.end_time
    }

    pub fn filters(&self) -> Option<&BTreeMap<String, Value>> {
        self.filters.as_ref()
    }

    pub fn source_fields(&self) -> Option<&[String]> {
        self.source_fields.as_deref()
    }

    /// Renders the backend-neutral query description.
    ///
    /// A clause slot is filled only when its inputs are present and non-empty;
    /// nothing is defaulted.
    pub fn render(&self) -> QuerySpec {
        let range = if self.start_time.is_some() || self.end_time.is_some() {
            Some(RangeClause {
                field: self.time_field.clone(),
                gte: self.start_time,
                lt: self.end_time,
            })
        } else {
            None
        };

        let filter = self
            .filters
            .as_ref()
            .filter(|filters| !filters.is_empty())
            .map(|filters| FilterClause {
                terms: filters
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect(),
            });

        let projection = self
            .source_fields
            .as_ref()
            .filter(|fields| !fields.is_empty())
            .map(|fields| Projection {
                fields: fields.clone(),
            });

        QuerySpec {
            range,
            filter,
            projection,
        }
    }
}

/// Rendered query with three independent clause slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpec {
    pub range: Option<RangeClause>,
    pub filter: Option<FilterClause>,
    pub projection: Option<Projection>,
}

impl QuerySpec {
    /// True when no clause discriminates between documents.
    ///
    /// Projection only narrows returned fields, so it does not count.
    pub fn is_match_all(&self) -> bool {
        self.range.is_none() && self.filter.is_none()
    }
}

/// Time window; an absent bound is open on that side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeClause {
    pub field: String,
    pub gte: Option<NaiveDateTime>,
    pub lt: Option<NaiveDateTime>,
}

/// AND of equality tests, ordered by field name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterClause {
    pub terms: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub fields: Vec<String>,
}
