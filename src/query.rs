use serde_json::Value;
use std::cmp::Ordering;

/// Predicate over document fields, addressed by dotted paths (`"address.city"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Lt(String, Value),
    Le(String, Value),
    /// String field contains the given substring.
    Contains(String, String),
    /// Field is present and not null.
    Exists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Filter plus ordering, handed to the store's query executor.
///
/// # Examples
///
/// ```
/// use docbind::query::{Filter, Query, SortOrder};
/// use serde_json::json;
///
/// let query = Query::new()
///     .filter(Filter::eq("status", json!("open")).and(Filter::gt("total", json!(10))))
///     .order_by("createdAt", SortOrder::Desc);
/// let (sql, params) = query.to_sql();
/// assert_eq!(sql, "SELECT * FROM c WHERE (c.status = @p0 AND c.total > @p1) ORDER BY c.createdAt DESC");
/// assert_eq!(params.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order_by: Vec<(String, SortOrder)>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            filter: Filter::All,
            order_by: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.order_by.push((path.into(), order));
        self
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.filter.matches(document)
    }

    /// Orders two documents according to `order_by`.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (path, order) in &self.order_by {
            let ordering = compare_optional(lookup(a, path), lookup(b, path));
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Orders documents in place according to `order_by`.
    pub fn sort(&self, documents: &mut [Value]) {
        if !self.order_by.is_empty() {
            documents.sort_by(|a, b| self.compare(a, b));
        }
    }

    /// Renders the query as parameterized SQL for stores that accept it.
    pub fn to_sql(&self) -> (String, Vec<(String, Value)>) {
        let mut params = Vec::new();
        let mut sql = String::from("SELECT * FROM c");
        if self.filter != Filter::All {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter.render(&mut params));
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|(path, order)| {
                    let dir = match order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    format!("{} {dir}", field(path))
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        (sql, params)
    }
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: Value) -> Self {
        Self::Eq(path.into(), value)
    }

    pub fn ne(path: impl Into<String>, value: Value) -> Self {
        Self::Ne(path.into(), value)
    }

    pub fn gt(path: impl Into<String>, value: Value) -> Self {
        Self::Gt(path.into(), value)
    }

    pub fn ge(path: impl Into<String>, value: Value) -> Self {
        Self::Ge(path.into(), value)
    }

    pub fn lt(path: impl Into<String>, value: Value) -> Self {
        Self::Lt(path.into(), value)
    }

    pub fn le(path: impl Into<String>, value: Value) -> Self {
        Self::Le(path.into(), value)
    }

    pub fn contains(path: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains(path.into(), needle.into())
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Self::Exists(path.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::All => other,
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut terms) => {
                terms.push(other);
                Self::Or(terms)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Eq(path, value) => lookup(document, path) == Some(value),
            Self::Ne(path, value) => lookup(document, path) != Some(value),
            Self::Gt(path, value) => compare(document, path, value) == Some(Ordering::Greater),
            Self::Ge(path, value) => matches!(
                compare(document, path, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(path, value) => compare(document, path, value) == Some(Ordering::Less),
            Self::Le(path, value) => matches!(
                compare(document, path, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Contains(path, needle) => lookup(document, path)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Self::Exists(path) => lookup(document, path).is_some_and(|v| !v.is_null()),
            Self::And(terms) => terms.iter().all(|t| t.matches(document)),
            Self::Or(terms) => terms.iter().any(|t| t.matches(document)),
            Self::Not(inner) => !inner.matches(document),
        }
    }

    fn render(&self, params: &mut Vec<(String, Value)>) -> String {
        match self {
            Self::All => "true".to_string(),
            Self::Eq(path, value) => bind(params, path, "=", value),
            Self::Ne(path, value) => bind(params, path, "!=", value),
            Self::Gt(path, value) => bind(params, path, ">", value),
            Self::Ge(path, value) => bind(params, path, ">=", value),
            Self::Lt(path, value) => bind(params, path, "<", value),
            Self::Le(path, value) => bind(params, path, "<=", value),
            Self::Contains(path, needle) => {
                let name = push_param(params, Value::String(needle.clone()));
                format!("CONTAINS({}, {name})", field(path))
            }
            Self::Exists(path) => {
                let field = field(path);
                format!("(IS_DEFINED({field}) AND NOT IS_NULL({field}))")
            }
            Self::And(terms) => join_terms(terms, " AND ", params),
            Self::Or(terms) => join_terms(terms, " OR ", params),
            Self::Not(inner) => format!("NOT ({})", inner.render(params)),
        }
    }
}

fn push_param(params: &mut Vec<(String, Value)>, value: Value) -> String {
    let name = format!("@p{}", params.len());
    params.push((name.clone(), value));
    name
}

fn bind(params: &mut Vec<(String, Value)>, path: &str, op: &str, value: &Value) -> String {
    let name = push_param(params, value.clone());
    format!("{} {op} {name}", field(path))
}

/// Renders a dotted path as a property reference on `c`.
///
/// Plain identifier segments use dot access; anything else is emitted as a
/// quoted, escaped bracket accessor so it can never close the expression.
fn field(path: &str) -> String {
    let mut rendered = String::from("c");
    for segment in path.split('.') {
        if is_identifier(segment) {
            rendered.push('.');
            rendered.push_str(segment);
        } else {
            rendered.push('[');
            rendered.push_str(&Value::String(segment.to_string()).to_string());
            rendered.push(']');
        }
    }
    rendered
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn join_terms(terms: &[Filter], sep: &str, params: &mut Vec<(String, Value)>) -> String {
    let rendered: Vec<String> = terms.iter().map(|t| t.render(params)).collect();
    format!("({})", rendered.join(sep))
}

/// Resolves a dotted path inside a JSON document.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn compare(document: &Value, path: &str, value: &Value) -> Option<Ordering> {
    lookup(document, path).and_then(|field| compare_values(field, value))
}

/// Orders two JSON scalars of the same type; strings compare ordinally.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

// Missing values sort before present ones.
fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}
