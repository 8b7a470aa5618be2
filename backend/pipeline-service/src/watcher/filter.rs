//! Change subscription filter
//!
//! Expressed in the aggregation-pipeline dialect of the source database and parsed
//! once at startup. Only the subset needed by the watcher is understood: a `$match`
//! stage on `operationType` and on `ns` membership.

use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, WatchError};

/// Collections holding signed VAAs
pub const VAA_COLLECTIONS: [&str; 2] = ["vaasPythnet", "vaas"];

/// Default pipeline; `{db}` is replaced with the JSON-encoded database name.
pub const DEFAULT_PIPELINE_TEMPLATE: &str = r#"[
  {"$match": {
    "operationType": "insert",
    "ns": {"$in": [{"db": {db}, "coll": "vaasPythnet"}, {"db": {db}, "coll": "vaas"}]}
  }}
]"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    /// Initial snapshot read
    Read,
}

impl OperationType {
    fn from_stream_name(name: &str) -> Result<Self> {
        match name {
            "insert" => Ok(Self::Insert),
            "update" | "replace" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(WatchError::InvalidFilter(format!(
                "unsupported operationType '{}'",
                other
            ))),
        }
    }

    /// Debezium `op` code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Insert),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            "r" => Some(Self::Read),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

/// Database and collection of a change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    operations: Vec<OperationType>,
    namespaces: Vec<Namespace>,
}

impl ChangeFilter {
    /// Filter for inserts into the VAA collections of `database`.
    pub fn for_database(database: &str) -> Result<Self> {
        Self::from_template(DEFAULT_PIPELINE_TEMPLATE, database)
    }

    pub fn from_template(template: &str, database: &str) -> Result<Self> {
        let db = serde_json::to_string(database)
            .map_err(|e| WatchError::InvalidFilter(e.to_string()))?;
        Self::parse(&template.replace("{db}", &db))
    }

    pub fn parse(pipeline: &str) -> Result<Self> {
        let stages: Vec<Value> = serde_json::from_str(pipeline)
            .map_err(|e| WatchError::InvalidFilter(format!("pipeline is not a JSON array: {}", e)))?;

        let matcher = stages
            .iter()
            .find_map(|stage| stage.get("$match"))
            .and_then(Value::as_object)
            .ok_or_else(|| WatchError::InvalidFilter("pipeline has no $match stage".to_string()))?;

        for key in matcher.keys() {
            if key != "operationType" && key != "ns" {
                return Err(WatchError::InvalidFilter(format!(
                    "unsupported $match field '{}'",
                    key
                )));
            }
        }

        let operations = match matcher.get("operationType") {
            Some(value) => candidates(value, "operationType")?
                .iter()
                .map(|op| {
                    op.as_str()
                        .ok_or_else(|| {
                            WatchError::InvalidFilter("operationType must be a string".to_string())
                        })
                        .and_then(OperationType::from_stream_name)
                })
                .collect::<Result<Vec<_>>>()?,
            None => {
                return Err(WatchError::InvalidFilter(
                    "$match must constrain operationType".to_string(),
                ))
            }
        };

        let namespaces = match matcher.get("ns") {
            Some(value) => candidates(value, "ns")?
                .iter()
                .map(|value| parse_namespace(value))
                .collect::<Result<Vec<_>>>()?,
            None => {
                return Err(WatchError::InvalidFilter(
                    "$match must constrain ns".to_string(),
                ))
            }
        };

        if operations.is_empty() || namespaces.is_empty() {
            return Err(WatchError::InvalidFilter(
                "$in lists must not be empty".to_string(),
            ));
        }

        Ok(Self {
            operations,
            namespaces,
        })
    }

    pub fn matches(&self, operation: OperationType, namespace: &Namespace) -> bool {
        self.operations.contains(&operation) && self.namespaces.contains(namespace)
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Debezium topic per namespace: `<prefix>.<db>.<coll>`
    pub fn topics(&self, prefix: &str) -> Vec<String> {
        self.namespaces
            .iter()
            .map(|ns| format!("{}.{}.{}", prefix, ns.db, ns.coll))
            .collect()
    }
}

/// A literal value or the members of `{"$in": [...]}`.
fn candidates<'a>(value: &'a Value, field: &str) -> Result<Vec<&'a Value>> {
    match value {
        Value::Object(map) if map.contains_key("$in") => match map.get("$in") {
            Some(Value::Array(items)) if map.len() == 1 => Ok(items.iter().collect()),
            _ => Err(WatchError::InvalidFilter(format!(
                "{} $in must be the only operator and hold an array",
                field
            ))),
        },
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => Err(
            WatchError::InvalidFilter(format!("unsupported operator on {}", field)),
        ),
        other => Ok(vec![other]),
    }
}

fn parse_namespace(value: &Value) -> Result<Namespace> {
    let map: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| WatchError::InvalidFilter("ns entry must be an object".to_string()))?;

    let field = |name: &str| {
        map.get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| WatchError::InvalidFilter(format!("ns entry needs a '{}' string", name)))
    };

    Ok(Namespace::new(field("db")?, field("coll")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_for_database() {
        let filter = ChangeFilter::for_database("wormscan").unwrap();

        assert!(filter.matches(OperationType::Insert, &Namespace::new("wormscan", "vaas")));
        assert!(filter.matches(
            OperationType::Insert,
            &Namespace::new("wormscan", "vaasPythnet")
        ));
        assert!(!filter.matches(OperationType::Update, &Namespace::new("wormscan", "vaas")));
        assert!(!filter.matches(OperationType::Read, &Namespace::new("wormscan", "vaas")));
        assert!(!filter.matches(OperationType::Insert, &Namespace::new("other", "vaas")));
        assert!(!filter.matches(
            OperationType::Insert,
            &Namespace::new("wormscan", "observations")
        ));
    }

    #[test]
    fn test_topics_follow_debezium_naming() {
        let filter = ChangeFilter::for_database("wormscan").unwrap();
        assert_eq!(
            filter.topics("explorer"),
            vec!["explorer.wormscan.vaasPythnet", "explorer.wormscan.vaas"]
        );
    }

    #[test]
    fn test_database_name_is_escaped() {
        let filter = ChangeFilter::for_database(r#"we"ird"#).unwrap();
        assert_eq!(filter.namespaces()[0].db, r#"we"ird"#);
    }

    #[test]
    fn test_single_values_without_in() {
        let filter = ChangeFilter::parse(
            r#"[{"$match": {"operationType": "insert", "ns": {"db": "d", "coll": "c"}}}]"#,
        )
        .unwrap();
        assert!(filter.matches(OperationType::Insert, &Namespace::new("d", "c")));
    }

    #[test]
    fn test_malformed_pipelines_are_rejected() {
        let cases = [
            "not json",
            "{}",
            "[]",
            r#"[{"$project": {"a": 1}}]"#,
            r#"[{"$match": {"ns": {"db": "d", "coll": "c"}}}]"#,
            r#"[{"$match": {"operationType": "insert"}}]"#,
            r#"[{"$match": {"operationType": "upsert", "ns": {"db": "d", "coll": "c"}}}]"#,
            r#"[{"$match": {"operationType": "insert", "ns": {"$in": []}}}]"#,
            r#"[{"$match": {"operationType": "insert", "ns": {"$in": [{"db": "d"}]}}}]"#,
            r#"[{"$match": {"operationType": {"$nin": ["insert"]}, "ns": {"db": "d", "coll": "c"}}}]"#,
            r#"[{"$match": {"operationType": "insert", "ns": {"db": "d", "coll": "c"}, "x": 1}}]"#,
        ];

        for pipeline in cases {
            assert!(
                matches!(ChangeFilter::parse(pipeline), Err(WatchError::InvalidFilter(_))),
                "pipeline should be rejected: {}",
                pipeline
            );
        }
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(OperationType::from_code("c"), Some(OperationType::Insert));
        assert_eq!(OperationType::from_code("r"), Some(OperationType::Read));
        assert_eq!(OperationType::from_code("x"), None);
    }
}
