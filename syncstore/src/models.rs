use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::StoreError;

// --- Integration configuration ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    Bearer,
    ApiKey,
    Basic,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Bearer => "bearer",
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Basic => "basic",
        }
    }
}

/// Credential fields for every supported method. Only the ones the declared
/// method needs are read.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Header carrying the api key. Defaults to `X-API-Key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() { "<redacted>" } else { "<unset>" }
        }
        f.debug_struct("Credentials")
            .field("token", &redact(&self.token))
            .field("api_key", &redact(&self.api_key))
            .field("api_key_header", &self.api_key_header)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    #[serde(default)]
    pub credentials: Credentials,
}

/// Dot-separated path into a JSON document, split once when the
/// configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walks `value` along the path. A missing key, or a non-object on the
    /// way, resolves to `None`.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(FieldPath::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Transform {
    #[serde(rename = "uppercase")]
    Uppercase,
    #[serde(rename = "lowercase")]
    Lowercase,
    #[serde(rename = "parseInt")]
    ParseInt,
    #[default]
    #[serde(rename = "none")]
    None,
}

/// How one target field is derived from a raw record.
///
/// In configuration files a bare string is a direct path, an object is a
/// structured rule: `{"source": "meta.y", "transform": "parseInt", "default": 0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingRule {
    Direct(FieldPath),
    Transformed {
        source: FieldPath,
        #[serde(default)]
        transform: Transform,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
}

impl MappingRule {
    pub fn source(&self) -> &FieldPath {
        match self {
            MappingRule::Direct(path) => path,
            MappingRule::Transformed { source, .. } => source,
        }
    }
}

/// Target field name to rule. Ordered so that mapping output is stable.
pub type FieldMappings = BTreeMap<String, MappingRule>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub field_mappings: FieldMappings,
    /// Records per batch; the engine default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Fetch timeout; the engine default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub sync_entities: Vec<String>,
    /// Location of the record list inside a wrapped response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_root: Option<FieldPath>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl IntegrationConfig {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            endpoint: endpoint.into(),
            auth: AuthConfig::default(),
            field_mappings: FieldMappings::new(),
            batch_size: None,
            timeout_secs: None,
            sync_entities: Vec::new(),
            response_root: None,
            is_active: true,
            last_sync_at: None,
        }
    }

    pub fn from_json(raw: &str) -> crate::errors::Result<Self> {
        let config: IntegrationConfig = serde_json::from_str(raw)?;
        if config.id.trim().is_empty() {
            return Err(StoreError::InvalidArg("integration id must not be empty".into()));
        }
        Ok(config)
    }
}

// --- Sync runs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    #[default]
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Started,
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Started => "started",
            SyncRunStatus::InProgress => "in_progress",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Partial => "partial",
            SyncRunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncRunStatus::Completed | SyncRunStatus::Partial | SyncRunStatus::Failed
        )
    }

    /// Terminal status of a run whose fetch succeeded.
    pub fn from_counts(success: u64, failed: u64) -> Self {
        if failed == 0 {
            SyncRunStatus::Completed
        } else if success == 0 {
            SyncRunStatus::Failed
        } else {
            SyncRunStatus::Partial
        }
    }
}

impl FromStr for SyncRunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SyncRunStatus::Started),
            "in_progress" => Ok(SyncRunStatus::InProgress),
            "completed" => Ok(SyncRunStatus::Completed),
            "partial" => Ok(SyncRunStatus::Partial),
            "failed" => Ok(SyncRunStatus::Failed),
            other => Err(StoreError::InvalidArg(format!("unknown run status '{other}'"))),
        }
    }
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Manual => "manual",
            SyncType::Scheduled => "scheduled",
        }
    }
}

impl FromStr for SyncType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SyncType::Manual),
            "scheduled" => Ok(SyncType::Scheduled),
            other => Err(StoreError::InvalidArg(format!("unknown sync type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub integration_id: String,
    pub sync_type: SyncType,
    pub direction: SyncDirection,
    pub entity_type: Option<String>,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_total: u64,
    pub records_processed: u64,
    pub records_success: u64,
    pub records_failed: u64,
    pub records_skipped: u64,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSyncRun {
    pub integration_id: String,
    pub sync_type: SyncType,
    pub entity_type: Option<String>,
}

/// Partial update of a run row. Unset fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<SyncRunStatus>,
    pub records_total: Option<u64>,
    pub records_processed: Option<u64>,
    pub records_success: Option<u64>,
    pub records_failed: Option<u64>,
    pub records_skipped: Option<u64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl RunPatch {
    pub fn status(status: SyncRunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

// --- Sync errors ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UpsertFailed,
    ProcessingError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UpsertFailed => "upsert_failed",
            ErrorCategory::ProcessingError => "processing_error",
        }
    }
}

impl FromStr for ErrorCategory {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert_failed" => Ok(ErrorCategory::UpsertFailed),
            "processing_error" => Ok(ErrorCategory::ProcessingError),
            other => Err(StoreError::InvalidArg(format!("unknown error category '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSyncError {
    pub integration_id: String,
    pub category: ErrorCategory,
    pub message: String,
    pub entity_type: Option<String>,
    pub raw_record: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub integration_id: String,
    pub category: ErrorCategory,
    pub message: String,
    pub entity_type: Option<String>,
    pub raw_record: Value,
    pub created_at: DateTime<Utc>,
}

// --- Normalized records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldIssueKind {
    /// `parseInt` could not produce an integer and no default applied.
    NotANumber,
    /// A passthrough record that is not a JSON object.
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub kind: FieldIssueKind,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FieldIssueKind::NotANumber => write!(f, "field '{}' is not a number", self.field),
            FieldIssueKind::NotAnObject => write!(f, "record is not a JSON object"),
        }
    }
}

/// A record ready for the record store. Fields that failed coercion are
/// tracked as issues instead of values, and the store rejects the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedRecord {
    fields: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<FieldIssue>,
}

impl NormalizedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that carries the raw document unchanged.
    pub fn passthrough(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => Self {
                fields: map.clone(),
                issues: Vec::new(),
            },
            _ => Self {
                fields: Map::new(),
                issues: vec![FieldIssue {
                    field: "$".to_string(),
                    kind: FieldIssueKind::NotAnObject,
                }],
            },
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn mark_not_a_number(&mut self, field: impl Into<String>) {
        let field = field.into();
        self.fields.remove(&field);
        self.issues.push(FieldIssue {
            field,
            kind: FieldIssueKind::NotANumber,
        });
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }

    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
