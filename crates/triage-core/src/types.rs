//! Alert types.
//!
//! - [`AlertId`] / [`GroupId`]: identifiers
//! - [`Severity`]: how urgent an alert is
//! - [`AlertStatus`]: the only mutable part of an alert
//! - [`SourceSystem`]: the monitoring system that raised it
//! - [`Alert`]: a single reported anomaly

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TriageError};
use crate::vector::Embedding;

/// Unique identifier of an alert, usually assigned by the source system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlertId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Unique identifier of an alert group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh `grp-<uuid>` identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("grp-{}", Uuid::new_v4()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The severity level of an alert, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action required.
    Info,
    /// Low urgency.
    Low,
    /// Should be investigated.
    #[default]
    Medium,
    /// Needs prompt attention.
    High,
    /// Requires immediate attention.
    Critical,
}

impl Severity {
    /// All severities from least to most urgent.
    pub const ALL: [Self; 5] = [
        Self::Info,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Newly reported.
    #[default]
    Open,
    /// Someone is looking at it.
    Acknowledged,
    /// The underlying condition cleared.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The monitoring system that raised an alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceSystem {
    /// Prometheus / Alertmanager.
    Prometheus,
    /// Grafana alerting.
    Grafana,
    /// Nagios.
    Nagios,
    /// Zabbix.
    Zabbix,
    /// Datadog monitors.
    DataDog,
    /// New Relic.
    NewRelic,
    /// PagerDuty.
    PagerDuty,
    /// Anything else, by name.
    Custom(String),
}

impl SourceSystem {
    /// Returns the display name of the source.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Prometheus => "Prometheus",
            Self::Grafana => "Grafana",
            Self::Nagios => "Nagios",
            Self::Zabbix => "Zabbix",
            Self::DataDog => "DataDog",
            Self::NewRelic => "New Relic",
            Self::PagerDuty => "PagerDuty",
            Self::Custom(name) => name,
        }
    }
}

impl Default for SourceSystem {
    fn default() -> Self {
        Self::Custom("unknown".to_string())
    }
}

impl From<String> for SourceSystem {
    fn from(name: String) -> Self {
        let key: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "prometheus" | "alertmanager" => Self::Prometheus,
            "grafana" => Self::Grafana,
            "nagios" => Self::Nagios,
            "zabbix" => Self::Zabbix,
            "datadog" => Self::DataDog,
            "newrelic" => Self::NewRelic,
            "pagerduty" => Self::PagerDuty,
            _ => Self::Custom(name),
        }
    }
}

impl From<&str> for SourceSystem {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<SourceSystem> for String {
    fn from(source: SourceSystem) -> Self {
        source.name().to_string()
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single reported anomaly from a monitoring source.
///
/// Alerts are immutable after creation except for [`Alert::status`]. The
/// embedding is derived data and may be recomputed from [`Alert::embedding_text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier.
    pub id: AlertId,
    /// Short summary.
    pub title: String,
    /// Detailed description.
    #[serde(default)]
    pub description: String,
    /// Severity level.
    #[serde(default)]
    pub severity: Severity,
    /// Monitoring system that raised the alert.
    #[serde(default)]
    pub source_system: SourceSystem,
    /// Affected service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Affected host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    /// Environment tag (prod, staging, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Numeric metrics captured with the alert.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// When the alert was raised.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Current status.
    #[serde(default)]
    pub status: AlertStatus,
    /// Derived embedding vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl Alert {
    /// Creates a new open alert raised now.
    #[must_use]
    pub fn new(
        id: impl Into<AlertId>,
        title: impl Into<String>,
        severity: Severity,
        source_system: impl Into<SourceSystem>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            severity,
            source_system: source_system.into(),
            service_name: None,
            host_name: None,
            environment: None,
            tags: BTreeSet::new(),
            metrics: BTreeMap::new(),
            created_at: Utc::now(),
            status: AlertStatus::Open,
            embedding: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the affected service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service_name = Some(service.into());
        self
    }

    /// Sets the affected host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host_name = Some(host.into());
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a metric sample.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub const fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Attaches an embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: impl Into<Embedding>) -> Self {
        self.embedding = Some(embedding.into());
        self
    }

    /// Validates the fields every alert must carry.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidAlert` if the ID or title is empty.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(TriageError::InvalidAlert {
                reason: "alert id cannot be empty".to_string(),
            });
        }
        if self.title.trim().is_empty() {
            return Err(TriageError::InvalidAlert {
                reason: format!("alert {} has an empty title", self.id),
            });
        }
        Ok(())
    }

    /// Text handed to the embedding provider.
    ///
    /// Fields are joined with ` | ` and omitted when empty.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![format!("Title: {}", self.title)];
        if !self.description.is_empty() {
            parts.push(format!("Description: {}", self.description));
        }
        parts.push(format!("Severity: {}", self.severity));
        parts.push(format!("Source: {}", self.source_system));
        if let Some(service) = &self.service_name {
            parts.push(format!("Service: {service}"));
        }
        if let Some(host) = &self.host_name {
            parts.push(format!("Host: {host}"));
        }
        if let Some(env) = &self.environment {
            parts.push(format!("Environment: {env}"));
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            parts.push(format!("Tags: {}", tags.join(", ")));
        }
        if !self.metrics.is_empty() {
            let metrics: Vec<String> = self
                .metrics
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect();
            parts.push(format!("Metrics: {}", metrics.join(", ")));
        }
        parts.join(" | ")
    }
}
