//! Incident pattern analysis over a group's alerts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use triage_core::{Alert, AlertId, Severity};

/// Gaps shorter than this count as simultaneous.
pub const SIMULTANEOUS_GAP_SECS: i64 = 5 * 60;

/// Gaps shorter than this (and not simultaneous) count as cascading.
pub const CASCADING_GAP_SECS: i64 = 30 * 60;

/// How the alerts of an incident are spread over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalPattern {
    /// Every consecutive gap is under five minutes.
    Simultaneous,
    /// Largest gap under thirty minutes.
    Cascading,
    /// Spread out, or a single alert.
    #[default]
    Sequential,
}

impl TemporalPattern {
    /// Classifies by the largest gap between consecutive alerts.
    #[must_use]
    pub const fn from_max_gap_secs(max_gap: i64) -> Self {
        if max_gap < SIMULTANEOUS_GAP_SECS {
            Self::Simultaneous
        } else if max_gap < CASCADING_GAP_SECS {
            Self::Cascading
        } else {
            Self::Sequential
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simultaneous => "simultaneous",
            Self::Cascading => "cascading",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for TemporalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert on the incident timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the alert fired.
    pub at: DateTime<Utc>,
    /// The alert.
    pub alert_id: AlertId,
    /// Its title.
    pub title: String,
    /// Its severity.
    pub severity: Severity,
    /// Its service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// Summary of how an incident unfolded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentPattern {
    /// Alert count per service.
    pub services: BTreeMap<String, usize>,
    /// Alert count per host.
    pub hosts: BTreeMap<String, usize>,
    /// Alerts in chronological order.
    pub timeline: Vec<TimelineEntry>,
    /// Severities in chronological order.
    pub severity_progression: Vec<Severity>,
    /// Temporal classification.
    pub temporal: TemporalPattern,
    /// Largest gap between consecutive alerts, in seconds.
    pub max_gap_secs: i64,
    /// Time from first to last alert, in seconds.
    pub span_secs: i64,
}

impl IncidentPattern {
    /// Analyzes `alerts` in any order.
    #[must_use]
    pub fn analyze(alerts: &[Alert]) -> Self {
        let mut pattern = Self::default();

        for alert in alerts {
            if let Some(service) = &alert.service_name {
                *pattern.services.entry(service.clone()).or_insert(0) += 1;
            }
            if let Some(host) = &alert.host_name {
                *pattern.hosts.entry(host.clone()).or_insert(0) += 1;
            }
        }

        let mut ordered: Vec<&Alert> = alerts.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        pattern.timeline = ordered
            .iter()
            .map(|a| TimelineEntry {
                at: a.created_at,
                alert_id: a.id.clone(),
                title: a.title.clone(),
                severity: a.severity,
                service: a.service_name.clone(),
            })
            .collect();
        pattern.severity_progression = ordered.iter().map(|a| a.severity).collect();

        if ordered.len() > 1 {
            pattern.max_gap_secs = ordered
                .windows(2)
                .map(|w| (w[1].created_at - w[0].created_at).num_seconds())
                .max()
                .unwrap_or(0);
            if let (Some(first), Some(last)) = (ordered.first(), ordered.last()) {
                pattern.span_secs = (last.created_at - first.created_at).num_seconds();
            }
            pattern.temporal = TemporalPattern::from_max_gap_secs(pattern.max_gap_secs);
        }

        pattern
    }

    /// Service with the most alerts; ties go to the alphabetically first.
    #[must_use]
    pub fn dominant_service(&self) -> Option<&str> {
        self.services
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, _)| name.as_str())
    }

    /// Returns true if severity never decreased along the timeline.
    #[must_use]
    pub fn is_escalating(&self) -> bool {
        self.severity_progression.len() > 1
            && self.severity_progression.windows(2).all(|w| w[0] <= w[1])
            && self.severity_progression.first() < self.severity_progression.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use test_case::test_case;

    fn alert_at(id: &str, minutes: i64, severity: Severity, service: &str) -> Alert {
        let base = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        Alert::new(id, format!("alert {id}"), severity, "Prometheus")
            .with_service(service)
            .with_host(format!("host-{id}"))
            .at(base + Duration::minutes(minutes))
    }

    #[test_case(0, TemporalPattern::Simultaneous ; "no gap")]
    #[test_case(299, TemporalPattern::Simultaneous ; "just under five minutes")]
    #[test_case(300, TemporalPattern::Cascading ; "five minutes")]
    #[test_case(1799, TemporalPattern::Cascading ; "just under thirty minutes")]
    #[test_case(1800, TemporalPattern::Sequential ; "thirty minutes")]
    fn classifies_gaps(gap: i64, expected: TemporalPattern) {
        assert_eq!(TemporalPattern::from_max_gap_secs(gap), expected);
    }

    #[test]
    fn single_alert_is_sequential() {
        let pattern = IncidentPattern::analyze(&[alert_at("a", 0, Severity::High, "web")]);
        assert_eq!(pattern.temporal, TemporalPattern::Sequential);
        assert_eq!(pattern.max_gap_secs, 0);
        assert_eq!(pattern.timeline.len(), 1);
    }

    #[test]
    fn counts_services_and_orders_timeline() {
        let alerts = vec![
            alert_at("c", 10, Severity::Critical, "db"),
            alert_at("a", 0, Severity::Low, "web"),
            alert_at("b", 3, Severity::High, "web"),
        ];
        let pattern = IncidentPattern::analyze(&alerts);

        assert_eq!(pattern.services.get("web"), Some(&2));
        assert_eq!(pattern.services.get("db"), Some(&1));
        assert_eq!(pattern.hosts.len(), 3);
        let order: Vec<&str> = pattern.timeline.iter().map(|e| e.alert_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(
            pattern.severity_progression,
            vec![Severity::Low, Severity::High, Severity::Critical]
        );
        assert_eq!(pattern.max_gap_secs, 7 * 60);
        assert_eq!(pattern.span_secs, 10 * 60);
        assert_eq!(pattern.temporal, TemporalPattern::Cascading);
        assert_eq!(pattern.dominant_service(), Some("web"));
        assert!(pattern.is_escalating());
    }

    #[test]
    fn empty_input() {
        let pattern = IncidentPattern::analyze(&[]);
        assert!(pattern.timeline.is_empty());
        assert_eq!(pattern.dominant_service(), None);
        assert!(!pattern.is_escalating());
    }
}
