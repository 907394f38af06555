//! Structured outcome of one sync run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use infradb_discovery::TargetReport;

/// How one source fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    /// The source could not be used at all, or every target failed.
    Failed { error: String },
    /// Some targets succeeded and some failed.
    Partial { succeeded: usize, failed: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: String,
    #[serde(flatten)]
    pub status: SourceStatus,
    pub targets: Vec<TargetReport>,
}

impl SourceReport {
    pub fn failed(source: impl Into<String>, error: impl ToString) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Failed {
                error: error.to_string(),
            },
            targets: Vec::new(),
        }
    }

    /// Derives the source status from its target reports.
    ///
    /// No targets counts as success: there was nothing to fail.
    pub fn from_targets(source: impl Into<String>, targets: Vec<TargetReport>) -> Self {
        let failed = targets.iter().filter(|t| !t.is_success()).count();
        let succeeded = targets.len() - failed;
        let status = if failed == 0 {
            SourceStatus::Success
        } else if succeeded == 0 {
            SourceStatus::Failed {
                error: match targets.as_slice() {
                    [only] => target_error(only),
                    _ => format!("all {failed} targets failed"),
                },
            }
        } else {
            SourceStatus::Partial { succeeded, failed }
        };
        Self {
            source: source.into(),
            status,
            targets,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SourceStatus::Success
    }
}

fn target_error(t: &TargetReport) -> String {
    match (&t.error, t.failures.first()) {
        (Some(e), _) => format!("{}: {e}", t.target),
        (None, Some(f)) => format!("{}: {} failed: {}", t.target, f.entity, f.error),
        (None, None) => t.target.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.sources.iter().all(SourceReport::is_success)
    }

    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == name)
    }

    /// Totals over every target: `(created, updated, unchanged)`.
    pub fn totals(&self) -> (usize, usize, usize) {
        self.sources
            .iter()
            .flat_map(|s| &s.targets)
            .fold((0, 0, 0), |(c, u, n), t| {
                (c + t.created, u + t.updated, n + t.unchanged)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(name: &str) -> TargetReport {
        TargetReport::new(name)
    }

    #[test]
    fn mixed_targets_are_partial() {
        let r = SourceReport::from_targets(
            "docker",
            vec![ok("a"), TargetReport::failed("b", "refused"), ok("c")],
        );
        assert_eq!(
            r.status,
            SourceStatus::Partial {
                succeeded: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn single_failed_target_carries_its_error() {
        let r = SourceReport::from_targets("docker", vec![TargetReport::failed("root@h", "refused")]);
        assert_eq!(
            r.status,
            SourceStatus::Failed {
                error: "root@h: refused".into()
            }
        );
    }

    #[test]
    fn entity_failure_makes_target_fail() {
        let mut t = ok("pve1");
        t.fail("vm 100", "constraint");
        let r = SourceReport::from_targets("proxmox", vec![t]);
        assert!(matches!(r.status, SourceStatus::Failed { ref error } if error.contains("vm 100")));
    }

    #[test]
    fn no_targets_is_success() {
        assert!(SourceReport::from_targets("docker", vec![]).is_success());
    }

    #[test]
    fn status_serializes_flat() {
        let r = SourceReport::failed("proxmox", "down");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "down");
        assert_eq!(v["source"], "proxmox");
    }
}
