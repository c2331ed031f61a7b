use crate::config::RiskLevel;
use crate::models::OptimizationResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// What a scheduled run reports once it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub recipient: Option<String>,
    pub risk_level: RiskLevel,
    pub tables_affected: usize,
    pub performance_impact: f64,
    pub recommendations: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_result(result: &OptimizationResult, recipient: Option<String>) -> Self {
        Self {
            recipient,
            risk_level: result.risk_level,
            tables_affected: result.tables_affected.len(),
            performance_impact: result.performance_impact,
            recommendations: result.recommendations.clone(),
            completed_at: Utc::now(),
        }
    }

    pub fn subject(&self) -> &'static str {
        "Database Optimization Complete"
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, summary: &RunSummary);
}

/// Writes the summary to the log. Delivery elsewhere is up to the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, summary: &RunSummary) {
        info!(
            recipient = summary.recipient.as_deref().unwrap_or("-"),
            risk_level = summary.risk_level.as_str(),
            tables_affected = summary.tables_affected,
            performance_impact = summary.performance_impact,
            "{}",
            summary.subject()
        );
        for recommendation in &summary.recommendations {
            info!("Recommendation: {recommendation}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_tables() {
        let result = OptimizationResult {
            risk_level: RiskLevel::Medium,
            tables_affected: vec!["wp_posts".into(), "wp_postmeta".into()],
            optimization_actions: Vec::new(),
            performance_impact: 25.0,
            recommendations: vec!["Check autoload".into()],
            backup_info: None,
            warnings: Vec::new(),
        };
        let summary = RunSummary::from_result(&result, Some("ops@example.test".into()));
        assert_eq!(summary.tables_affected, 2);
        assert_eq!(summary.performance_impact, 25.0);
        assert_eq!(summary.recipient.as_deref(), Some("ops@example.test"));
        assert_eq!(summary.recommendations, vec!["Check autoload"]);
    }
}
