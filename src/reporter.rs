use crate::models::{
    AiRecommendation, BackupRecord, BackupResult, DiagnosisDocument, OptimizationResult,
    PerformanceData, Priority, RecommendationKind, RestoreOutcome,
};
use crate::notify::RunSummary;
use clap::ValueEnum;
use itertools::Itertools;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
pub enum ReporterError {
    #[snafu(display("Failed to write output: {}", source))]
    OutputError { source: std::io::Error },

    #[snafu(display("Failed to encode JSON output: {}", source))]
    JsonError { source: serde_json::Error },
}

type Result<T, E = ReporterError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    /// Markdown formatted report
    Markdown,
    /// JSON formatted report
    Json,
    /// Plain text summary
    Text,
}

/// Anything the CLI prints. JSON output comes from `Serialize`.
pub trait Report: Serialize {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()>;
    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()>;
}

pub struct Reporter {
    format: ReportFormat,
}

impl Reporter {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    pub fn report<R: Report + ?Sized>(&self, item: &R) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render(item, &mut handle)
    }

    pub fn render<R: Report + ?Sized>(&self, item: &R, out: &mut dyn Write) -> Result<()> {
        match self.format {
            ReportFormat::Markdown => item.write_markdown(out).context(OutputSnafu)?,
            ReportFormat::Json => {
                let json = serde_json::to_string_pretty(item).context(JsonSnafu)?;
                writeln!(out, "{}", json).context(OutputSnafu)?;
            }
            ReportFormat::Text => item.write_text(out).context(OutputSnafu)?,
        }
        Ok(())
    }
}

fn priority_badge(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "![HIGH](https://img.shields.io/badge/HIGH-red)",
        Priority::Medium => "![MEDIUM](https://img.shields.io/badge/MEDIUM-orange)",
        Priority::Low => "![LOW](https://img.shields.io/badge/LOW-blue)",
    }
}

fn priority_text(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "HIGH",
        Priority::Medium => "MED",
        Priority::Low => "LOW",
    }
}

fn kind_label(kind: RecommendationKind) -> &'static str {
    match kind {
        RecommendationKind::IndexOptimization => "Index optimization",
        RecommendationKind::EngineConversion => "Engine conversion",
        RecommendationKind::DataArchiving => "Data archiving",
        RecommendationKind::CacheCleanup => "Cache cleanup",
        RecommendationKind::ServerConfig => "Server configuration",
        RecommendationKind::QueryCache => "Query cache",
    }
}

fn mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

fn write_recommendations_markdown(
    out: &mut dyn Write,
    recommendations: &[AiRecommendation],
) -> std::io::Result<()> {
    if recommendations.is_empty() {
        return Ok(());
    }
    writeln!(out, "## Recommendations\n")?;
    for recommendation in recommendations {
        write!(
            out,
            "- {} **{}**: {}",
            priority_badge(recommendation.priority),
            kind_label(recommendation.kind),
            recommendation.description
        )?;
        if let Some(impact) = &recommendation.expected_impact {
            write!(out, " _({impact})_")?;
        }
        writeln!(out)?;
    }
    writeln!(out)
}

impl Report for DiagnosisDocument {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "# Database Analysis Report\n")?;
        writeln!(
            out,
            "- **Generated**: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(out, "- **Tables analyzed**: {}", self.tables.len())?;
        if let Some(health) = &self.health {
            writeln!(out, "- **Health score**: {}/100", health.score)?;
            writeln!(out, "- **Total overhead**: {}", mb(health.total_overhead_bytes))?;
            writeln!(out, "- **Missing indexes**: {}", health.missing_indexes)?;
        }
        writeln!(out)?;

        write_recommendations_markdown(out, &self.ai_recommendations)?;

        let flagged: Vec<_> = self
            .tables
            .values()
            .filter(|t| !t.suggestions.is_empty() || t.error.is_some())
            .collect();
        if !flagged.is_empty() {
            writeln!(out, "## Tables\n")?;
            for diagnosis in flagged {
                writeln!(out, "### {}\n", diagnosis.table)?;
                if let Some(error) = &diagnosis.error {
                    writeln!(out, "**Unavailable**: {error}\n")?;
                    continue;
                }
                if let Some(metrics) = &diagnosis.metrics {
                    writeln!(
                        out,
                        "**Rows**: {} | **Data**: {} | **Indexes**: {} | **Overhead**: {}\n",
                        metrics.row_count,
                        mb(metrics.data_size_bytes),
                        mb(metrics.index_size_bytes),
                        mb(metrics.overhead_bytes)
                    )?;
                }
                for suggestion in &diagnosis.suggestions {
                    writeln!(
                        out,
                        "- {} {}",
                        priority_badge(suggestion.priority),
                        suggestion.description
                    )?;
                }
                writeln!(out)?;
            }
        }

        if !self.query_patterns.is_empty() {
            writeln!(out, "## Slow Query Patterns\n")?;
            writeln!(out, "| Pattern | Count | Avg (s) | Max (s) |")?;
            writeln!(out, "|---------|-------|---------|---------|")?;
            for pattern in &self.query_patterns {
                writeln!(
                    out,
                    "| `{}` | {} | {:.2} | {:.2} |",
                    pattern.query_pattern.replace('|', "\\|"),
                    pattern.count,
                    pattern.avg_execution_time,
                    pattern.max_execution_time
                )?;
            }
            writeln!(out)?;
        }

        if !self.table_correlations.is_empty() {
            writeln!(out, "## Related Tables\n")?;
            for correlation in &self.table_correlations {
                writeln!(
                    out,
                    "- {} {}",
                    priority_badge(correlation.strength),
                    correlation.description
                )?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "Database Analysis Report")?;
        writeln!(out, "========================\n")?;
        writeln!(out, "Tables analyzed: {}", self.tables.len())?;
        if let Some(health) = &self.health {
            writeln!(out, "Health score:    {}/100", health.score)?;
        }
        writeln!(out)?;

        for recommendation in &self.ai_recommendations {
            writeln!(
                out,
                "  [{}] {}",
                priority_text(recommendation.priority),
                recommendation.description
            )?;
        }
        if !self.ai_recommendations.is_empty() {
            writeln!(out)?;
        }

        for diagnosis in self.tables.values() {
            if let Some(error) = &diagnosis.error {
                writeln!(out, "{}: unavailable ({error})", diagnosis.table)?;
                continue;
            }
            if diagnosis.issues.is_empty() {
                continue;
            }
            writeln!(out, "{}: {}", diagnosis.table, diagnosis.issues.join(", "))?;
        }
        Ok(())
    }
}

impl Report for OptimizationResult {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "# Optimization Report\n")?;
        writeln!(out, "- **Risk level**: {}", self.risk_level.as_str())?;
        writeln!(out, "- **Tables affected**: {}", self.tables_affected.len())?;
        writeln!(out, "- **Estimated impact**: {:.0}", self.performance_impact)?;
        if let Some(backup) = &self.backup_info {
            writeln!(out, "- **Backup**: `{}` (id {})", backup.filename, backup.backup_id)?;
        }
        writeln!(out)?;

        if self.optimization_actions.is_empty() {
            writeln!(out, "No changes were needed.\n")?;
        } else {
            writeln!(out, "## Actions\n")?;
            writeln!(out, "| Action | Table | Description |")?;
            writeln!(out, "|--------|-------|-------------|")?;
            for action in &self.optimization_actions {
                writeln!(
                    out,
                    "| {} | {} | {} |",
                    action.kind.as_str(),
                    action.table.as_deref().unwrap_or("-"),
                    action.description
                )?;
            }
            writeln!(out)?;
        }

        if !self.recommendations.is_empty() {
            writeln!(out, "## Recommendations\n")?;
            for recommendation in &self.recommendations {
                writeln!(out, "- {recommendation}")?;
            }
            writeln!(out)?;
        }

        if !self.warnings.is_empty() {
            writeln!(out, "## Warnings\n")?;
            for warning in &self.warnings {
                writeln!(out, "- {warning}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "Optimization ({}): {} actions on {} tables, impact {:.0}",
            self.risk_level.as_str(),
            self.optimization_actions.len(),
            self.tables_affected.len(),
            self.performance_impact
        )?;
        for action in &self.optimization_actions {
            writeln!(out, "  - {}", action.description)?;
        }
        for recommendation in &self.recommendations {
            writeln!(out, "  * {recommendation}")?;
        }
        for warning in &self.warnings {
            writeln!(out, "  ! {warning}")?;
        }
        Ok(())
    }
}

impl Report for PerformanceData {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "# Performance Data\n")?;
        writeln!(
            out,
            "- **Collected**: {}",
            self.collected_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            out,
            "- **Server version**: {}",
            self.server_info.version.as_deref().unwrap_or("Unknown")
        )?;
        if self.slow_queries.available {
            writeln!(out, "- **Slow queries captured**: {}", self.slow_queries.queries.len())?;
        } else {
            writeln!(out, "- **Slow query log**: not available")?;
        }
        writeln!(
            out,
            "- **Query cache**: {}",
            match self.query_cache.hit_ratio {
                Some(ratio) if self.query_cache.enabled => format!("enabled, {ratio:.1}% hit ratio"),
                _ if self.query_cache.enabled => "enabled".to_string(),
                _ => "disabled".to_string(),
            }
        )?;
        writeln!(out)?;

        let busy: Vec<_> = self
            .table_stats
            .iter()
            .filter_map(|(table, t)| t.query_stats.as_ref().map(|s| (table, s)))
            .sorted_by(|a, b| b.1.query_count.cmp(&a.1.query_count))
            .collect();
        if !busy.is_empty() {
            writeln!(out, "| Table | Queries | Total time (s) |")?;
            writeln!(out, "|-------|---------|----------------|")?;
            for (table, stats) in busy {
                writeln!(
                    out,
                    "| {} | {} | {:.2} |",
                    table, stats.query_count, stats.total_time_seconds
                )?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "Performance data collected {}: {} slow queries, {} tables with statistics",
            self.collected_at.format("%Y-%m-%d %H:%M:%S"),
            self.slow_queries.queries.len(),
            self.table_stats.len()
        )
    }
}

impl Report for BackupResult {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "# Backup Created\n")?;
        writeln!(out, "- **Id**: {}", self.backup_id)?;
        writeln!(out, "- **File**: `{}`", self.filepath)?;
        writeln!(out, "- **Tables**: {}", self.table_count)?;
        writeln!(out, "- **Size**: {}", mb(self.byte_size))
    }

    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "Backup {} written to {} ({} tables, {})",
            self.backup_id,
            self.filepath,
            self.table_count,
            mb(self.byte_size)
        )
    }
}

impl Report for [BackupRecord] {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "# Backups\n")?;
        if self.is_empty() {
            return writeln!(out, "No backups recorded.");
        }
        writeln!(out, "| Id | Created | Risk | Tables | Size | Restored |")?;
        writeln!(out, "|----|---------|------|--------|------|----------|")?;
        for record in self {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                record.id,
                record.created_at.format("%Y-%m-%d %H:%M:%S"),
                record.risk_level.as_str(),
                record.table_count,
                mb(record.byte_size),
                record
                    .restored_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string())
            )?;
        }
        Ok(())
    }

    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for record in self {
            writeln!(
                out,
                "{:>5}  {}  {:<6}  {}",
                record.id,
                record.created_at.format("%Y-%m-%d %H:%M:%S"),
                record.risk_level.as_str(),
                record.filename
            )?;
        }
        Ok(())
    }
}

impl Report for RestoreOutcome {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "# Restore\n")?;
        writeln!(out, "{} ({} statements)", self.message, self.statements_executed)
    }

    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "{} ({} statements)", self.message, self.statements_executed)
    }
}

impl Report for RunSummary {
    fn write_markdown(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "# {}\n", self.subject())?;
        writeln!(out, "- **Risk level**: {}", self.risk_level.as_str())?;
        writeln!(out, "- **Tables affected**: {}", self.tables_affected)?;
        writeln!(out, "- **Estimated impact**: {:.0}", self.performance_impact)?;
        for recommendation in &self.recommendations {
            writeln!(out, "- {recommendation}")?;
        }
        Ok(())
    }

    fn write_text(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "{}: {} tables affected, impact {:.0}",
            self.subject(),
            self.tables_affected,
            self.performance_impact
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskLevel;
    use crate::models::{ActionKind, OptimizationAction};

    fn result() -> OptimizationResult {
        let mut action = OptimizationAction::new(
            ActionKind::OptimizeTable,
            "Optimized table wp_logs, removed 2.00 MB overhead".into(),
        );
        action.table = Some("wp_logs".into());
        OptimizationResult {
            risk_level: RiskLevel::Low,
            tables_affected: vec!["wp_logs".into()],
            optimization_actions: vec![action],
            performance_impact: 5.0,
            recommendations: vec!["Review autoloaded options".into()],
            backup_info: None,
            warnings: Vec::new(),
        }
    }

    fn render<R: Report + ?Sized>(format: ReportFormat, item: &R) -> String {
        let mut buffer = Vec::new();
        Reporter::new(format).render(item, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn markdown_lists_actions() {
        let output = render(ReportFormat::Markdown, &result());
        assert!(output.starts_with("# Optimization Report"));
        assert!(output.contains("| optimize_table | wp_logs | Optimized table wp_logs, removed 2.00 MB overhead |"));
        assert!(output.contains("- Review autoloaded options"));
    }

    #[test]
    fn json_is_the_serialized_structure() {
        let output = render(ReportFormat::Json, &result());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["risk_level"], "low");
        assert_eq!(value["performance_impact"], 5.0);
    }

    #[test]
    fn text_summarizes_in_one_line() {
        let output = render(ReportFormat::Text, &result());
        assert!(output.starts_with("Optimization (low): 1 actions on 1 tables, impact 5"));
    }

    #[test]
    fn empty_backup_list_says_so() {
        let records: Vec<BackupRecord> = Vec::new();
        let output = render(ReportFormat::Markdown, records.as_slice());
        assert!(output.contains("No backups recorded."));
    }

    #[test]
    fn analysis_report_shows_unavailable_tables() {
        let mut doc = DiagnosisDocument::empty();
        doc.tables.insert(
            "wp_secret".into(),
            crate::models::TableDiagnosis::unavailable("wp_secret", "access denied".into()),
        );
        let output = render(ReportFormat::Text, &doc);
        assert!(output.contains("wp_secret: unavailable (access denied)"));
    }
}
