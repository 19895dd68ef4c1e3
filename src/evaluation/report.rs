use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

/// Score of one benchmark task. Field names are the persisted report format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScore {
    pub task_id: String,
    pub description: String,
    pub completed: bool,
    pub verified: bool,
    pub steps_used: usize,
    pub max_steps: u32,
    /// Wall-clock seconds for the whole task.
    pub response_time: f64,
    /// Share of steps whose turn was not `failed`.
    pub json_parse_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub task_completion_rate: f64,
    pub verification_rate: f64,
    /// Mean steps over completed tasks only.
    pub avg_steps: f64,
    pub avg_response_time_s: f64,
}

impl ReportSummary {
    pub fn from_scores(scores: &[TaskScore]) -> Self {
        let n = scores.len() as f64;
        let rate = |count: usize| if scores.is_empty() { 0.0 } else { count as f64 / n };
        let completed: Vec<&TaskScore> = scores.iter().filter(|s| s.completed).collect();
        let avg_steps = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|s| s.steps_used as f64).sum::<f64>() / completed.len() as f64
        };
        let avg_time = if scores.is_empty() {
            0.0
        } else {
            scores.iter().map(|s| s.response_time).sum::<f64>() / n
        };
        Self {
            task_completion_rate: round_to(rate(completed.len()), 4),
            verification_rate: round_to(rate(scores.iter().filter(|s| s.verified).count()), 4),
            avg_steps: round_to(avg_steps, 2),
            avg_response_time_s: round_to(avg_time, 2),
        }
    }
}

/// The persisted JSON document of one model run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub model_name: String,
    pub provider: String,
    /// Unix seconds.
    pub timestamp: f64,
    pub summary: ReportSummary,
    pub scores: Vec<TaskScore>,
}

impl BenchmarkReport {
    pub fn new(model_name: String, provider: String, scores: Vec<TaskScore>) -> Self {
        Self {
            model_name,
            provider,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            summary: ReportSummary::from_scores(&scores),
            scores,
        }
    }

    pub fn save(&self, path: &Path) -> PilotResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "benchmark report saved");
        Ok(())
    }

    pub fn load(path: &Path) -> PilotResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PilotError::Benchmark(format!("cannot read report {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// `report_<model>.json` with characters unsafe in file names replaced.
    pub fn default_file_name(&self) -> String {
        let safe: String = self
            .model_name
            .chars()
            .map(|c| if matches!(c, ':' | '/' | '\\') { '_' } else { c })
            .collect();
        format!("report_{safe}.json")
    }

    fn score(&self, task_id: &str) -> Option<&TaskScore> {
        self.scores.iter().find(|s| s.task_id == task_id)
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

const METRIC_WIDTH: usize = 30;
const MODEL_WIDTH: usize = 20;

fn summary_rows(r: &ReportSummary) -> [(&'static str, String); 4] {
    [
        ("Task Completion Rate %", format!("{:.1}%", r.task_completion_rate * 100.0)),
        ("Verification Rate %", format!("{:.1}%", r.verification_rate * 100.0)),
        ("Avg Steps", format!("{:.1}", r.avg_steps)),
        ("Avg Response Time (s)", format!("{:.1}", r.avg_response_time_s)),
    ]
}

fn task_cell(score: Option<&TaskScore>) -> String {
    match score {
        Some(s) => format!(
            "{} {}st {:.0}s",
            if s.completed { "✓" } else { "✗" },
            s.steps_used,
            s.response_time
        ),
        None => "—".to_string(),
    }
}

/// Task ids in first-seen order across all reports.
fn task_ids(reports: &[BenchmarkReport]) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for s in reports.iter().flat_map(|r| &r.scores) {
        if !ids.contains(&s.task_id.as_str()) {
            ids.push(&s.task_id);
        }
    }
    ids
}

/// Fixed-width plain-text table comparing several model runs side by side.
pub fn comparison_table(reports: &[BenchmarkReport]) -> String {
    let mut out = String::new();
    let total = METRIC_WIDTH + MODEL_WIDTH * reports.len();

    let _ = write!(out, "{:<METRIC_WIDTH$}", "Metric");
    for r in reports {
        let _ = write!(out, "{:>MODEL_WIDTH$}", truncate(&r.model_name, MODEL_WIDTH - 1));
    }
    out.push('\n');
    out.push_str(&"=".repeat(total));
    out.push('\n');

    let rows: Vec<_> = reports.iter().map(|r| summary_rows(&r.summary)).collect();
    for i in 0..4 {
        let label = rows.first().map(|r| r[i].0).unwrap_or_default();
        let _ = write!(out, "{label:<METRIC_WIDTH$}");
        for row in &rows {
            let _ = write!(out, "{:>MODEL_WIDTH$}", row[i].1);
        }
        out.push('\n');
    }

    out.push_str(&"-".repeat(total));
    out.push('\n');
    for id in task_ids(reports) {
        let _ = write!(out, "{:<METRIC_WIDTH$}", truncate(id, METRIC_WIDTH - 1));
        for r in reports {
            let _ = write!(out, "{:>MODEL_WIDTH$}", task_cell(r.score(id)));
        }
        out.push('\n');
    }
    out
}

/// Markdown rendering of the same comparison.
pub fn markdown_report(reports: &[BenchmarkReport]) -> String {
    let mut out = String::from("# Screen Agent Benchmark Report\n\n## Summary\n\n");

    out.push_str("| Metric |");
    for r in reports {
        let _ = write!(out, " {} |", r.model_name);
    }
    out.push_str("\n|---|");
    out.push_str(&"---|".repeat(reports.len()));
    out.push('\n');

    let rows: Vec<_> = reports.iter().map(|r| summary_rows(&r.summary)).collect();
    for i in 0..4 {
        let label = rows.first().map(|r| r[i].0).unwrap_or_default();
        let _ = write!(out, "| {label} |");
        for row in &rows {
            let _ = write!(out, " {} |", row[i].1);
        }
        out.push('\n');
    }

    out.push_str("\n## Per-Task Results\n\n| Task |");
    for r in reports {
        let _ = write!(out, " {} |", r.model_name);
    }
    out.push_str("\n|---|");
    out.push_str(&"---|".repeat(reports.len()));
    out.push('\n');
    for id in task_ids(reports) {
        let _ = write!(out, "| {id} |");
        for r in reports {
            let _ = write!(out, " {} |", task_cell(r.score(id)));
        }
        out.push('\n');
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(id: &str, completed: bool, verified: bool, steps: usize, secs: f64) -> TaskScore {
        TaskScore {
            task_id: id.into(),
            description: id.into(),
            completed,
            verified,
            steps_used: steps,
            max_steps: 10,
            response_time: secs,
            json_parse_rate: 1.0,
        }
    }

    #[test]
    fn test_summary_math() {
        let s = ReportSummary::from_scores(&[
            score("a", true, true, 4, 10.0),
            score("b", true, false, 6, 20.0),
            score("c", false, false, 10, 33.0),
        ]);
        assert_eq!(s.task_completion_rate, 0.6667);
        assert_eq!(s.verification_rate, 0.3333);
        assert_eq!(s.avg_steps, 5.0);
        assert_eq!(s.avg_response_time_s, 21.0);
    }

    #[test]
    fn test_empty_summary_is_zero() {
        let s = ReportSummary::from_scores(&[]);
        assert_eq!(s.task_completion_rate, 0.0);
        assert_eq!(s.avg_steps, 0.0);
    }

    #[test]
    fn test_report_json_shape() {
        let report = BenchmarkReport::new(
            "qwen3-vl:8b".into(),
            "ollama".into(),
            vec![score("a", true, true, 3, 12.5)],
        );
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["summary"]["task_completion_rate"], 1.0);
        assert_eq!(v["scores"][0]["json_parse_rate"], 1.0);
        assert_eq!(v["scores"][0]["steps_used"], 3);
        assert!(v["timestamp"].as_f64().unwrap() > 1.0e9);
        assert_eq!(report.default_file_name(), "report_qwen3-vl_8b.json");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let report = BenchmarkReport::new("m".into(), "p".into(), vec![score("a", false, false, 2, 1.0)]);
        report.save(&path).unwrap();
        assert_eq!(BenchmarkReport::load(&path).unwrap(), report);
        assert!(BenchmarkReport::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_comparison_table_marks_missing_tasks() {
        let a = BenchmarkReport::new(
            "model-a".into(),
            "ollama".into(),
            vec![score("open_notepad", true, true, 3, 12.0), score("open_calc", false, false, 10, 40.0)],
        );
        let b = BenchmarkReport::new("model-b".into(), "openai".into(), vec![score("open_notepad", true, false, 5, 20.0)]);
        let table = comparison_table(&[a, b]);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("Metric"));
        assert_eq!(lines[1].len(), 70);
        assert!(table.contains("Task Completion Rate %"));
        assert!(table.contains("50.0%"));
        assert!(table.contains("✓ 3st 12s"));
        let calc = lines.iter().find(|l| l.starts_with("open_calc")).unwrap();
        assert!(calc.contains("✗ 10st 40s"));
        assert!(calc.trim_end().ends_with('—'));
    }

    #[test]
    fn test_markdown_report_sections() {
        let a = BenchmarkReport::new("model-a".into(), "ollama".into(), vec![score("t1", true, true, 2, 3.0)]);
        let md = markdown_report(&[a]);
        assert!(md.starts_with("# Screen Agent Benchmark Report"));
        assert!(md.contains("## Summary"));
        assert!(md.contains("| Metric | model-a |"));
        assert!(md.contains("## Per-Task Results"));
        assert!(md.contains("| t1 | ✓ 2st 3s |"));
    }
}
