use anyhow::{anyhow, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use codeguard_core::models::{Finding, FindingKind, Location, ScanResult, ScanStatus, ScanSummary, Severity};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanRow {
    pub scan_id: String,
    pub status: String,
    pub repository_source: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub total_files: i64,
    pub scanned_files: i64,
    pub summary_json: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FindingRow {
    pub id: String,
    pub scan_id: String,
    pub position: i64,
    pub kind: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub function_name: Option<String>,
    pub rule_id: Option<String>,
    pub cwe_id: Option<String>,
    pub owasp_category: Option<String>,
    pub suggestion: Option<String>,
    pub code_snippet: Option<String>,
    pub fixed_code: Option<String>,
}

/// A scan without its findings, as shown in listings.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOverview {
    pub scan_id: String,
    pub status: ScanStatus,
    pub repository_source: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub scanned_files: usize,
    pub summary: ScanSummary,
}

pub(crate) fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp {s}"))?
        .with_timezone(&Utc))
}

impl ScanRow {
    pub fn from_result(r: &ScanResult) -> anyhow::Result<Self> {
        Ok(Self {
            scan_id: r.scan_id.clone(),
            status: r.status.as_str().to_string(),
            repository_source: r.repository_source.clone(),
            started_at: timestamp(&r.started_at),
            completed_at: r.completed_at.as_ref().map(timestamp),
            total_files: r.total_files as i64,
            scanned_files: r.scanned_files as i64,
            summary_json: serde_json::to_string(&r.summary)?,
        })
    }

    pub fn into_overview(self) -> anyhow::Result<ScanOverview> {
        Ok(ScanOverview {
            status: ScanStatus::parse(&self.status).ok_or_else(|| anyhow!("unknown scan status {}", self.status))?,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            total_files: self.total_files.max(0) as usize,
            scanned_files: self.scanned_files.max(0) as usize,
            summary: serde_json::from_str(&self.summary_json).context("summary json")?,
            scan_id: self.scan_id,
            repository_source: self.repository_source,
        })
    }
}

impl ScanOverview {
    pub fn with_findings(self, findings: Vec<Finding>) -> ScanResult {
        ScanResult {
            scan_id: self.scan_id,
            status: self.status,
            repository_source: self.repository_source,
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_files: self.total_files,
            scanned_files: self.scanned_files,
            findings,
            summary: self.summary,
        }
    }
}

impl FindingRow {
    pub fn from_finding(scan_id: &str, position: usize, f: &Finding) -> Self {
        Self {
            id: f.id.clone(),
            scan_id: scan_id.to_string(),
            position: position as i64,
            kind: f.kind.as_str().to_string(),
            severity: f.severity.as_str().to_string(),
            title: f.title.clone(),
            description: f.description.clone(),
            file_path: f.location.file_path.clone(),
            start_line: f.location.start_line as i64,
            end_line: f.location.end_line as i64,
            function_name: f.location.function_name.clone(),
            rule_id: f.rule_id.clone(),
            cwe_id: f.cwe_id.clone(),
            owasp_category: f.owasp_category.clone(),
            suggestion: f.suggestion.clone(),
            code_snippet: f.code_snippet.clone(),
            fixed_code: f.fixed_code.clone(),
        }
    }

    pub fn into_finding(self) -> anyhow::Result<Finding> {
        Ok(Finding {
            kind: FindingKind::parse(&self.kind).ok_or_else(|| anyhow!("unknown finding kind {}", self.kind))?,
            severity: Severity::parse(&self.severity).ok_or_else(|| anyhow!("unknown severity {}", self.severity))?,
            location: Location {
                file_path: self.file_path,
                start_line: self.start_line.max(0) as usize,
                end_line: self.end_line.max(0) as usize,
                function_name: self.function_name,
            },
            id: self.id,
            title: self.title,
            description: self.description,
            rule_id: self.rule_id,
            cwe_id: self.cwe_id,
            owasp_category: self.owasp_category,
            suggestion: self.suggestion,
            code_snippet: self.code_snippet,
            fixed_code: self.fixed_code,
        })
    }
}
