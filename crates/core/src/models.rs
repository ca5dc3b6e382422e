use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One ingested source file. Paths are relative to the working copy root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub relative_path: String,
    pub content: String,
    pub language: String,
    pub byte_size: u64,
    pub line_count: usize,
}

impl FileRecord {
    pub fn new(relative_path: impl Into<String>, content: impl Into<String>, language: &str) -> Self {
        let content = content.into();
        Self {
            relative_path: relative_path.into(),
            byte_size: content.len() as u64,
            line_count: content.lines().count(),
            content,
            language: language.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Fields carried in by the caller (`file_size`, `lines`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub file_path: String,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Vulnerability,
    CodeReview,
    AutoComment,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Vulnerability => "vulnerability",
            FindingKind::CodeReview => "code_review",
            FindingKind::AutoComment => "auto_comment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vulnerability" => Some(FindingKind::Vulnerability),
            "code_review" => Some(FindingKind::CodeReview),
            "auto_comment" => Some(FindingKind::AutoComment),
            _ => None,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Case-insensitive; `None` for anything outside the five levels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owasp_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::InProgress => "in_progress",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "in_progress" => Some(ScanStatus::InProgress),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub vulnerability: usize,
    pub code_review: usize,
    pub auto_comment: usize,
}

impl KindCounts {
    fn bump(&mut self, kind: FindingKind) {
        match kind {
            FindingKind::Vulnerability => self.vulnerability += 1,
            FindingKind::CodeReview => self.code_review += 1,
            FindingKind::AutoComment => self.auto_comment += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.vulnerability + self.code_review + self.auto_comment
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_issues: usize,
    pub by_severity: SeverityCounts,
    pub by_kind: KindCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = ScanSummary {
            total_issues: findings.len(),
            ..Default::default()
        };
        for f in findings {
            summary.by_severity.bump(f.severity);
            summary.by_kind.bump(f.kind);
        }
        summary
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ScanSummary {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Outcome of one scan. Created `Pending`, moved to `InProgress` when work
/// starts, and finalized once through [`ScanResult::complete`] or
/// [`ScanResult::fail`], both of which consume the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub status: ScanStatus,
    pub repository_source: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub scanned_files: usize,
    pub findings: Vec<Finding>,
    pub summary: ScanSummary,
}

impl ScanResult {
    pub fn new(scan_id: impl Into<String>, repository_source: impl Into<String>) -> Self {
        Self {
            scan_id: scan_id.into(),
            status: ScanStatus::Pending,
            repository_source: repository_source.into(),
            started_at: Utc::now(),
            completed_at: None,
            total_files: 0,
            scanned_files: 0,
            findings: Vec::new(),
            summary: ScanSummary::default(),
        }
    }

    pub fn mark_in_progress(&mut self) {
        if self.status == ScanStatus::Pending {
            self.status = ScanStatus::InProgress;
        }
    }

    pub fn complete(mut self, findings: Vec<Finding>, scanned_files: usize) -> Self {
        self.summary = ScanSummary::from_findings(&findings);
        self.findings = findings;
        self.scanned_files = scanned_files;
        self.status = ScanStatus::Completed;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.total_files = 0;
        self.scanned_files = 0;
        self.findings.clear();
        self.summary = ScanSummary::failed(error);
        self.status = ScanStatus::Failed;
        self.completed_at = Some(Utc::now());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: FindingKind, severity: Severity) -> Finding {
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            title: "t".into(),
            description: "d".into(),
            location: Location {
                file_path: "a.py".into(),
                start_line: 1,
                end_line: 1,
                function_name: None,
            },
            rule_id: None,
            cwe_id: None,
            owasp_category: None,
            suggestion: None,
            code_snippet: None,
            fixed_code: None,
        }
    }

    #[test]
    fn summary_counts_sum_to_findings() {
        let findings = vec![
            finding(FindingKind::Vulnerability, Severity::High),
            finding(FindingKind::Vulnerability, Severity::Medium),
            finding(FindingKind::CodeReview, Severity::Info),
            finding(FindingKind::AutoComment, Severity::Info),
        ];
        let s = ScanSummary::from_findings(&findings);
        assert_eq!(s.total_issues, 4);
        assert_eq!(s.by_severity.total(), 4);
        assert_eq!(s.by_kind.total(), 4);
        assert_eq!(s.by_severity.get(Severity::Info), 2);
        assert_eq!(s.by_kind.vulnerability, 2);
    }

    #[test]
    fn failing_a_scan_zeroes_counts_and_records_error() {
        let mut r = ScanResult::new("s1", "/nowhere");
        r.mark_in_progress();
        r.total_files = 3;
        let r = r.fail("boom");
        assert_eq!(r.status, ScanStatus::Failed);
        assert_eq!(r.total_files, 0);
        assert!(r.findings.is_empty());
        assert_eq!(r.summary.error.as_deref(), Some("boom"));
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn severity_parse_is_lenient_about_case() {
        assert_eq!(Severity::parse(" HIGH "), Some(Severity::High));
        assert_eq!(Severity::parse("severe"), None);
    }

    #[test]
    fn file_record_counts_lines_like_str_lines() {
        assert_eq!(FileRecord::new("a", "", "python").line_count, 0);
        assert_eq!(FileRecord::new("a", "x\ny\n", "python").line_count, 2);
        assert_eq!(FileRecord::new("a", "x\ny", "python").line_count, 2);
    }

    #[test]
    fn scan_result_serializes_nested_findings() {
        let r = ScanResult::new("s2", "repo")
            .complete(vec![finding(FindingKind::CodeReview, Severity::Low)], 1);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["findings"][0]["kind"], "code_review");
        assert_eq!(json["summary"]["by_severity"]["low"], 1);
        let back: ScanResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
