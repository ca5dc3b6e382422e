//! Plain-text rendering of scan results for the terminal.

use codeguard_core::models::{ScanResult, Severity};
use std::fmt::Write;
use storage::models::ScanOverview;

pub fn summary_table(result: &ScanResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scan {} {}", result.scan_id, result.status.as_str());
    let _ = writeln!(out, "Source:   {}", result.repository_source);
    let _ = writeln!(out, "Files:    {}/{} scanned", result.scanned_files, result.total_files);
    if let Some(err) = &result.summary.error {
        let _ = writeln!(out, "Error:    {err}");
        return out;
    }
    let _ = writeln!(out, "Findings: {}", result.summary.total_issues);
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<10} {:>5}", "SEVERITY", "COUNT");
    for sev in Severity::ALL {
        let _ = writeln!(out, "{:<10} {:>5}", sev.as_str(), result.summary.by_severity.get(sev));
    }
    let kinds = &result.summary.by_kind;
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<14} {:>5}", "KIND", "COUNT");
    let _ = writeln!(out, "{:<14} {:>5}", "vulnerability", kinds.vulnerability);
    let _ = writeln!(out, "{:<14} {:>5}", "code_review", kinds.code_review);
    let _ = writeln!(out, "{:<14} {:>5}", "auto_comment", kinds.auto_comment);

    if !result.findings.is_empty() {
        let _ = writeln!(out);
        let mut sorted: Vec<_> = result.findings.iter().collect();
        sorted.sort_by_key(|f| f.severity);
        for f in sorted {
            let loc = &f.location;
            let func = loc
                .function_name
                .as_deref()
                .map(|n| format!(" in {n}()"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "[{}] {} {}:{}-{}{} {}",
                f.severity.as_str().to_uppercase(),
                f.kind,
                loc.file_path,
                loc.start_line,
                loc.end_line,
                func,
                f.title
            );
        }
    }
    out
}

pub fn scan_list(scans: &[ScanOverview]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36}  {:<11}  {:<20}  {:>5}  {:>8}  SOURCE",
        "SCAN ID", "STATUS", "STARTED", "FILES", "FINDINGS"
    );
    for s in scans {
        let _ = writeln!(
            out,
            "{:<36}  {:<11}  {:<20}  {:>5}  {:>8}  {}",
            s.scan_id,
            s.status.as_str(),
            s.started_at.format("%Y-%m-%d %H:%M:%S"),
            s.total_files,
            s.summary.total_issues,
            s.repository_source
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeguard_core::models::{Finding, FindingKind, Location};

    #[test]
    fn table_lists_counts_and_findings_by_severity() {
        let finding = |sev, title: &str| Finding {
            id: title.to_string(),
            kind: FindingKind::Vulnerability,
            severity: sev,
            title: title.to_string(),
            description: String::new(),
            location: Location {
                file_path: "app.py".into(),
                start_line: 3,
                end_line: 4,
                function_name: Some("run".into()),
            },
            rule_id: None,
            cwe_id: None,
            owasp_category: None,
            suggestion: None,
            code_snippet: None,
            fixed_code: None,
        };
        let result = ScanResult::new("s1", "./repo").complete(
            vec![finding(Severity::Low, "Weak hash"), finding(Severity::Critical, "RCE")],
            1,
        );
        let table = summary_table(&result);
        assert!(table.contains("Scan s1 completed"));
        assert!(table.contains("Findings: 2"));
        let rce = table.find("[CRITICAL] vulnerability app.py:3-4 in run() RCE").unwrap();
        let weak = table.find("[LOW]").unwrap();
        assert!(rce < weak);
    }

    #[test]
    fn failed_scan_shows_error_only() {
        let result = ScanResult::new("s2", "https://example.invalid/x.git").fail("clone failed");
        let table = summary_table(&result);
        assert!(table.contains("Error:    clone failed"));
        assert!(!table.contains("SEVERITY"));
    }
}
