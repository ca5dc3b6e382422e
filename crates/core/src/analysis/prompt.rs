use crate::models::Chunk;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str =
    "You are an expert security engineer and code reviewer. Always respond with valid JSON only.";

/// Hard ceiling on retrieved chunks placed in one prompt, whatever the
/// configured `context_limit`.
pub const MAX_CONTEXT_CHUNKS: usize = 3;

const OUTPUT_FORMAT: &str = r#"## Output Format (JSON):

{
  "vulnerabilities": [
    {
      "severity": "critical|high|medium|low",
      "title": "Vulnerability title",
      "description": "Detailed description",
      "start_line": 10,
      "end_line": 15,
      "cwe_id": "CWE-79",
      "owasp_category": "A03:2021 - Injection",
      "suggestion": "How to fix",
      "code_snippet": "vulnerable code",
      "fixed_code": "fixed code"
    }
  ],
  "code_review": [
    {
      "severity": "info|low|medium",
      "title": "Review finding title",
      "description": "Description",
      "start_line": 20,
      "end_line": 25,
      "suggestion": "Improvement suggestion",
      "code_snippet": "current code",
      "fixed_code": "improved code"
    }
  ],
  "auto_comments": [
    {
      "line": 30,
      "comment": "Explanation of complex logic"
    }
  ]
}

Return ONLY valid JSON, no markdown formatting or additional text."#;

/// Renders the analysis prompt. At most `context_limit` retrieved chunks, and
/// never more than [`MAX_CONTEXT_CHUNKS`], are included in the order given.
pub fn build_prompt(code: &str, language: &str, file_path: &str, context: &[Chunk], context_limit: usize) -> String {
    let context_limit = context_limit.min(MAX_CONTEXT_CHUNKS);
    let mut context_text = String::new();
    if context_limit > 0 && !context.is_empty() {
        context_text.push_str("\n\n## Related Code Context:\n");
        for chunk in context.iter().take(context_limit) {
            let _ = write!(
                context_text,
                "\n### {} (lines {}-{}):\n```{}\n{}\n```\n",
                chunk.file_path, chunk.start_line, chunk.end_line, chunk.language, chunk.content
            );
        }
    }

    format!(
        "You are an expert security engineer and code reviewer. Analyze the following {language} code for:\n\n\
         1. **Vulnerabilities**: Detect OWASP Top 10, CWE patterns, insecure functions, hardcoded secrets, weak crypto, SQL injection, XSS, RCE, etc.\n\
         2. **Code Review**: Suggest improvements for performance, readability, idioms, refactoring, design patterns.\n\
         3. **Auto-Comments**: Add inline comments explaining complex logic, edge cases, or missing documentation.\n\
         {context_text}\n\n\
         ## Code to Analyze:\n\n\
         File: {file_path}\n\
         Language: {language}\n\n\
         ```{language}\n{code}\n```\n\n\
         {OUTPUT_FORMAT}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn ctx(i: usize) -> Chunk {
        Chunk {
            content: format!("helper_{i}()"),
            file_path: format!("lib/{i}.py"),
            language: "python".into(),
            start_line: i,
            end_line: i + 2,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn context_is_capped() {
        let chunks: Vec<Chunk> = (1..=5).map(ctx).collect();
        let prompt = build_prompt("def f(p): return p", "python", "a.py", &chunks, 3);
        assert!(prompt.contains("### lib/1.py (lines 1-3):"));
        assert!(prompt.contains("### lib/3.py (lines 3-5):"));
        assert!(!prompt.contains("lib/4.py"));
        assert!(prompt.contains("```python\ndef f(p): return p\n```"));
        assert!(prompt.ends_with("no markdown formatting or additional text."));
    }

    #[test]
    fn configured_limit_cannot_exceed_three_chunks() {
        let chunks: Vec<Chunk> = (1..=10).map(ctx).collect();
        let prompt = build_prompt("def f(p): return p", "python", "a.py", &chunks, 10);
        assert_eq!(prompt.matches("\n### ").count(), MAX_CONTEXT_CHUNKS);
        assert!(!prompt.contains("lib/4.py"));
    }

    #[test]
    fn no_context_section_without_chunks() {
        let prompt = build_prompt("x = 1", "python", "a.py", &[], 3);
        assert!(!prompt.contains("Related Code Context"));
        assert!(prompt.contains("File: a.py"));
    }
}
