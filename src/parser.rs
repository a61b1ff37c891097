//! Splits a tagged model reply into a short verdict and a detailed report.
//!
//! The reply is expected to follow `[SUMMARY] ... [ANALYSIS] ...`. The prompt
//! that asks for this layout lives in `prompts.rs` and must be kept in step
//! with the markers here.

use crate::annotate::highlight_keywords;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Bumped whenever the marker layout changes.
pub const MARKER_PROTOCOL_VERSION: u32 = 1;
pub const SUMMARY_MARKER: &str = "[SUMMARY]";
pub const ANALYSIS_MARKER: &str = "[ANALYSIS]";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub analysis: String,
}

/// What to show as the summary when the reply carries no markers at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SummaryFallback {
    #[default]
    Empty,
    FirstLine,
}

impl SummaryFallback {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "empty" | "none" => Some(Self::Empty),
            "first-line" | "firstline" | "first_line" => Some(Self::FirstLine),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseParser {
    pub summary_fallback: SummaryFallback,
}

struct MarkerPatterns {
    summary: Regex,
    analysis: Regex,
}

fn patterns() -> &'static MarkerPatterns {
    static PATTERNS: OnceLock<MarkerPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| MarkerPatterns {
        summary: Regex::new(r"(?is)\[SUMMARY\](.*?)\[ANALYSIS\]").expect("summary pattern is valid"),
        analysis: Regex::new(r"(?is)\[ANALYSIS\](.*)").expect("analysis pattern is valid"),
    })
}

impl ResponseParser {
    pub fn new(summary_fallback: SummaryFallback) -> Self {
        Self { summary_fallback }
    }

    pub fn parse(&self, raw: &str) -> AnalysisResult {
        let (summary, analysis) = self.split(raw);
        AnalysisResult {
            summary: highlight_keywords(&summary),
            analysis: highlight_keywords(&analysis),
        }
    }

    /// Marker extraction without annotation.
    pub fn split(&self, raw: &str) -> (String, String) {
        let p = patterns();

        // Summary needs its closing marker; otherwise it stays empty rather
        // than swallowing the rest of the reply.
        let summary = p
            .summary
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let analysis = p
            .analysis
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        if summary.is_empty() && analysis.is_empty() {
            let summary = match self.summary_fallback {
                SummaryFallback::Empty => String::new(),
                SummaryFallback::FirstLine => raw
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or_default()
                    .to_string(),
            };
            return (summary, raw.trim().to_string());
        }

        (summary, analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_markers() {
        let result = ResponseParser::default().parse("[SUMMARY] foo [ANALYSIS] bar");
        assert_eq!(result.summary, "foo");
        assert_eq!(result.analysis, "bar");
    }

    #[test]
    fn test_markers_are_case_insensitive() {
        let (summary, analysis) =
            ResponseParser::default().split("[summary]\nshort\n[Analysis]\n## Long\nbody");
        assert_eq!(summary, "short");
        assert_eq!(analysis, "## Long\nbody");
    }

    #[test]
    fn test_no_markers_falls_back_to_analysis() {
        let result = ResponseParser::default().parse("hello world");
        assert_eq!(result.summary, "");
        assert_eq!(result.analysis, "hello world");

        let first_line = ResponseParser::new(SummaryFallback::FirstLine)
            .parse("\n  headline  \nsecond line");
        assert_eq!(first_line.summary, "headline");
        assert_eq!(first_line.analysis, "headline  \nsecond line");
    }

    #[test]
    fn test_empty_marked_segments_fall_back_to_raw_reply() {
        let (summary, analysis) = ResponseParser::default().split("[SUMMARY]\n[ANALYSIS]\n");
        assert_eq!(summary, "");
        assert_eq!(analysis, "[SUMMARY]\n[ANALYSIS]");
    }

    #[test]
    fn test_summary_without_closing_marker_fails_closed() {
        let raw = "[SUMMARY] dangling verdict with no report";
        let (summary, analysis) = ResponseParser::default().split(raw);
        assert_eq!(summary, "");
        // Nothing matched, so the whole reply becomes the report.
        assert_eq!(analysis, raw);
    }

    #[test]
    fn test_analysis_only() {
        let (summary, analysis) =
            ResponseParser::new(SummaryFallback::FirstLine).split("preamble\n[ANALYSIS] report");
        assert_eq!(summary, "");
        assert_eq!(analysis, "report");
    }

    #[test]
    fn test_summary_stops_at_first_analysis_marker() {
        let (summary, analysis) = ResponseParser::default()
            .split("[SUMMARY]a[ANALYSIS]b[ANALYSIS]c");
        assert_eq!(summary, "a");
        assert_eq!(analysis, "b[ANALYSIS]c");
    }

    #[test]
    fn test_segments_are_annotated_independently() {
        let result = ResponseParser::default()
            .parse("[SUMMARY]買入\n[ANALYSIS]## Trend\n**Bullish**，短線做多");
        assert_eq!(result.summary, r#"<span class="hl-buy">買入</span>"#);
        assert!(result.analysis.starts_with("## Trend\n**Bullish**"));
        assert!(result.analysis.contains(r#"<span class="hl-buy">做多</span>"#));
        assert!(!result.analysis.contains(SUMMARY_MARKER));
        assert!(!result.analysis.contains(ANALYSIS_MARKER));
    }

    #[test]
    fn test_summary_fallback_parse() {
        assert_eq!(SummaryFallback::parse("first-line"), Some(SummaryFallback::FirstLine));
        assert_eq!(SummaryFallback::parse(" EMPTY "), Some(SummaryFallback::Empty));
        assert_eq!(SummaryFallback::parse("bogus"), None);
    }
}
