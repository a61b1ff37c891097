use crate::annotate::is_highlight_tag;
use pulldown_cmark::{Event, Options, Parser, html};

/// Renders the analysis report. Highlight spans pass through; any other raw
/// HTML in model output is escaped.
pub fn to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::InlineHtml(tag) if is_highlight_tag(&tag) => Event::InlineHtml(tag),
        Event::InlineHtml(raw) | Event::Html(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_and_bold() {
        let out = to_html("## 1. 趨勢診斷\n**多頭排列**");
        assert!(out.contains("<h2>1. 趨勢診斷</h2>"));
        assert!(out.contains("<strong>多頭排列</strong>"));
    }

    #[test]
    fn test_highlight_spans_survive() {
        let out = to_html(r#"建議<span class="hl-buy">買入</span>"#);
        assert!(out.contains(r#"<span class="hl-buy">買入</span>"#));
    }

    #[test]
    fn test_other_markup_is_escaped() {
        let out = to_html(r#"看跌 <img src=x onerror="alert(1)"> 後續"#);
        assert!(!out.contains("<img"));
        assert!(out.contains("&lt;img"));

        let block = to_html("<div>\nraw\n</div>");
        assert!(!block.contains("<div>"));
    }

    #[test]
    fn test_tables_render() {
        let out = to_html("| 支撐 | 壓力 |\n|---|---|\n| 100 | 120 |");
        assert!(out.contains("<table>"));
        assert!(out.contains("<td>100</td>"));
    }
}
