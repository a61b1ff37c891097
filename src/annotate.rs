//! Semantic highlighting of trading vocabulary in model output.
//!
//! Terms are wrapped in `<span class="hl-*">` markup so both the browser page
//! and the terminal renderer can color buy / sell / wait recommendations.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sentiment {
    Buy,
    Sell,
    Wait,
}

impl Sentiment {
    pub fn class(self) -> &'static str {
        match self {
            Self::Buy => "hl-buy",
            Self::Sell => "hl-sell",
            Self::Wait => "hl-wait",
        }
    }

    pub fn from_class(class: &str) -> Option<Self> {
        match class {
            "hl-buy" => Some(Self::Buy),
            "hl-sell" => Some(Self::Sell),
            "hl-wait" => Some(Self::Wait),
            _ => None,
        }
    }

    fn vocabulary(self) -> &'static [&'static str] {
        match self {
            Self::Buy => &["買入", "做多", "多單", "看漲"],
            Self::Sell => &["賣出", "做空", "空單", "看跌"],
            Self::Wait => &["觀望", "盤整", "中性", "等待"],
        }
    }
}

/// Application order. Each category runs over the output of the previous one.
pub const SENTIMENT_ORDER: [Sentiment; 3] = [Sentiment::Buy, Sentiment::Sell, Sentiment::Wait];

struct Highlighter {
    tag: Regex,
    wrapper: Regex,
    categories: Vec<(Sentiment, Regex)>,
}

fn highlighter() -> &'static Highlighter {
    static HIGHLIGHTER: OnceLock<Highlighter> = OnceLock::new();
    HIGHLIGHTER.get_or_init(|| {
        let categories = SENTIMENT_ORDER
            .iter()
            .map(|sentiment| {
                let alternation = sentiment
                    .vocabulary()
                    .iter()
                    .map(|term| regex::escape(term))
                    .collect::<Vec<_>>()
                    .join("|");
                (
                    *sentiment,
                    Regex::new(&alternation).expect("vocabulary pattern is valid"),
                )
            })
            .collect();

        Highlighter {
            tag: Regex::new(r"</?[A-Za-z][^<>]*>").expect("tag pattern is valid"),
            wrapper: Regex::new(r#"<span class="(hl-(?:buy|sell|wait))">|</span>"#)
                .expect("wrapper pattern is valid"),
            categories,
        }
    })
}

/// Wraps every recognized term in its sentiment class.
///
/// Substitution skips the inside of tags so injected markup is never matched
/// again. A bare `<` or `>` (as in `RSI < 30`) is plain text. Running this twice over the same text wraps terms twice.
pub fn highlight_keywords(text: &str) -> String {
    let hl = highlighter();
    let mut processed = text.to_string();
    for (sentiment, pattern) in &hl.categories {
        processed = replace_outside_tags(&hl.tag, pattern, &processed, sentiment.class());
    }
    processed
}

fn replace_outside_tags(tag: &Regex, pattern: &Regex, text: &str, class: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for m in tag.find_iter(text) {
        out.push_str(&wrap_terms(pattern, &text[cursor..m.start()], class));
        out.push_str(m.as_str());
        cursor = m.end();
    }
    out.push_str(&wrap_terms(pattern, &text[cursor..], class));
    out
}

fn wrap_terms(pattern: &Regex, segment: &str, class: &str) -> String {
    pattern
        .replace_all(segment, |caps: &regex::Captures| {
            format!(r#"<span class="{}">{}</span>"#, class, &caps[0])
        })
        .into_owned()
}

/// Removes the wrappers added by [`highlight_keywords`].
pub fn strip_markup(text: &str) -> String {
    highlighter().wrapper.replace_all(text, "").into_owned()
}

/// True when `fragment` is exactly one wrapper tag produced by [`highlight_keywords`].
pub fn is_highlight_tag(fragment: &str) -> bool {
    highlighter()
        .wrapper
        .find(fragment)
        .is_some_and(|m| m.start() == 0 && m.end() == fragment.len())
}

/// Splits annotated text into runs, each tagged with the innermost
/// sentiment that covers it. Used by renderers that cannot show HTML.
pub fn segments(text: &str) -> Vec<(Option<Sentiment>, String)> {
    let mut out: Vec<(Option<Sentiment>, String)> = Vec::new();
    let mut stack: Vec<Sentiment> = Vec::new();
    let mut cursor = 0;

    let push = |out: &mut Vec<(Option<Sentiment>, String)>, current: Option<Sentiment>, run: &str| {
        if run.is_empty() {
            return;
        }
        match out.last_mut() {
            Some((last, buf)) if *last == current => buf.push_str(run),
            _ => out.push((current, run.to_string())),
        }
    };

    for caps in highlighter().wrapper.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        push(&mut out, stack.last().copied(), &text[cursor..m.start()]);
        match caps.get(1).and_then(|class| Sentiment::from_class(class.as_str())) {
            Some(sentiment) => stack.push(sentiment),
            None => {
                stack.pop();
            }
        }
        cursor = m.end();
    }
    push(&mut out, stack.last().copied(), &text[cursor..]);
    out
}
