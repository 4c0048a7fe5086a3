//! Text scanning over extracted page text: history sections and figure legends.
//!
//! Both scans are pure functions over the per-page text strings so they can
//! be tested without a PDF engine.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_HISTORY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bhistory\b").unwrap());

static RE_FIGURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)figure").unwrap());

/// A figure legend and the 1-based page it was found on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureLegend {
    pub text: String,
    pub page: usize,
}

/// History section of a single page: everything from the first whole-word,
/// case-insensitive "History" to the end of the page.
pub fn history_section(page_text: &str) -> Option<&str> {
    RE_HISTORY.find(page_text).map(|m| &page_text[m.start()..])
}

/// Collect the history section of every page that has one, in page order.
pub fn extract_history<S: AsRef<str>>(page_texts: &[S]) -> Vec<String> {
    page_texts
        .iter()
        .filter_map(|t| history_section(t.as_ref()))
        .map(str::to_string)
        .collect()
}

/// Find figure legends on every page.
///
/// The first case-insensitive "Figure" on a page starts a legend that runs
/// verbatim to the end of the page text, so a page yields at most one legend.
/// Later "Figure" mentions on the same page stay inside that legend.
pub fn find_figure_legends<S: AsRef<str>>(page_texts: &[S]) -> Vec<FigureLegend> {
    page_texts
        .iter()
        .enumerate()
        .filter_map(|(idx, text)| {
            let text = text.as_ref();
            RE_FIGURE.find(text).map(|m| FigureLegend {
                text: text[m.start()..].to_string(),
                page: idx + 1,
            })
        })
        .collect()
}

/// Contents of `history_texts.txt`: each section followed by a blank line.
pub fn render_history_file<S: AsRef<str>>(texts: &[S]) -> String {
    let mut out = String::new();
    for t in texts {
        out.push_str(t.as_ref());
        out.push_str("\n\n");
    }
    out
}

/// Contents of `figure_legends.txt`: one `"<legend> (Page N)"` line per legend.
pub fn render_legends_file(legends: &[FigureLegend]) -> String {
    legends
        .iter()
        .map(|l| format!("{} (Page {})\n", l.text, l.page))
        .collect()
}
