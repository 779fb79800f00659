//! Guide markup filtering

use crate::error::{FilterError, FilterResult};
use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*javascript:").expect("static regex"));

/// Check one element a guide is about to render
///
/// Tag and attribute names compare lowercased and trimmed.
///
/// # Errors
/// [`FilterError::CapabilityViolation`] for `embed`, `iframe` and `script`,
/// and for anchors whose `href` uses the `javascript:` scheme
pub fn filter_guide_tag<'a, I>(tag_name: &str, attributes: I) -> FilterResult<()>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let tag = tag_name.trim().to_lowercase();
    match tag.as_str() {
        "embed" | "iframe" | "script" => Err(FilterError::capability(format!(
            "guides may not contain '{tag}'"
        ))),
        "a" => {
            let scripted = attributes
                .into_iter()
                .any(|(name, value)| name.trim().eq_ignore_ascii_case("href") && SCRIPT_HREF.is_match(value));
            if scripted {
                Err(FilterError::capability(
                    "guides may not contain 'javascript:' links",
                ))
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}
