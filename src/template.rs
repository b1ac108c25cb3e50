//! Case-insensitive glob matching over cluster templates.

use glob::{MatchOptions, Pattern};

use crate::cluster::ClusterTemplate;
use crate::error::{ClusterError, ResourceKind};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Only `*` and `?` are wildcards. Every other character, brackets included,
/// matches itself, and runs of `*` collapse to one.
fn compile(pattern: &str) -> Result<Pattern, ClusterError> {
    let mut glob = String::with_capacity(pattern.len());
    let mut previous = None;
    for ch in pattern.trim().chars() {
        match ch {
            '*' if previous == Some('*') => {}
            '*' | '?' => glob.push(ch),
            other => glob.push_str(&Pattern::escape(other.encode_utf8(&mut [0; 4]))),
        }
        previous = Some(ch);
    }
    Pattern::new(&glob).map_err(|err| {
        ClusterError::InvalidRequest(format!("invalid template pattern '{pattern}': {err}"))
    })
}

/// Resolves a pattern to exactly one template.
///
/// `*` matches any run of characters and `?` a single character; comparison
/// ignores case.
///
/// # Errors
///
/// Returns [`ClusterError::NotFound`] when nothing matches,
/// [`ClusterError::AmbiguousMatch`] when several templates match, and
/// [`ClusterError::InvalidRequest`] for a malformed pattern.
pub fn resolve_template<'a>(
    templates: &'a [ClusterTemplate],
    pattern: &str,
) -> Result<&'a ClusterTemplate, ClusterError> {
    let compiled = compile(pattern)?;
    let mut matches = templates
        .iter()
        .filter(|template| compiled.matches_with(&template.name, MATCH_OPTIONS));

    let Some(first) = matches.next() else {
        return Err(ClusterError::NotFound {
            kind: ResourceKind::Template,
            token: pattern.to_owned(),
        });
    };
    if matches.next().is_some() {
        return Err(ClusterError::AmbiguousMatch {
            kind: ResourceKind::Template,
            pattern: pattern.to_owned(),
        });
    }
    Ok(first)
}

/// Keeps the templates whose name matches the pattern. A blank pattern keeps
/// everything.
///
/// # Errors
///
/// Returns [`ClusterError::InvalidRequest`] for a malformed pattern.
pub fn filter_templates(
    templates: Vec<ClusterTemplate>,
    pattern: &str,
) -> Result<Vec<ClusterTemplate>, ClusterError> {
    if pattern.trim().is_empty() {
        return Ok(templates);
    }
    let compiled = compile(pattern)?;
    Ok(templates
        .into_iter()
        .filter(|template| compiled.matches_with(&template.name, MATCH_OPTIONS))
        .collect())
}
