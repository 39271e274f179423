// SPDX-License-Identifier: GPL-2.0-or-later

//! Expansion of compact scheduler host expressions like
//! `x[1-150,155-500],y[1-6]` into ordered hostname lists.
//!
//! Expansion preserves the scheduler's textual ordering exactly; "first" and
//! "last" node selection is positional, never lexicographic.

use crate::error::TunnelError;

/// Expand a compact host-range expression into individual hostnames.
///
/// Each top-level comma-separated item is either a plain hostname or
/// `prefix[ranges]suffix`, where `ranges` is a comma-separated list of `N`
/// or `N-M` entries. Zero-padding of the range start is preserved, so
/// `n[08-10]` yields `n08 n09 n10`.
pub fn expand(expr: &str) -> Result<Vec<String>, TunnelError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(Vec::new());
    }

    let mut hosts = Vec::new();
    for item in split_top_level(expr)? {
        expand_item(item, &mut hosts)?;
    }
    Ok(hosts)
}

/// Split on commas that are not inside a bracket group.
fn split_top_level(expr: &str) -> Result<Vec<&str>, TunnelError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(expr, "unbalanced ']'"))?;
            }
            ',' if depth == 0 => {
                items.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(expr, "unbalanced '['"));
    }
    items.push(&expr[start..]);
    Ok(items)
}

fn expand_item(item: &str, out: &mut Vec<String>) -> Result<(), TunnelError> {
    let item = item.trim();
    if item.is_empty() {
        return Err(invalid(item, "empty host entry"));
    }

    let Some(open) = item.find('[') else {
        out.push(item.to_string());
        return Ok(());
    };
    let close = item
        .rfind(']')
        .ok_or_else(|| invalid(item, "missing ']'"))?;
    if close < open {
        return Err(invalid(item, "']' before '['"));
    }
    let prefix = &item[..open];
    let ranges = &item[open + 1..close];
    let suffix = &item[close + 1..];
    if suffix.contains('[') {
        return Err(invalid(item, "multiple bracket groups"));
    }
    if ranges.is_empty() {
        return Err(invalid(item, "empty range group"));
    }

    for range in ranges.split(',') {
        let (lo, hi) = match range.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (range, range),
        };
        let width = lo.len();
        let lo_n = parse_bound(item, lo)?;
        let hi_n = parse_bound(item, hi)?;
        if lo_n > hi_n {
            return Err(invalid(item, "reversed range"));
        }
        for n in lo_n..=hi_n {
            out.push(format!("{prefix}{n:0width$}{suffix}"));
        }
    }
    Ok(())
}

fn parse_bound(item: &str, bound: &str) -> Result<u64, TunnelError> {
    if bound.is_empty() || !bound.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(item, "non-numeric range bound"));
    }
    bound
        .parse::<u64>()
        .map_err(|_| invalid(item, "range bound too large"))
}

fn invalid(expr: &str, reason: &str) -> TunnelError {
    TunnelError::InvalidExpression(format!("{reason} in {expr:?}"))
}
