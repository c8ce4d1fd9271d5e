//! Quote-balance repair for truncated generations.
//!
//! Not a parser: only naive occurrence parity is restored, so the output can
//! still be syntactically broken.

/// Quote families, in the order they are checked.
const QUOTE_FAMILIES: [&str; 4] = ["\"", "'", "'''", "\"\"\""];

/// Closing one family can unbalance another (`"` vs `"""`); a few passes
/// always settle.
const MAX_PASSES: usize = 8;

/// Appends a closing quote for every family whose occurrence count is odd.
///
/// Counts are non-overlapping, left to right. The result has an even count
/// for every family, so applying this again changes nothing.
pub fn fix_unterminated_literals(code: &str) -> String {
    let mut out = code.to_string();

    for _ in 0..MAX_PASSES {
        if !balance_pass(&mut out) {
            break;
        }
    }

    out
}

/// One fixed-order pass. Returns whether anything was appended.
fn balance_pass(code: &mut String) -> bool {
    let mut changed = false;
    for quote in QUOTE_FAMILIES {
        if code.matches(quote).count() % 2 != 0 {
            code.push_str(quote);
            changed = true;
        }
    }
    changed
}
