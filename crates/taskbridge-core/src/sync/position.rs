//! Ordering tokens.
//!
//! The remote side orders siblings by a zero-padded decimal string compared
//! lexicographically; the local side keeps a plain `f64`.

/// Width of a remote position token.
pub const TOKEN_WIDTH: usize = 20;

/// Remote token to local position. Anything unparseable sorts first.
pub fn parse(token: &str) -> f64 {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite())
        .unwrap_or(0.0)
}

/// Local position to remote token. Fractions are rounded and negative or
/// non-finite values clamp to zero, since tokens cannot express them.
pub fn format(position: f64) -> String {
    let whole = if position.is_finite() && position > 0.0 {
        position.round().min(u64::MAX as f64) as u64
    } else {
        0
    };
    format!("{whole:0width$}", width = TOKEN_WIDTH)
}
