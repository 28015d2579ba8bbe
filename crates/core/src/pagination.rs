/// Default page size applied when a list request omits `limit`.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Upper bound a page size is clamped to, regardless of what the caller asked for.
pub const MAX_LIST_LIMIT: u32 = 500;

/// Clamp a caller-supplied limit to `[1, MAX_LIST_LIMIT]`, defaulting to
/// `DEFAULT_LIST_LIMIT` when absent or non-numeric.
#[must_use]
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    match limit {
        None | Some(0) if limit.is_none() => DEFAULT_LIST_LIMIT,
        Some(0) => 1,
        Some(n) => n.min(MAX_LIST_LIMIT),
    }
}

/// Clamp a caller-supplied offset to a non-negative value.
#[must_use]
pub fn clamp_offset(offset: Option<i64>) -> u64 {
    match offset {
        Some(n) if n > 0 => n.cast_unsigned(),
        _ => 0,
    }
}
