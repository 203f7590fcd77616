//! Deterministic per-participant decoration.
//!
//! Every participant sees the same color and emoji for a given id, with no
//! coordination: both are derived from a 32-bit string hash of the id.

const EMOJIS: [&str; 15] = [
    "🐱", "🐶", "🐰", "🦊", "🐼", "🐸", "🦄", "🌟", "⭐", "💫", "🎯", "🎨", "🎪", "🎭", "🎮",
];

const LABEL_CHARS: usize = 8;

/// `hash = c + (hash << 5) - hash` over UTF-16 code units, wrapping at 32 bits.
#[must_use]
pub fn id_hash(id: &str) -> i32 {
    id.encode_utf16().fold(0_i32, |hash, unit| {
        i32::from(unit)
            .wrapping_add(hash.wrapping_shl(5))
            .wrapping_sub(hash)
    })
}

/// CSS color for a participant, e.g. `hsl(212, 70%, 60%)`.
#[must_use]
pub fn cursor_color(id: &str) -> String {
    let hue = id_hash(id).rem_euclid(360);
    format!("hsl({hue}, 70%, 60%)")
}

#[must_use]
pub fn cursor_emoji(id: &str) -> &'static str {
    let index = usize::try_from(id_hash(id).unsigned_abs()).unwrap_or(0) % EMOJIS.len();
    EMOJIS[index]
}

/// Short human label: `user ` plus the first eight characters of the id.
#[must_use]
pub fn cursor_label(id: &str) -> String {
    let prefix: String = id.chars().take(LABEL_CHARS).collect();
    format!("user {prefix}")
}

#[cfg(test)]
#[path = "visual_test.rs"]
mod tests;
