//! Stable display colors for collaborators.

/// Warm, muted palette used for avatars, typing and focus markers.
pub const USER_COLORS: [&str; 10] = [
    "#d97706", "#ea580c", "#ca8a04", "#65a30d", "#059669",
    "#0891b2", "#0284c7", "#7c3aed", "#c026d3", "#e11d48",
];

/// 32-bit string hash (`h * 31 + unit` over UTF-16 code units), so web and
/// native clients agree on every user's color.
pub fn user_hash(user_id: &str) -> i32 {
    user_id
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit)))
}

/// Deterministic color for a user id. Two ids share a color only when their
/// hashes agree modulo the palette size.
pub fn color_for_user(user_id: &str) -> &'static str {
    let index = user_hash(user_id).unsigned_abs() as usize % USER_COLORS.len();
    USER_COLORS[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_is_stable() {
        for id in ["", "a", "user-42", "😀 émoji"] {
            assert_eq!(color_for_user(id), color_for_user(id));
        }
    }

    #[test]
    fn matches_known_hashes() {
        assert_eq!(user_hash(""), 0);
        assert_eq!(user_hash("a"), 97);
        assert_eq!(user_hash("ab"), 97 * 31 + 98);
        assert_eq!(color_for_user("a"), USER_COLORS[7]);
        assert_eq!(color_for_user("ab"), USER_COLORS[5]);
    }

    #[test]
    fn long_ids_wrap_instead_of_overflowing() {
        let id = "x".repeat(10_000);
        assert!(USER_COLORS.contains(&color_for_user(&id)));
    }

    #[test]
    fn collisions_follow_the_palette_modulus() {
        let ids: Vec<String> = (0..200).map(|i| format!("user-{}", i)).collect();
        for a in &ids {
            for b in &ids {
                let same_bucket = user_hash(a).unsigned_abs() as usize % USER_COLORS.len()
                    == user_hash(b).unsigned_abs() as usize % USER_COLORS.len();
                assert_eq!(color_for_user(a) == color_for_user(b), same_bucket);
            }
        }
    }
}
