//! Small string helpers.

use rand::Rng;

use crate::error::{KitError, KitResult};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Generate a random string of `len` lowercase hex digits.
///
/// Safe to call from many threads; each thread draws from its own RNG.
#[must_use]
pub fn random_hex_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())]))
        .collect()
}

/// Split `items` into chunks of at most `chunk_size` elements.
///
/// The final chunk holds the remainder when `items` does not divide evenly.
///
/// # Errors
///
/// Returns [`KitError::InvalidInput`] when `chunk_size` is zero.
pub fn chunk<T: Clone>(items: &[T], chunk_size: usize) -> KitResult<Vec<Vec<T>>> {
    if chunk_size == 0 {
        return Err(KitError::InvalidInput("chunk_size must be >= 1".to_string()));
    }
    Ok(items.chunks(chunk_size).map(<[T]>::to_vec).collect())
}

/// Keep `prefix_len` leading and `suffix_len` trailing characters of `s`
/// with `...` in between.
///
/// Strings too short to elide are returned unchanged.
#[must_use]
pub fn elide(s: &str, prefix_len: usize, suffix_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    if len < prefix_len.saturating_add(suffix_len) {
        return s.to_string();
    }

    let head: String = chars[..prefix_len].iter().collect();
    let tail: String = chars[len - suffix_len..].iter().collect();
    format!("{head}...{tail}")
}
