//! Request batching helpers
//!
//! Bulk lookup endpoints accept a limited number of ids per call, so id lists are
//! split into fixed-size groups before they are sent.

use std::collections::HashSet;
use std::num::NonZeroUsize;

/// Maximum number of ids per bulk lookup request
pub const CHUNK_SIZE: NonZeroUsize = match NonZeroUsize::new(20) {
    Some(size) => size,
    None => panic!("chunk size must be non-zero"),
};

/// Split `items` into ordered groups of at most `size` elements.
///
/// The iterator borrows `items`, so it can be created again for another pass
/// over the same list. An empty slice yields no groups.
pub fn batches<T>(items: &[T], size: NonZeroUsize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.get())
}

/// Number of groups `batches` produces for `len` items
pub fn batch_count(len: usize, size: NonZeroUsize) -> usize {
    len.div_ceil(size.get())
}

/// Drop repeated ids, keeping the first occurrence of each
pub fn unique_in_order<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(Into::into)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
