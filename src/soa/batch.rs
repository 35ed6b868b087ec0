//! Batched key search and value copy over the SoA layout.
//!
//! Rows are processed [`BATCH`] at a time. Within a batch the hash column is
//! compared first as a fixed-width lane mask, which the compiler can
//! vectorize; byte comparison only runs for lanes whose hash matched.

use crate::cache::store::hash_key;
use crate::soa::layout::SoaLayout;

/// Rows handled per batch.
pub const BATCH: usize = 8;

impl SoaLayout {
    /// Find the row index of each search key.
    ///
    /// For every search key, the first active row (in row order) whose hash
    /// and bytes both match is written into `results`. Search keys without a
    /// match contribute nothing. Stops once `results` is full. Returns the
    /// number of indices written.
    pub fn find_keys_simd(&self, search_keys: &[&[u8]], results: &mut [usize]) -> usize {
        let mut found = 0;
        for key in search_keys {
            if found == results.len() {
                break;
            }
            if let Some(row) = self.find_key(key) {
                results[found] = row;
                found += 1;
            }
        }
        found
    }

    /// First active row holding `key`.
    pub fn find_key(&self, key: &[u8]) -> Option<usize> {
        let target = hash_key(key);
        let count = self.key_count();
        let hashes = &self.key_hashes[..count];
        let active = &self.key_active[..count];

        for (batch, (hash_chunk, active_chunk)) in hashes
            .chunks(BATCH)
            .zip(active.chunks(BATCH))
            .enumerate()
        {
            let mut mask = [false; BATCH];
            for lane in 0..hash_chunk.len() {
                mask[lane] = hash_chunk[lane] == target && active_chunk[lane];
            }
            if !mask.contains(&true) {
                continue;
            }
            for (lane, hit) in mask.iter().enumerate() {
                let row = batch * BATCH + lane;
                if *hit && self.key(row) == Some(key) {
                    return Some(row);
                }
            }
        }
        None
    }

    /// Copy the value bytes of each row in `indices` into `out`, back to back.
    ///
    /// Inactive or out-of-range rows are skipped. Copying stops when `out` is
    /// full; a row that only partially fits is truncated to the space left.
    /// Returns the number of bytes written. Callers that need whole values
    /// should size `out` from [`SoaLayout::value_size`] first.
    pub fn get_values_simd(&self, indices: &[usize], out: &mut [u8]) -> usize {
        let mut written = 0;
        for chunk in indices.chunks(BATCH) {
            for &row in chunk {
                if written == out.len() {
                    return written;
                }
                let Some(bytes) = self.value_row_bytes(row) else {
                    continue;
                };
                let n = bytes.len().min(out.len() - written);
                out[written..written + n].copy_from_slice(&bytes[..n]);
                written += n;
            }
        }
        written
    }
}
