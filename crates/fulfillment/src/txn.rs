//! Transaction id generation.

use common::TransactionId;
use rand::Rng;

/// Uppercase alphanumerics; the suffix alphabet of every transaction id.
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Suffix length. Long enough that collisions are a residual risk handled by
/// the storage layer's unique key, not something worth checking up front.
const SUFFIX_LEN: usize = 10;

/// Generates a transaction id of the form `PREFIX-RANDOM`.
///
/// The suffix is drawn fresh per call; a unique-key violation on insert is
/// treated by callers as a retryable collision.
pub fn generate_transaction_id(prefix: &str) -> TransactionId {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    TransactionId::new(format!("{prefix}-{suffix}"))
}
