//! Auth key generation

use gamelink_proto::AUTH_KEY_LEN;
use rand::Rng;

const KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a fresh single-use tunnel auth key.
pub fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    (0..AUTH_KEY_LEN)
        .map(|_| KEY_CHARSET[rng.gen_range(0..KEY_CHARSET.len())] as char)
        .collect()
}
