// Identifier minting: lobby codes and peer ids, both collision-checked against
// current state by the caller.

use rand::Rng;

/// Length of a generated lobby code (spec: six uppercase letters).
pub const LOBBY_CODE_LEN: usize = 6;

/// Upper bound (exclusive) on peer ids: 31-bit non-negative integers.
pub const PEER_ID_BOUND: u32 = 1 << 31;

/// Draws a six-letter uppercase lobby code, retrying while `taken` reports a
/// collision with an existing active lobby.
pub fn generate_lobby_code(mut taken: impl FnMut(&str) -> bool) -> String {
    loop {
        let code = random_letters(LOBBY_CODE_LEN);
        if !taken(&code) {
            return code;
        }
    }
}

fn random_letters(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Draws a uniform non-negative 31-bit peer id, retrying while `taken` reports
/// a collision with a currently connected peer.
pub fn mint_peer_id(mut taken: impl FnMut(u32) -> bool) -> u32 {
    loop {
        let id = rand::thread_rng().gen_range(0..PEER_ID_BOUND);
        if !taken(id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn lobby_codes_are_six_uppercase_letters() {
        let code = generate_lobby_code(|_| false);
        assert_eq!(code.len(), LOBBY_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn lobby_code_retries_on_collision() {
        let mut seen = HashSet::new();
        seen.insert("AAAAAA".to_string());
        let mut first_call = true;
        let code = generate_lobby_code(|candidate| {
            if first_call {
                first_call = false;
                // Force one collision to exercise the retry path.
                true
            } else {
                seen.contains(candidate)
            }
        });
        assert!(!seen.contains(&code));
    }

    #[test]
    fn peer_ids_are_below_bound_and_non_negative() {
        for _ in 0..1000 {
            let id = mint_peer_id(|_| false);
            assert!(id < PEER_ID_BOUND);
        }
    }

    #[test]
    fn peer_id_retries_on_collision() {
        let mut first_call = true;
        let id = mint_peer_id(|_| {
            if first_call {
                first_call = false;
                true
            } else {
                false
            }
        });
        assert!(id < PEER_ID_BOUND);
    }
}
