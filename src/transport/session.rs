use rand::Rng;

use crate::dto::now_millis;

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// Identifier for one display instance: `session_<unix ms>_<9 base36 chars>`.
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{suffix}", now_millis())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::dto::validation::validate_client_id;

    #[test]
    fn session_ids_have_expected_shape() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<u64>().is_ok());
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(validate_client_id(&id).is_ok());
    }

    #[test]
    fn session_ids_do_not_collide_for_a_handful_of_tabs() {
        let ids: HashSet<String> = (0..64).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 64);
    }
}
