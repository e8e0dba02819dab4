use crate::storage::Storage;
use rand::Rng;

const ALNUM: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

/// Attempts before giving up on finding an unused code.
const MAX_ATTEMPTS: usize = 1000;

fn pick<R: Rng + ?Sized>(rng: &mut R, charset: &[u8]) -> char {
    charset[rng.gen_range(0..charset.len())] as char
}

/// A random 4-character guest code. Look-alike characters (`0/O`, `1/I`)
/// are left out.
pub fn random_guest_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..4).map(|_| pick(rng, ALNUM)).collect()
}

/// A random table code of shape `AA-99`.
pub fn random_table_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{}{}-{}{}",
        pick(rng, LETTERS),
        pick(rng, LETTERS),
        pick(rng, DIGITS),
        pick(rng, DIGITS)
    )
}

/// A guest code not yet taken in `storage`.
pub fn generate_guest_code<S: Storage + ?Sized>(storage: &S) -> Option<String> {
    let mut rng = rand::thread_rng();
    (0..MAX_ATTEMPTS)
        .map(|_| random_guest_code(&mut rng))
        .find(|code| storage.get_guest_by_id(code).is_none())
}

/// A table code not yet taken in `storage`.
pub fn generate_table_code<S: Storage + ?Sized>(storage: &S) -> Option<String> {
    let mut rng = rand::thread_rng();
    (0..MAX_ATTEMPTS)
        .map(|_| random_table_code(&mut rng))
        .find(|code| storage.get_table_by_id(code).is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_input::GroupKind;
    use crate::storage::MemoryStore;

    #[test]
    fn generated_codes_have_input_shapes() {
        let store = MemoryStore::new();
        for _ in 0..50 {
            let guest = generate_guest_code(&store).unwrap();
            let table = generate_table_code(&store).unwrap();
            assert!(GroupKind::Guest.is_valid_code(&guest), "{guest}");
            assert!(GroupKind::Table.is_valid_code(&table), "{table}");
        }
    }
}
