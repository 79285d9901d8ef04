//! Master-key file handling (spec.md §4.2's "out-of-band shared secret"):
//! regenerated on every broker start, same as `generateMasterKey()` in the
//! original, which overwrites the key file unconditionally in `__init__`.

use rand::RngCore;
use std::fs;
use std::io;

const MASTER_KEY_BYTES: usize = 32;

/// Generates a fresh random master key and overwrites `path` with it,
/// setting owner-only permissions. Called once per broker start, so a
/// previous run's key (and anyone who learned it) stops working.
pub fn load_or_generate(path: &str) -> io::Result<String> {
    let mut bytes = [0u8; MASTER_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = hex::encode(bytes);
    fs::write(path, &key)?;
    set_owner_only(path)?;
    Ok(key)
}

#[cfg(unix)]
fn set_owner_only(path: &str) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &str) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_fresh_key_every_call_and_overwrites_the_file() {
        let dir = std::env::temp_dir().join(format!("loadbus-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("master.key");
        let path = path.to_str().unwrap();

        let first = load_or_generate(path).unwrap();
        assert_eq!(first.len(), MASTER_KEY_BYTES * 2);

        let second = load_or_generate(path).unwrap();
        assert_eq!(second.len(), MASTER_KEY_BYTES * 2);
        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(path).unwrap(), second);

        fs::remove_dir_all(&dir).ok();
    }
}
