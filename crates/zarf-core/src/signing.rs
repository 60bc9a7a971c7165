//! Package signing over the checksum manifest
//!
//! The detached signature in a package tree covers `checksums.txt` only;
//! every other file is transitively covered by its checksum line.

use minisign::{PublicKeyBox, SecretKeyBox, SignatureBox};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::checksums::{CHECKSUMS_TXT, SIGNATURE_FILE};
use crate::error::{CoreError, Result};

/// Sign a package tree's checksums.txt, writing the `signature` file
pub fn sign_tree(root: &Path, key_path: &Path, password: Option<String>) -> Result<PathBuf> {
    let key_content = std::fs::read_to_string(key_path)?;
    let sk_box = SecretKeyBox::from_string(&key_content)
        .map_err(|e| CoreError::Signing(format!("failed to parse secret key: {e}")))?;
    let sk = sk_box
        .into_secret_key(Some(password.unwrap_or_default()))
        .map_err(|e| CoreError::Signing(format!("failed to decrypt key: {e}")))?;

    let data = std::fs::read(root.join(CHECKSUMS_TXT))?;
    let mut cursor = Cursor::new(&data);
    let signature_box = minisign::sign(None, &sk, &mut cursor, Some(CHECKSUMS_TXT), None)
        .map_err(|e| CoreError::Signing(format!("failed to sign: {e}")))?;

    let sig_path = root.join(SIGNATURE_FILE);
    std::fs::write(&sig_path, signature_box.to_string())?;
    Ok(sig_path)
}

/// Verify a package tree's signature against a public key
pub fn verify_tree(root: &Path, public_key_path: &Path) -> Result<()> {
    let pk_content = std::fs::read_to_string(public_key_path)?;
    let pk = PublicKeyBox::from_string(&pk_content)
        .map_err(|e| CoreError::Signing(format!("failed to parse public key: {e}")))?
        .into_public_key()
        .map_err(|e| CoreError::Signing(format!("invalid public key: {e}")))?;

    let sig_content = std::fs::read_to_string(root.join(SIGNATURE_FILE))?;
    let sig_box = SignatureBox::from_string(&sig_content)
        .map_err(|e| CoreError::Signing(format!("failed to parse signature: {e}")))?;

    let data = std::fs::read(root.join(CHECKSUMS_TXT))?;
    let mut cursor = Cursor::new(&data);
    minisign::verify(&pk, &sig_box, &mut cursor, true, false, false).map_err(|e| {
        CoreError::SignatureInvalid {
            message: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use minisign::KeyPair;
    use tempfile::TempDir;

    fn write_keys(dir: &Path) -> (PathBuf, PathBuf) {
        let KeyPair { pk, sk } = KeyPair::generate_unencrypted_keypair().unwrap();
        let sk_path = dir.join("zarf.key");
        let pk_path = dir.join("zarf.pub");
        std::fs::write(&sk_path, sk.to_box(None).unwrap().to_string()).unwrap();
        std::fs::write(&pk_path, pk.to_box().unwrap().to_string()).unwrap();
        (sk_path, pk_path)
    }

    #[test]
    fn test_sign_and_verify() {
        let temp = TempDir::new().unwrap();
        let (sk_path, pk_path) = write_keys(temp.path());
        std::fs::write(temp.path().join(CHECKSUMS_TXT), "abc zarf.yaml\n").unwrap();

        sign_tree(temp.path(), &sk_path, None).unwrap();
        assert!(temp.path().join(SIGNATURE_FILE).is_file());
        verify_tree(temp.path(), &pk_path).unwrap();
    }

    #[test]
    fn test_tampered_checksums_fail_verification() {
        let temp = TempDir::new().unwrap();
        let (sk_path, pk_path) = write_keys(temp.path());
        std::fs::write(temp.path().join(CHECKSUMS_TXT), "abc zarf.yaml\n").unwrap();
        sign_tree(temp.path(), &sk_path, None).unwrap();

        std::fs::write(temp.path().join(CHECKSUMS_TXT), "def zarf.yaml\n").unwrap();
        assert!(matches!(
            verify_tree(temp.path(), &pk_path),
            Err(CoreError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let temp = TempDir::new().unwrap();
        let (sk_path, _) = write_keys(temp.path());
        std::fs::write(temp.path().join(CHECKSUMS_TXT), "abc zarf.yaml\n").unwrap();
        sign_tree(temp.path(), &sk_path, None).unwrap();

        let other = TempDir::new().unwrap();
        let (_, other_pk) = write_keys(other.path());
        assert!(verify_tree(temp.path(), &other_pk).is_err());
    }
}
