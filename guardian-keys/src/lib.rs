// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

// Guardian key management. Keys are secp256k1 private keys stored as hex.

pub use ethers::signers::LocalWallet;

/// Environment variable consulted when no key file is configured.
pub const GUARDIAN_PRIVATE_KEY_ENV: &str = "GUARDIAN_PRIVATE_KEY";

/// Parse a hex encoded secp256k1 private key, with or without `0x`.
pub fn decode_private_key(contents: &str) -> anyhow::Result<LocalWallet> {
    let trimmed = contents.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_str)
        .map_err(|e| anyhow::anyhow!("Private key is not valid hex: {}", e))?;
    if bytes.len() != 32 {
        return Err(anyhow::anyhow!(
            "Private key must be 32 bytes, got {}",
            bytes.len()
        ));
    }
    LocalWallet::from_bytes(&bytes).map_err(|e| anyhow::anyhow!("Invalid secp256k1 key: {}", e))
}

pub mod keygen {
    use super::*;
    use anyhow::{anyhow, Result};
    use ethers::signers::Signer;
    use ethers::types::Address;
    use std::path::Path;

    /// Generate a new guardian key, write it to `path` and return its address.
    pub fn generate_guardian_key_and_write_to_file(path: &Path) -> Result<Address> {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let encoded = hex::encode(wallet.signer().to_bytes());

        std::fs::write(path, encoded)
            .map_err(|err| anyhow!("Failed to write key to {:?}: {}", path, err))?;

        tracing::debug!("Guardian key written to: {:?}", path);
        Ok(wallet.address())
    }
}

pub mod keypair_file {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::path::Path;

    // Read a guardian key from a file containing the hex encoded private key
    pub fn read_key(path: &Path) -> Result<LocalWallet> {
        if !path.exists() {
            return Err(anyhow!("Key file not found at path: {:?}", path));
        }
        let contents = std::fs::read_to_string(path)?;
        decode_private_key(&contents)
            .map_err(|e| anyhow!("Invalid key file format at {:?}: {}", path, e))
    }

    // Read a guardian key from an environment variable
    pub fn read_key_from_env(var: &str) -> Result<LocalWallet> {
        let contents = std::env::var(var)
            .map_err(|_| anyhow!("Environment variable {} is not set", var))?;
        decode_private_key(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;

    // Well-known development key (first anvil account)
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn test_decode_private_key() {
        let wallet = decode_private_key(DEV_KEY).unwrap();
        assert_eq!(format!("{:?}", wallet.address()), DEV_ADDRESS);

        let prefixed = decode_private_key(&format!("0x{}\n", DEV_KEY)).unwrap();
        assert_eq!(prefixed.address(), wallet.address());
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(decode_private_key("not-hex").is_err());
        assert!(decode_private_key("abcd").is_err());
        assert!(decode_private_key(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_generate_and_read_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guardian.key");
        let address = keygen::generate_guardian_key_and_write_to_file(&path).unwrap();
        let wallet = keypair_file::read_key(&path).unwrap();
        assert_eq!(wallet.address(), address);
    }

    #[test]
    fn test_read_missing_key_file() {
        let err = keypair_file::read_key(std::path::Path::new("/nonexistent/guardian.key"))
            .unwrap_err();
        assert!(err.to_string().contains("Key file not found"));
    }
}
