//! Local transaction signing
//!
//! Owner writes can be signed in-process with a secp256k1 key instead of
//! going through a node-managed account. Transactions are legacy (type 0)
//! with EIP-155 replay protection, which every EVM node accepts.

use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::error::{AnchorError, AnchorResult};
use podium_core::PlayerId;

/// Unsigned legacy transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    /// Wei per gas
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: [u8; 20],
    /// Wei sent with the call
    pub value: u64,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTransaction {
    /// RLP of the six transaction fields plus `chain_id, 0, 0`
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&self.chain_id).append(&0u64).append(&0u64);
        stream.out().to_vec()
    }

    /// Keccak-256 of the signing payload
    pub fn signing_hash(&self) -> [u8; 32] {
        let digest = Keccak256::digest(self.signing_payload());
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        hash
    }

    fn append_fields(&self, stream: &mut RlpStream) {
        stream
            .append(&self.nonce)
            .append(&self.gas_price)
            .append(&self.gas_limit)
            .append(&self.to.to_vec())
            .append(&self.value)
            .append(&self.data);
    }
}

/// secp256k1 key that signs owner writes
pub struct LocalSigner {
    key: SigningKey,
    address: PlayerId,
}

impl LocalSigner {
    /// Parse a 32-byte hex secret, with or without `0x`
    pub fn from_hex(secret: &str) -> AnchorResult<Self> {
        let trimmed = secret.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(hex_part)
            .map_err(|e| AnchorError::Configuration(format!("private key is not hex: {}", e)))?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| {
            AnchorError::Configuration("private key is not a valid secp256k1 secret".to_string())
        })?;

        let address = address_of(&key);
        Ok(Self { key, address })
    }

    /// Account the key controls
    pub fn address(&self) -> &PlayerId {
        &self.address
    }

    /// Sign and return the raw transaction bytes for `eth_sendRawTransaction`
    pub fn sign(&self, tx: &LegacyTransaction) -> AnchorResult<Vec<u8>> {
        let hash = tx.signing_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| AnchorError::Signing(e.to_string()))?;

        let rs = signature.to_bytes();
        let (r, s) = rs.split_at(32);
        let v = tx.chain_id * 2 + 35 + u64::from(recovery_id.to_byte());

        let mut stream = RlpStream::new_list(9);
        tx.append_fields(&mut stream);
        stream
            .append(&v)
            .append(&strip_leading_zeros(r))
            .append(&strip_leading_zeros(s));
        Ok(stream.out().to_vec())
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Last 20 bytes of the Keccak-256 of the uncompressed public key
fn address_of(key: &SigningKey) -> PlayerId {
    let point = key.verifying_key().to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    PlayerId::from_bytes(address)
}

/// RLP integers carry no leading zero bytes
fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use rlp::Rlp;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn transfer() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: [0x35; 20],
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
            chain_id: 1,
        }
    }

    #[test]
    fn test_address_from_key() {
        let signer = LocalSigner::from_hex(DEV_KEY).unwrap();
        assert_eq!(
            signer.address().as_str(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        let unprefixed = LocalSigner::from_hex(&DEV_KEY[2..]).unwrap();
        assert_eq!(unprefixed.address(), signer.address());
    }

    #[test]
    fn test_rejects_bad_keys() {
        for bad in ["0x1234", "not-hex", &format!("0x{}", "00".repeat(32))] {
            assert!(matches!(
                LocalSigner::from_hex(bad),
                Err(AnchorError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_eip155_reference_transaction() {
        let tx = transfer();
        assert_eq!(
            hex::encode(tx.signing_payload()),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );

        let signer = LocalSigner::from_hex(&format!("0x{}", "46".repeat(32))).unwrap();
        assert_eq!(
            hex::encode(signer.sign(&tx).unwrap()),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a7640000\
             8025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d899\
             7f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_signature_recovers_sender() {
        let signer = LocalSigner::from_hex(DEV_KEY).unwrap();
        let tx = LegacyTransaction {
            nonce: 0,
            gas_price: 1_000_000_000,
            gas_limit: 90_000,
            to: [0x5f; 20],
            value: 0,
            data: vec![0xde, 0xad, 0xbe, 0xef],
            chain_id: 31337,
        };
        let raw = signer.sign(&tx).unwrap();

        let decoded = Rlp::new(&raw);
        assert_eq!(decoded.item_count().unwrap(), 9);
        assert_eq!(decoded.val_at::<u64>(0).unwrap(), 0);
        assert_eq!(decoded.val_at::<Vec<u8>>(5).unwrap(), tx.data);

        let v: u64 = decoded.val_at(6).unwrap();
        let recovery = v - 35 - 2 * tx.chain_id;
        assert!(recovery <= 1);

        let mut rs = [0u8; 64];
        let r: Vec<u8> = decoded.val_at(7).unwrap();
        let s: Vec<u8> = decoded.val_at(8).unwrap();
        rs[32 - r.len()..32].copy_from_slice(&r);
        rs[64 - s.len()..].copy_from_slice(&s);

        let signature = Signature::from_slice(&rs).unwrap();
        let recovery_id = RecoveryId::from_byte(recovery as u8).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&tx.signing_hash(), &signature, recovery_id).unwrap();
        assert_eq!(&recovered, signer.key.verifying_key());
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = LocalSigner::from_hex(DEV_KEY).unwrap();
        let rendered = format!("{:?}", signer);
        assert!(rendered.contains("f39fd6e5"));
        assert!(!rendered.contains("ac0974be"));
    }
}
