//! Synthetic legacy transactions
//!
//! Submitted transactions arrive as signed-looking legacy envelopes, but the
//! engine never checks signatures: the sender comes from impersonation. What
//! gets stored is an unsigned legacy body with an RLP-derived hash.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};

use crate::SmelterError;

/// Unsigned legacy transaction body, the hashing domain of [`TxRecord`].
#[derive(RlpEncodable)]
struct LegacyTxBody {
    nonce: u64,
    gas_price: u128,
    gas: u64,
    to: Address,
    value: U256,
    input: Bytes,
}

/// A transaction minted by the executor: legacy fields plus the resolved
/// sender and the derived hash.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub from: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub hash: B256,
}

impl TxRecord {
    /// Build a record and derive its hash from the RLP-encoded legacy body.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from: Address,
        nonce: u64,
        gas_price: u128,
        gas: u64,
        to: Address,
        value: U256,
        input: Bytes,
    ) -> Self {
        let body = LegacyTxBody {
            nonce,
            gas_price,
            gas,
            to,
            value,
            input: input.clone(),
        };
        let hash = keccak256(alloy_rlp::encode(&body));

        Self { from, nonce, gas_price, gas, to, value, input, hash }
    }
}

/// An execution request: the message the executor feeds the interpreter.
///
/// `gas == 0` means "use the executor default"; `value` defaults to zero.
#[derive(Debug, Clone, Default)]
pub struct CallMsg {
    pub from: Address,
    pub to: Address,
    pub gas: u64,
    pub gas_price: u128,
    pub value: U256,
    pub data: Bytes,
}

/// Wire form of a signed legacy transaction. The signature fields are
/// decoded and dropped; the sender is resolved elsewhere.
#[derive(Debug, Clone, RlpDecodable)]
pub struct RawLegacyTx {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl RawLegacyTx {
    /// Decode a raw RLP legacy envelope. Creation transactions (empty `to`)
    /// are rejected: the engine only executes calls into existing accounts.
    pub fn decode_raw(raw: &[u8]) -> Result<Self, SmelterError> {
        Self::decode(&mut &raw[..]).map_err(SmelterError::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_hash_is_stable_and_field_sensitive() {
        let to = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let a = TxRecord::new(Address::ZERO, 1, 0, 30_000, to, U256::from(1), Bytes::new());
        let b = TxRecord::new(Address::ZERO, 1, 0, 30_000, to, U256::from(1), Bytes::new());
        let c = TxRecord::new(Address::ZERO, 2, 0, 30_000, to, U256::from(1), Bytes::new());

        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        // The sender is not part of the hashing domain.
        let d = TxRecord::new(to, 1, 0, 30_000, to, U256::from(1), Bytes::new());
        assert_eq!(a.hash, d.hash);
    }

    #[test]
    fn test_raw_legacy_round_trip() {
        #[derive(RlpEncodable)]
        struct SignedBody {
            nonce: u64,
            gas_price: u128,
            gas: u64,
            to: Address,
            value: U256,
            input: Bytes,
            v: u64,
            r: U256,
            s: U256,
        }

        let to = address!("0000000000000000000000000000000000000007");
        let encoded = alloy_rlp::encode(&SignedBody {
            nonce: 1,
            gas_price: 0,
            gas: 30_000,
            to,
            value: U256::from(1_000_000_000_000u64),
            input: Bytes::from_static(&[0xd0, 0xe3, 0x0d, 0xb0]),
            v: 27,
            r: U256::ZERO,
            s: U256::ZERO,
        });

        let decoded = RawLegacyTx::decode_raw(&encoded).unwrap();
        assert_eq!(decoded.nonce, 1);
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.value, U256::from(1_000_000_000_000u64));
        assert_eq!(decoded.input, Bytes::from_static(&[0xd0, 0xe3, 0x0d, 0xb0]));
    }

    #[test]
    fn test_raw_legacy_rejects_garbage() {
        assert!(RawLegacyTx::decode_raw(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
