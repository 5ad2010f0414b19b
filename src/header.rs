use {
    super::*,
    bitcoin::{CompactTarget, Target},
};

/// Byte offset of the nonce within the serialized header.
pub const NONCE_OFFSET: usize = 76;

/// Full block header, including the EVM state roots, the proof-of-stake
/// fields, and the legacy prime-gap proof fields. The gap fields ride along
/// in every header for block-format compatibility even when the chain is
/// hashing with RandomX.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    #[serde(with = "hex::serde")]
    pub prev_hash: [u8; 32],
    #[serde(with = "hex::serde")]
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    #[serde(with = "hex::serde")]
    pub state_root: [u8; 32],
    #[serde(with = "hex::serde")]
    pub utxo_root: [u8; 32],
    #[serde(with = "hex::serde")]
    pub prevout_stake: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub block_sig: Vec<u8>,
    pub shift: u32,
    #[serde(with = "hex::serde")]
    pub adder: [u8; 32],
    pub gap_size: u32,
}

impl BlockHeader {
    /// Serializes every header field in consensus order. All multi-byte
    /// integers are little-endian regardless of host. This is the exact byte
    /// sequence the RandomX engine hashes; the nonce sits at
    /// [`NONCE_OFFSET`].
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(192);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash);
        bytes.extend_from_slice(&self.merkle_root);
        bytes.extend_from_slice(&self.time.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&self.state_root);
        bytes.extend_from_slice(&self.utxo_root);
        write_var_bytes(&mut bytes, &self.prevout_stake);
        write_var_bytes(&mut bytes, &self.block_sig);
        bytes.extend_from_slice(&self.shift.to_le_bytes());
        bytes.extend_from_slice(&self.adder);
        bytes.extend_from_slice(&self.gap_size.to_le_bytes());
        bytes
    }

    /// Copy of the header with the gap-proof fields nulled, the form that is
    /// hashed to derive the prime-search base.
    pub fn without_gap_fields(&self) -> Self {
        Self {
            shift: 0,
            adder: [0u8; 32],
            gap_size: 0,
            ..self.clone()
        }
    }

    /// The 256-bit consensus threshold for this header, big-endian.
    pub fn consensus_target(&self) -> [u8; 32] {
        decode_compact(self.bits)
    }
}

fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&encode::serialize(&VarInt(bytes.len() as u64)));
    out.extend_from_slice(bytes);
}

/// Expands compact `bits` into the full 256-bit target, big-endian.
pub fn decode_compact(bits: u32) -> [u8; 32] {
    Target::from_compact(CompactTarget::from_consensus(bits)).to_be_bytes()
}

/// A hash meets a target iff, read as big-endian 256-bit unsigned integers,
/// `hash <= target`. Byte-wise lexicographic comparison is the same thing.
pub fn meets_target(hash: &[u8; 32], target: &[u8; 32]) -> bool {
    hash <= target
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 0x2000_0004,
            prev_hash: [0x11; 32],
            merkle_root: [0x22; 32],
            time: 0x6633_2211,
            bits: 0x1d00_ffff,
            nonce: 0,
            state_root: [0x33; 32],
            utxo_root: [0x44; 32],
            prevout_stake: vec![0xaa; 36],
            block_sig: Vec::new(),
            shift: 25,
            adder: [0; 32],
            gap_size: 0,
        }
    }

    #[test]
    fn serialized_layout_is_fixed() {
        let header = BlockHeader::default();
        let bytes = header.serialize();

        // 76 fixed bytes through the nonce, 64 bytes of roots, two empty
        // var-length fields, then the gap-proof tail.
        assert_eq!(bytes.len(), 4 + 32 + 32 + 4 + 4 + 4 + 32 + 32 + 1 + 1 + 4 + 32 + 4);

        let header = sample_header();
        let bytes = header.serialize();
        assert_eq!(&bytes[0..4], &0x2000_0004i32.to_le_bytes());
        assert_eq!(&bytes[4..36], &[0x11; 32]);
        assert_eq!(&bytes[36..68], &[0x22; 32]);
        assert_eq!(&bytes[68..72], &0x6633_2211u32.to_le_bytes());
        assert_eq!(&bytes[72..76], &0x1d00_ffffu32.to_le_bytes());
        assert_eq!(&bytes[76..80], &[0, 0, 0, 0]);
    }

    #[test]
    fn nonce_sits_at_fixed_offset() {
        let mut header = sample_header();
        let before = header.serialize();
        header.nonce = 0xdead_beef;
        let after = header.serialize();

        assert_eq!(before.len(), after.len());
        for (i, (a, b)) in before.iter().zip(after.iter()).enumerate() {
            if (NONCE_OFFSET..NONCE_OFFSET + 4).contains(&i) {
                continue;
            }
            assert_eq!(a, b, "byte {i} changed");
        }
        assert_eq!(
            &after[NONCE_OFFSET..NONCE_OFFSET + 4],
            &0xdead_beefu32.to_le_bytes()
        );
    }

    #[test]
    fn var_bytes_get_length_prefix() {
        let mut header = BlockHeader::default();
        header.prevout_stake = vec![0xcc; 36];
        let bytes = header.serialize();
        // prevout_stake begins right after the two 32-byte roots
        assert_eq!(bytes[140], 36);
        assert_eq!(&bytes[141..177], &[0xcc; 36][..]);
    }

    #[test]
    fn without_gap_fields_nulls_only_the_gap_proof() {
        let header = sample_header();
        let stripped = header.without_gap_fields();
        assert_eq!(stripped.shift, 0);
        assert_eq!(stripped.adder, [0u8; 32]);
        assert_eq!(stripped.gap_size, 0);
        assert_eq!(stripped.prev_hash, header.prev_hash);
        assert_eq!(stripped.nonce, header.nonce);
        assert_eq!(stripped.bits, header.bits);
    }

    #[test]
    fn compact_bits_expand_to_reference_target() {
        let target = decode_compact(0x1d00_ffff);
        let mut expected = [0u8; 32];
        expected[4] = 0xff;
        expected[5] = 0xff;
        assert_eq!(target, expected);
    }

    #[test]
    fn meets_target_is_lexicographic() {
        let target = decode_compact(0x1d00_ffff);

        let mut hash = [0u8; 32];
        assert!(meets_target(&hash, &target));

        assert!(meets_target(&target.clone(), &target), "boundary is inclusive");

        hash[0] = 0x01;
        assert!(!meets_target(&hash, &target));

        hash = target;
        hash[31] = hash[31].wrapping_add(1);
        assert!(!meets_target(&hash, &target));
    }
}
