use super::*;

/// A submitted nonce: four little-endian hex bytes on the wire, so
/// `"01000000"` is nonce 1. Host endianness never leaks into the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct Nonce(u32);

impl FromStr for Nonce {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = snafu::ResultExt::context(hex::decode(s), HexSnafu)?;
        snafu::ensure!(
            bytes.len() == 4,
            InvalidLengthSnafu {
                expected: 4usize,
                actual: bytes.len(),
            }
        );
        Ok(Nonce(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_le_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<Nonce> for u32 {
    fn from(n: Nonce) -> u32 {
        n.0
    }
}

impl From<u32> for Nonce {
    fn from(n: u32) -> Nonce {
        Nonce(n)
    }
}
