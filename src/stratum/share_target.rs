use super::*;

/// Pool share threshold, advertised to miners as four little-endian hex
/// bytes. A hash whose top 32 bits (as a little-endian word) are at most the
/// threshold counts as a share; a higher value is an easier target.
///
/// This is deliberately much easier than the consensus target so miners
/// submit often; the real validation happens server-side against the full
/// 256-bit target from `bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct ShareTarget(u32);

impl ShareTarget {
    /// Threshold for a given share difficulty: `u32::MAX / difficulty`.
    pub fn from_difficulty(difficulty: u32) -> Self {
        Self(u32::MAX / difficulty.max(1))
    }

    pub fn difficulty(self) -> u32 {
        u32::MAX / self.0.max(1)
    }
}

impl FromStr for ShareTarget {
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
        Ok(Self(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }
}

impl fmt::Display for ShareTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_le_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
