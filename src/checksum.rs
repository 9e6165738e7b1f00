use crc32fast::Hasher;

/// Calculates the CRC32 checksum that trails every M12 frame.
pub struct Checksum {
    hasher: Hasher,
}

impl Checksum {
    /// Creates a new `Checksum` instance with an empty CRC state.
    #[inline]
    pub fn new() -> Checksum {
        Checksum {
            hasher: Hasher::new(),
        }
    }

    /// Includes a slice of bytes in the checksum calculation.
    ///
    /// # Arguments
    ///
    /// * `data` - The byte slice to feed into the CRC.
    #[inline]
    pub fn push_slice(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Returns the calculated checksum value.
    #[inline]
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Computes the checksum of `data` in one call.
    #[inline]
    pub fn of(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Checksum;

    #[test]
    fn crc32_check_value() {
        // standard CRC32 check value
        assert_eq!(Checksum::of(b"123456789"), 0xCBF4_3926);

        let mut checksum = Checksum::new();
        checksum.push_slice(b"1234");
        checksum.push_slice(b"56789");
        assert_eq!(checksum.checksum(), 0xCBF4_3926);
    }
}
