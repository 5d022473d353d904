use std::fmt;

/// Fixed-length bit vector, least significant bit first.
///
/// Bit `i` lives in byte `i / 8` at position `i % 8`. The storage is either owned
/// (`Vec<u8>`, the default) or borrowed from the caller, which lets a bitmap sit
/// directly on top of a block or an on-disk record without copying.
///
/// Bits past [`Bitmap::bit_count`] in the final byte are never reported by any query.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap<B = Vec<u8>> {
    bits: B,
    bit_count: usize,
}

const fn bytes_for(bit_count: usize) -> usize {
    bit_count.div_ceil(8)
}

impl Bitmap {
    /// Create a zero-filled bitmap.
    ///
    /// Returns `None` if `bit_count` is zero.
    pub fn new(bit_count: usize) -> Option<Self> {
        if bit_count == 0 {
            return None;
        }
        Some(Self {
            bits: vec![0; bytes_for(bit_count)],
            bit_count,
        })
    }

    /// Create a bitmap holding a copy of the first `ceil(bit_count / 8)` bytes of `bytes`.
    pub fn import(bit_count: usize, bytes: &[u8]) -> Option<Self> {
        if bit_count == 0 {
            return None;
        }
        let bits = bytes.get(..bytes_for(bit_count))?.to_vec();
        Some(Self { bits, bit_count })
    }
}

impl<B: AsRef<[u8]>> Bitmap<B> {
    /// Use caller-supplied storage as the bitmap's bytes.
    ///
    /// The existing contents are kept. Storage longer than needed is fine; only the
    /// leading `ceil(bit_count / 8)` bytes are ever touched.
    pub fn overlay(bit_count: usize, storage: B) -> Option<Self> {
        if bit_count == 0 || storage.as_ref().len() < bytes_for(bit_count) {
            return None;
        }
        Some(Self {
            bits: storage,
            bit_count,
        })
    }

    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    pub fn byte_count(&self) -> usize {
        bytes_for(self.bit_count)
    }

    fn bytes(&self) -> &[u8] {
        &self.bits.as_ref()[..self.byte_count()]
    }

    /// Value of `bit`, or `false` if it is out of range.
    pub fn test(&self, bit: usize) -> bool {
        if bit >= self.bit_count {
            return false;
        }
        self.bytes()[bit / 8] & (1 << (bit % 8)) != 0
    }

    /// Index of the lowest set bit.
    pub fn first_set(&self) -> Option<usize> {
        self.scan(|byte| byte != 0x00, |byte| byte.trailing_zeros())
    }

    /// Index of the lowest clear bit.
    pub fn first_zero(&self) -> Option<usize> {
        self.scan(|byte| byte != 0xFF, |byte| byte.trailing_ones())
    }

    fn scan(
        &self,
        interesting: impl Fn(u8) -> bool,
        position: impl Fn(u8) -> u32,
    ) -> Option<usize> {
        let (index, &byte) = self
            .bytes()
            .iter()
            .enumerate()
            .find(|&(_, &byte)| interesting(byte))?;
        let bit = index * 8 + position(byte) as usize;
        // a hit in the padding of the last byte is not a real bit
        (bit < self.bit_count).then_some(bit)
    }

    /// Number of set bits.
    pub fn total_set(&self) -> usize {
        (0..self.bit_count).filter(|&bit| self.test(bit)).count()
    }

    /// The raw bytes, suitable for [`Bitmap::import`] or for writing into a block.
    pub fn export(&self) -> &[u8] {
        self.bytes()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Bitmap<B> {
    /// Set `bit`. Returns `false` and changes nothing if `bit` is out of range.
    pub fn set(&mut self, bit: usize) -> bool {
        if bit >= self.bit_count {
            return false;
        }
        self.bits.as_mut()[bit / 8] |= 1 << (bit % 8);
        true
    }

    /// Clear `bit`. Returns `false` and changes nothing if `bit` is out of range.
    pub fn reset(&mut self, bit: usize) -> bool {
        if bit >= self.bit_count {
            return false;
        }
        self.bits.as_mut()[bit / 8] &= !(1 << (bit % 8));
        true
    }

    pub fn clear_all(&mut self) {
        let len = self.byte_count();
        self.bits.as_mut()[..len].fill(0);
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for Bitmap<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("bit_count", &self.bit_count)
            .field("set", &self.total_set())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_bits_is_rejected() {
        assert!(Bitmap::new(0).is_none());
        assert!(Bitmap::import(0, &[0xFF]).is_none());
        assert!(Bitmap::overlay(0, [0u8; 4]).is_none());
    }

    #[test]
    fn set_test_reset() {
        let mut bitmap = Bitmap::new(20).unwrap();
        assert_eq!(bitmap.byte_count(), 3);
        assert!(bitmap.set(0));
        assert!(bitmap.set(9));
        assert!(bitmap.set(19));
        // bit 0 behaves like any other bit
        assert!(bitmap.test(0));
        assert!(bitmap.test(9));
        assert!(!bitmap.test(10));
        assert_eq!(bitmap.export(), &[0b0000_0001, 0b0000_0010, 0b0000_1000]);
        assert!(bitmap.reset(9));
        assert!(!bitmap.test(9));
        assert_eq!(bitmap.total_set(), 2);
    }

    #[test]
    fn out_of_range() {
        let mut bitmap = Bitmap::new(10).unwrap();
        assert!(!bitmap.set(10));
        assert!(!bitmap.reset(100));
        assert!(!bitmap.test(10));
        assert_eq!(bitmap.total_set(), 0);
    }

    #[test]
    fn first_zero_and_first_set() {
        let mut bitmap = Bitmap::new(64).unwrap();
        assert_eq!(bitmap.first_set(), None);
        assert_eq!(bitmap.first_zero(), Some(0));
        for bit in 0..64 {
            bitmap.set(bit);
        }
        assert_eq!(bitmap.first_zero(), None);
        assert_eq!(bitmap.first_set(), Some(0));
        bitmap.reset(37);
        assert_eq!(bitmap.first_zero(), Some(37));
        bitmap.clear_all();
        bitmap.set(42);
        assert_eq!(bitmap.first_set(), Some(42));
    }

    #[test]
    fn padding_bits_are_never_found() {
        // 12 bits: the last byte has 4 bits of padding
        let mut bitmap = Bitmap::new(12).unwrap();
        for bit in 0..12 {
            bitmap.set(bit);
        }
        assert_eq!(bitmap.first_zero(), None);
        let bitmap = Bitmap::overlay(4, [0xF0u8]).unwrap();
        assert_eq!(bitmap.first_set(), None);
    }

    #[test]
    fn overlay_writes_through() {
        let mut storage = [0u8; 8];
        {
            let mut bitmap = Bitmap::overlay(16, &mut storage[..]).unwrap();
            bitmap.set(3);
            bitmap.set(8);
        }
        assert_eq!(storage[..2], [0b1000, 0b1]);
        assert!(Bitmap::overlay(65, &storage[..]).is_none());
    }

    #[test]
    fn export_import() {
        let mut bitmap = Bitmap::new(256).unwrap();
        for bit in [0, 7, 8, 100, 255] {
            bitmap.set(bit);
        }
        let copy = Bitmap::import(256, bitmap.export()).unwrap();
        assert_eq!(copy, bitmap);
        assert!(Bitmap::import(256, &[0; 31]).is_none());
    }
}
