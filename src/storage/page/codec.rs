use byteorder::{ByteOrder, NativeEndian};

use crate::common::types::Rid;

/// Fixed-width binary codec for keys and values stored in slotted index
/// pages. Encoded widths are compile-time constants so page capacities can
/// be derived from the page size; byte order matches the host.
pub trait FixedWidth: Copy {
    const WIDTH: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl FixedWidth for i32 {
    const WIDTH: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_i32(buf)
    }
}

impl FixedWidth for u32 {
    const WIDTH: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_u32(buf)
    }
}

impl FixedWidth for i64 {
    const WIDTH: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_i64(buf)
    }
}

impl FixedWidth for u64 {
    const WIDTH: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        NativeEndian::read_u64(buf)
    }
}

impl FixedWidth for Rid {
    const WIDTH: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        NativeEndian::write_i32(&mut buf[0..4], self.page_id);
        NativeEndian::write_u32(&mut buf[4..8], self.slot);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: NativeEndian::read_i32(&buf[0..4]),
            slot: NativeEndian::read_u32(&buf[4..8]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i32_roundtrip() {
        let mut buf = [0u8; 4];
        (-12345i32).encode(&mut buf);
        assert_eq!(-12345, i32::decode(&buf));
    }

    #[test]
    fn test_rid_roundtrip() {
        let mut buf = [0u8; 8];
        let rid = Rid::new(42, 7);
        rid.encode(&mut buf);
        assert_eq!(rid, Rid::decode(&buf));
    }
}
