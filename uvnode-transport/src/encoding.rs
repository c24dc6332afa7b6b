//! Little-endian integer encoding primitives
//!
//! Writers panic if the buffer is shorter than the encoded value; readers return `None`.

pub fn put_u16(buffer: &mut [u8], value: u16) {
    buffer[..2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(buffer: &mut [u8], value: u32) {
    buffer[..4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(buffer: &mut [u8], value: u64) {
    buffer[..8].copy_from_slice(&value.to_le_bytes());
}

pub fn get_u16(buffer: &[u8]) -> Option<u16> {
    Some(u16::from_le_bytes(buffer.get(..2)?.try_into().ok()?))
}

pub fn get_u32(buffer: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(buffer.get(..4)?.try_into().ok()?))
}

pub fn get_u64(buffer: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(buffer.get(..8)?.try_into().ok()?))
}
