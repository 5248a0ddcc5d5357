//! Minimal EBML element writer.

/// Encode `size` as the shortest EBML variable-length integer.
pub fn write_vint(buf: &mut Vec<u8>, size: u64) {
    // All-ones is reserved for "unknown size", so each width holds one less.
    let mut len = 1;
    while len < 8 && size >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    let marked = size | (1u64 << (7 * len));
    buf.extend_from_slice(&marked.to_be_bytes()[8 - len..]);
}

/// Element IDs are written as-is, leading marker bits included.
pub fn write_id(buf: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Master or binary element with an already-built payload.
pub fn write_element(buf: &mut Vec<u8>, id: u32, payload: &[u8]) {
    write_id(buf, id);
    write_vint(buf, payload.len() as u64);
    buf.extend_from_slice(payload);
}

/// Master element whose payload is produced by `body`.
pub fn write_master(buf: &mut Vec<u8>, id: u32, body: impl FnOnce(&mut Vec<u8>)) {
    let mut payload = Vec::new();
    body(&mut payload);
    write_element(buf, id, &payload);
}

pub fn write_uint(buf: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    write_element(buf, id, &bytes[skip..]);
}

pub fn write_float(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_element(buf, id, &value.to_be_bytes());
}

pub fn write_string(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_element(buf, id, value.as_bytes());
}
