/// Internet checksum (RFC 1071) over a byte stream.
///
/// Words are read big-endian straight from the buffer, so the result is the
/// same on any host. Callers store it with `to_be_bytes`.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    // odd trailing byte is padded with zero
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(u32::from(*last) << 8);
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// True when a message carrying its own checksum sums to zero.
pub fn verify(data: &[u8]) -> bool {
    checksum(data) == 0
}
