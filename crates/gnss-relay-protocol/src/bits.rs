//! MSB-first bit field access, as used by RTCM.

/// Read `len` bits (at most 32) starting at bit `pos` as unsigned.
pub fn get_unsigned(buf: &[u8], pos: usize, len: usize) -> u32 {
    debug_assert!(len <= 32);
    let mut value = 0u32;
    for i in pos..pos + len {
        let bit = (buf[i / 8] >> (7 - i % 8)) & 1;
        value = (value << 1) | u32::from(bit);
    }
    value
}

/// Read `len` bits (at most 32) starting at bit `pos` as two's complement.
pub fn get_signed(buf: &[u8], pos: usize, len: usize) -> i32 {
    let value = get_unsigned(buf, pos, len);
    if len == 0 || len == 32 {
        return value as i32;
    }
    if value & (1 << (len - 1)) != 0 {
        (value | (!0u32 << len)) as i32
    } else {
        value as i32
    }
}

/// Read a 38-bit two's complement field.
pub fn get_signed_38(buf: &[u8], pos: usize) -> i64 {
    let high = i64::from(get_signed(buf, pos, 32));
    let low = i64::from(get_unsigned(buf, pos + 32, 6));
    high * 64 + low
}

/// Write the low `len` bits (at most 32) of `value` at bit `pos`.
pub fn set_unsigned(buf: &mut [u8], pos: usize, len: usize, value: u32) {
    debug_assert!(len <= 32);
    for (n, i) in (pos..pos + len).enumerate() {
        let bit = (value >> (len - 1 - n)) & 1;
        let mask = 1u8 << (7 - i % 8);
        if bit == 1 {
            buf[i / 8] |= mask;
        } else {
            buf[i / 8] &= !mask;
        }
    }
}

/// Write `value` as a `len`-bit two's complement field.
pub fn set_signed(buf: &mut [u8], pos: usize, len: usize, value: i32) {
    set_unsigned(buf, pos, len, value as u32);
}

/// Write a 38-bit two's complement field.
pub fn set_signed_38(buf: &mut [u8], pos: usize, value: i64) {
    set_signed(buf, pos, 32, value.div_euclid(64) as i32);
    set_unsigned(buf, pos + 32, 6, value.rem_euclid(64) as u32);
}
