//! Checksums used by the supported framings.

const CRC24Q_POLY: u32 = 0x0186_4CFB;
const CRC32_POLY: u32 = 0xEDB8_8320;

const fn crc24q_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24Q_POLY;
            }
            bit += 1;
        }
        table[i] = crc & 0x00FF_FFFF;
        i += 1;
    }
    table
}

static CRC24Q_TABLE: [u32; 256] = crc24q_table();

/// CRC-24Q (RTCM 3, SBAS).
pub fn crc24q(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |crc, &b| {
        ((crc << 8) & 0x00FF_FFFF) ^ CRC24Q_TABLE[(((crc >> 16) as u8) ^ b) as usize]
    })
}

/// Reflected CRC-32 without final inversion (NovAtel OEM4).
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &b in data {
        crc ^= u32::from(b);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLY
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// 8-bit Fletcher checksum pair (u-blox UBX).
pub fn fletcher8(data: &[u8]) -> (u8, u8) {
    data.iter().fold((0u8, 0u8), |(a, b), &byte| {
        let a = a.wrapping_add(byte);
        (a, b.wrapping_add(a))
    })
}

/// XOR of all bytes (SkyTraq).
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}
