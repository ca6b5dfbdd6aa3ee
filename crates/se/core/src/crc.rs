//! Checksums used by the block transport
//!
//! All variants are bit-serial, reflected CRC-16 implementations that only
//! differ in their polynomial, initial value and final XOR.

/// Reflected bit-serial CRC-16 over `data`
const fn crc16_reflected(data: &[u8], polynomial: u16, init: u16, xor_out: u16) -> u16 {
    let mut crc = init;
    let mut i = 0;
    while i < data.len() {
        crc ^= data[i] as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x0001 != 0 { (crc >> 1) ^ polynomial } else { crc >> 1 };
            bit += 1;
        }
        i += 1;
    }
    crc ^ xor_out
}

/// CRC-16 according to CCITT X.25 (polynomial 0x1021 reflected, init and final XOR 0xffff)
///
/// This is the checksum guarding every T=1' block.
pub const fn crc16_ccitt_x25(data: &[u8]) -> u16 {
    crc16_reflected(data, 0x8408, 0xffff, 0xffff)
}

/// CRC-16 according to MCRF4xx (polynomial 0x1021 reflected, init 0xffff, no final XOR)
pub const fn crc16_mcrf4xx(data: &[u8]) -> u16 {
    crc16_reflected(data, 0x8408, 0xffff, 0x0000)
}

/// CRC-16 used by the G+D flavour of T=1
pub const fn crc16_t1gd(data: &[u8]) -> u16 {
    crc16_reflected(data, 0x0408, 0xffff, 0x0000)
}

/// 8 bit longitudinal redundancy code (XOR of all bytes)
pub const fn lrc8(data: &[u8]) -> u8 {
    let mut lrc = 0;
    let mut i = 0;
    while i < data.len() {
        lrc ^= data[i];
        i += 1;
    }
    lrc
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_crc16_ccitt_x25() {
        assert_eq!(crc16_ccitt_x25(&hex!("01020304")), 0x3991);
        assert_eq!(crc16_ccitt_x25(&[]), 0x0000);
    }

    #[test]
    fn test_crc16_mcrf4xx() {
        assert_eq!(crc16_mcrf4xx(&hex!("01020304")), 0xc66e);
        assert_eq!(crc16_mcrf4xx(&[]), 0xffff);
    }

    #[test]
    fn test_crc16_t1gd() {
        assert_eq!(crc16_t1gd(&hex!("01020304")), 0x0610);
        assert_eq!(crc16_t1gd(&[]), 0xffff);
    }

    #[test]
    fn test_lrc8() {
        assert_eq!(lrc8(&hex!("01020408")), 0x0f);
        assert_eq!(lrc8(&[]), 0x00);
    }

    #[test]
    fn test_x25_check_value() {
        // Standard catalogue check value over "123456789"
        assert_eq!(crc16_ccitt_x25(b"123456789"), 0x906e);
    }
}
