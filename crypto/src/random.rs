//! Cryptographic random byte helpers.

use rand::RngCore;

/// Fill a fresh buffer of `len` bytes from the OS CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// A fresh 16-byte AES-CBC initialization vector.
pub fn random_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// A fresh 16-byte heartbeat challenge.
pub fn random_challenge() -> [u8; 16] {
    random_iv()
}

/// A fresh 20-byte X.509 serial number, as spec'd for self-signed certs.
pub fn random_serial() -> [u8; 20] {
    let mut serial = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut serial);
    // Ensure the serial is a positive integer when read as big-endian.
    serial[0] &= 0x7f;
    serial
}

/// Draw a 6-decimal-digit session passcode from 3 random bytes, zero-padded.
///
/// Matches the data model in spec.md §3: the passcode is derived from 3
/// random bytes (0..=16_777_215) taken modulo 1_000_000 and zero-padded to
/// 6 digits, so short sessions still get a full-width code.
pub fn random_passcode() -> String {
    let bytes = random_bytes(3);
    let value = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32);
    format!("{:06}", value % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passcode_is_six_digits() {
        for _ in 0..100 {
            let code = random_passcode();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn iv_and_challenge_are_16_bytes() {
        assert_eq!(random_iv().len(), 16);
        assert_eq!(random_challenge().len(), 16);
    }

    #[test]
    fn serial_is_20_bytes_and_positive() {
        let serial = random_serial();
        assert_eq!(serial.len(), 20);
        assert_eq!(serial[0] & 0x80, 0);
    }
}
