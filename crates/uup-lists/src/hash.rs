//! Port of [Bob Jenkins' `lookup3.c`][0] to Rust.
//!
//! These functions are not intended for cryptographic purposes. They feed
//! the object-hash probe derivation and nothing else.
//!
//! [0]: https://www.burtleburtle.net/bob/c/lookup3.c

/// Mix 3 `u32` values reversibly.
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);

    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);

    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);

    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);

    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);

    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

/// Final mixing of 3 `u32` values.
fn final_(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));

    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));

    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));

    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));

    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));

    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));

    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// Returns 2 32-bit hash values, reading `key` in chunks of 3
/// little-endian `u32`s.
pub fn hashlittle2(key: &[u8], pc: &mut u32, pb: &mut u32) {
    let mut a = 0xdeadbeef_u32
        .wrapping_add((key.len() & (u32::MAX as usize)) as u32)
        .wrapping_add(*pc);
    let mut b = a;
    let mut c = a.wrapping_add(*pb);
    let mut k = key;

    if k.is_empty() {
        // Empty strings need no mixing
        *pc = c;
        *pb = b;
        return;
    }

    while k.len() > 12 {
        a = a.wrapping_add(u32::from_le_bytes(k[0..4].try_into().expect("4 bytes")));
        b = b.wrapping_add(u32::from_le_bytes(k[4..8].try_into().expect("4 bytes")));
        c = c.wrapping_add(u32::from_le_bytes(k[8..12].try_into().expect("4 bytes")));
        mix(&mut a, &mut b, &mut c);
        k = &k[12..];
    }

    // Handle the last, possibly-short block by copying it into an aligned,
    // zero-padded buffer.
    let mut final_block = [0; 12];
    final_block[..k.len()].copy_from_slice(k);

    a = a.wrapping_add(u32::from_le_bytes(final_block[0..4].try_into().expect("4 bytes")));
    if k.len() > 4 {
        b = b.wrapping_add(u32::from_le_bytes(final_block[4..8].try_into().expect("4 bytes")));
    }
    if k.len() > 8 {
        c = c.wrapping_add(u32::from_le_bytes(final_block[8..12].try_into().expect("4 bytes")));
    }

    final_(&mut a, &mut b, &mut c);

    *pc = c;
    *pb = b;
}

/// Derive four 32-bit probe values from one key.
///
/// Two seeded passes of [`hashlittle2`] stand in for a single 128-bit hash;
/// the object-hash uses one probe per candidate row.
pub fn probes4(key: &[u8], seed: u32) -> [u32; 4] {
    let (mut c0, mut b0) = (seed, 0);
    hashlittle2(key, &mut c0, &mut b0);
    let (mut c1, mut b1) = (seed.rotate_left(16) ^ 0x5bd1_e995, 0);
    hashlittle2(key, &mut c1, &mut b1);
    [c0, b0, c1, b1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashlittle2_is_stable() {
        let (mut c, mut b) = (0, 0);
        hashlittle2(b"", &mut c, &mut b);
        assert_eq!((c, b), (0xdeadbeef, 0xdeadbeef));

        let (mut c1, mut b1) = (0, 0);
        hashlittle2(b"Four score and seven years ago", &mut c1, &mut b1);
        let (mut c2, mut b2) = (0, 0);
        hashlittle2(b"Four score and seven years ago", &mut c2, &mut b2);
        assert_eq!((c1, b1), (c2, b2));
    }

    #[test]
    fn probes_differ_between_keys() {
        assert_ne!(probes4(b"one", 0xa59b_c9d7), probes4(b"two", 0xa59b_c9d7));
    }
}
