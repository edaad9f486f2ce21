//! Raw primitives for the Nano PoW engine
//!
//! SipHash-2-4 (64 and 128-bit output) and the bit-reversal ladder. These are
//! written out by hand so the CPU path and the WGSL kernels can be compared
//! operation for operation.

/// SipHash initialisation constants ("somepseudorandomlygeneratedbytes")
const IV: [u64; 4] = [
    0x736f6d6570736575,
    0x646f72616e646f6d,
    0x6c7967656e657261,
    0x7465646279746573,
];

/// Compression rounds per message block
const C_ROUNDS: usize = 2;

/// Finalization rounds
const D_ROUNDS: usize = 4;

#[derive(Clone, Copy)]
struct SipState {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl SipState {
    #[inline(always)]
    fn new(key: [u64; 2], wide: bool) -> Self {
        let mut state = Self {
            v0: IV[0] ^ key[0],
            v1: IV[1] ^ key[1],
            v2: IV[2] ^ key[0],
            v3: IV[3] ^ key[1],
        };
        if wide {
            state.v1 ^= 0xee;
        }
        state
    }

    #[inline(always)]
    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    #[inline(always)]
    fn compress(&mut self, m: u64) {
        self.v3 ^= m;
        for _ in 0..C_ROUNDS {
            self.round();
        }
        self.v0 ^= m;
    }

    #[inline(always)]
    fn finalize_round(&mut self) -> u64 {
        for _ in 0..D_ROUNDS {
            self.round();
        }
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }

    /// Absorb a whole message, including the length-tagged final block
    #[inline(always)]
    fn absorb(&mut self, data: &[u8]) {
        let mut chunks = data.chunks_exact(8);
        for chunk in &mut chunks {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            self.compress(u64::from_le_bytes(word));
        }

        let mut last = (data.len() as u64) << 56;
        for (i, byte) in chunks.remainder().iter().enumerate() {
            last |= (*byte as u64) << (8 * i);
        }
        self.compress(last);
    }
}

/// SipHash-2-4 with a 64-bit output
pub fn siphash24_64(key: [u64; 2], data: &[u8]) -> u64 {
    let mut state = SipState::new(key, false);
    state.absorb(data);
    state.v2 ^= 0xff;
    state.finalize_round()
}

/// SipHash-2-4 with a 128-bit output
///
/// The first output word forms the low half of the result, so the value
/// matches the 16 output bytes read as a little-endian integer.
pub fn siphash24_128(key: [u64; 2], data: &[u8]) -> u128 {
    let mut state = SipState::new(key, true);
    state.absorb(data);
    wide_finalize(state)
}

/// SipHash-2-4 (128-bit output) of a single 64-bit item
///
/// Equivalent to `siphash24_128(key, &item.to_le_bytes())` without going
/// through a byte buffer. This is the hot path of fill and search.
#[inline(always)]
pub fn siphash24_128_u64(key: [u64; 2], item: u64) -> u128 {
    let mut state = SipState::new(key, true);
    state.compress(item);
    state.compress(8u64 << 56);
    wide_finalize(state)
}

#[inline(always)]
fn wide_finalize(mut state: SipState) -> u128 {
    state.v2 ^= 0xee;
    let lo = state.finalize_round();
    state.v1 ^= 0xdd;
    let hi = state.finalize_round();
    ((hi as u128) << 64) | lo as u128
}

/// Reverse the bit order of a 64-bit word (swap ladder)
#[inline(always)]
pub fn reverse_64(item: u64) -> u64 {
    let mut result = item;
    result = ((result >> 1) & 0x5555555555555555) | ((result & 0x5555555555555555) << 1);
    result = ((result >> 2) & 0x3333333333333333) | ((result & 0x3333333333333333) << 2);
    result = ((result >> 4) & 0x0F0F0F0F0F0F0F0F) | ((result & 0x0F0F0F0F0F0F0F0F) << 4);
    result = ((result >> 8) & 0x00FF00FF00FF00FF) | ((result & 0x00FF00FF00FF00FF) << 8);
    result = ((result >> 16) & 0x0000FFFF0000FFFF) | ((result & 0x0000FFFF0000FFFF) << 16);
    (result >> 32) | (result << 32)
}

/// Reverse the bit order of a 128-bit word
///
/// Each 64-bit limb is reversed and the limbs trade places.
#[inline(always)]
pub fn reverse_128(item: u128) -> u128 {
    let lo = item as u64;
    let hi = (item >> 64) as u64;
    ((reverse_64(lo) as u128) << 64) | reverse_64(hi) as u128
}
