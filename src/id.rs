//! Identifier arithmetic on the 160-bit Chord ring (spec §4.1).
//!
//! An [`Id`] is a big-endian unsigned integer modulo `2^ID_BITS`. Natural
//! `Ord`/`PartialOrd` on the byte array already matches unsigned numeric
//! order, so ring *distance* is computed by wrapping subtraction and
//! compared with the derived `Ord` (there is no separate "magnitude" type).

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

use crate::ID_BYTES;

/// A point on the 160-bit Chord ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Id(pub [u8; ID_BYTES]);

impl Id {
    /// Constructs an `Id` from raw big-endian bytes.
    pub fn new(bytes: [u8; ID_BYTES]) -> Self {
        Id(bytes)
    }

    /// Computes `sha1(data)`, used both to derive a hosted node's id and to
    /// verify fetched content against the id it was requested under.
    pub fn hash_of(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest);
        Id(bytes)
    }

    /// A uniformly random id, used by the test harness and scenario code.
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Id(bytes)
    }

    /// A uniformly random id with exactly `k` leading zero bits, used by
    /// the test harness to synthesize peers at a controlled ring distance
    /// from zero.
    pub fn random_in_bucket(k: usize) -> Self {
        debug_assert!(k < ID_BYTES * 8);
        let mut id = Self::random();
        let byte = k / 8;
        let bit = k % 8;
        for b in id.0[..byte].iter_mut() {
            *b = 0;
        }
        id.0[byte] &= 0xFF >> bit;
        id.0[byte] |= 1 << (7 - bit);
        id
    }

    /// `self + 2^k (mod 2^ID_BITS)`, the target used by finger-table entry
    /// `k` during stabilization.
    pub fn add_pow2(&self, k: usize) -> Id {
        debug_assert!(k < ID_BYTES * 8);
        let mut bytes = self.0;
        let byte_index = ID_BYTES - 1 - k / 8;
        let mut carry: u16 = 1u16 << (k % 8);
        let mut i = byte_index as isize;
        while carry > 0 && i >= 0 {
            let sum = bytes[i as usize] as u16 + carry;
            bytes[i as usize] = (sum & 0xFF) as u8;
            carry = sum >> 8;
            i -= 1;
        }
        Id(bytes)
    }

    /// `self - 1 (mod 2^ID_BITS)`.
    pub fn sub_one(&self) -> Id {
        let mut bytes = self.0;
        for byte in bytes.iter_mut().rev() {
            if *byte == 0 {
                *byte = 0xFF;
            } else {
                *byte -= 1;
                break;
            }
        }
        Id(bytes)
    }

    /// Clockwise ring distance `(to - from) mod 2^ID_BITS`: the number of
    /// steps walked clockwise starting at `from` to reach `to`.
    pub fn distance(from: &Id, to: &Id) -> Id {
        let mut result = [0u8; ID_BYTES];
        let mut borrow: i16 = 0;
        for i in (0..ID_BYTES).rev() {
            let mut diff = to.0[i] as i16 - from.0[i] as i16 - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            result[i] = diff as u8;
        }
        Id(result)
    }

    fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// `true` iff `self` lies in the clockwise half-open interval `(a, b]`.
    pub fn in_open_closed(&self, a: &Id, b: &Id) -> bool {
        let d_self = Id::distance(a, self);
        let d_b = Id::distance(a, b);
        !d_self.is_zero() && d_self <= d_b
    }

    /// `true` iff `self` lies in the clockwise half-open interval `[a, b)`.
    pub fn in_closed_open(&self, a: &Id, b: &Id) -> bool {
        let d_self = Id::distance(a, self);
        let d_b = Id::distance(a, b);
        d_self < d_b
    }

    /// Picks the index of the element of `candidates` closest to `target`
    /// from below, i.e. minimizing `(target - candidate) mod 2^ID_BITS`.
    /// Ties broken by lowest raw id. Operates on bare ids; callers with
    /// richer items (e.g. `RemoteNode`) map to `&Id` first.
    pub fn closest_to<'a, I>(target: &Id, candidates: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a Id>,
    {
        candidates
            .into_iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let da = Id::distance(a, target);
                let db = Id::distance(b, target);
                da.cmp(&db).then_with(|| a.cmp(b))
            })
            .map(|(i, _)| i)
    }

    /// Lowercase hex representation, used for logging and the CLI.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    extern crate num_bigint;

    use self::num_bigint::BigUint;
    use super::*;

    fn to_biguint(id: &Id) -> BigUint {
        BigUint::from_bytes_be(&id.0)
    }

    fn modulus() -> BigUint {
        BigUint::from(1u32) << (ID_BYTES * 8)
    }

    #[test]
    fn add_pow2_matches_bignum_arithmetic() {
        let id = Id::random();
        for k in 0..ID_BYTES * 8 {
            let expected = (to_biguint(&id) + (BigUint::from(1u32) << k)) % modulus();
            assert_eq!(to_biguint(&id.add_pow2(k)), expected);
        }
    }

    #[test]
    fn random_in_bucket_has_exact_leading_zero_bits() {
        for k in 0..ID_BYTES * 8 {
            let id = Id::random_in_bucket(k);
            let bits = to_biguint(&id).bits() as usize;
            assert_eq!(ID_BYTES * 8 - bits, k);
        }
    }

    #[test]
    fn sub_one_wraps_at_zero() {
        let zero = Id::new([0u8; ID_BYTES]);
        let max = zero.sub_one();
        assert_eq!(to_biguint(&max), modulus() - 1u32);
    }

    #[test]
    fn distance_is_modular_subtraction() {
        let a = Id::random();
        let b = Id::random();
        let expected = (modulus() + to_biguint(&b) - to_biguint(&a)) % modulus();
        assert_eq!(to_biguint(&Id::distance(&a, &b)), expected);
    }

    #[test]
    fn interval_boundaries() {
        let a = Id::new([0u8; ID_BYTES]);
        let mut b_bytes = [0u8; ID_BYTES];
        b_bytes[ID_BYTES - 1] = 10;
        let b = Id::new(b_bytes);

        assert!(!a.in_open_closed(&a, &b)); // a excluded
        assert!(b.in_open_closed(&a, &b)); // b included

        assert!(a.in_closed_open(&a, &b)); // a included
        assert!(!b.in_closed_open(&a, &b)); // b excluded
    }

    #[test]
    fn closest_to_picks_nearest_from_below_with_tiebreak() {
        let target = Id::new({
            let mut bytes = [0u8; ID_BYTES];
            bytes[ID_BYTES - 1] = 100;
            bytes
        });
        let near = Id::new({
            let mut bytes = [0u8; ID_BYTES];
            bytes[ID_BYTES - 1] = 90;
            bytes
        });
        let far = Id::new({
            let mut bytes = [0u8; ID_BYTES];
            bytes[ID_BYTES - 1] = 10;
            bytes
        });
        let candidates = vec![far, near];
        let idx = Id::closest_to(&target, candidates.iter()).unwrap();
        assert_eq!(candidates[idx], near);
    }
}
