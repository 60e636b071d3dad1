// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! A fixed-size secret byte array that zeroizes itself on drop.

use zeroize::Zeroize;

#[derive(Clone)]
pub struct Secret<const N: usize>(pub [u8; N]);

impl<const N: usize> Secret<N> {
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Clone the first `M` bytes into a new, smaller secret. Used to split a wide keying hash
    /// output into the narrower keys actually used for encryption.
    pub fn first_n_clone<const M: usize>(&self) -> Secret<M> {
        debug_assert!(M <= N);
        let mut tmp = [0u8; M];
        tmp.copy_from_slice(&self.0[..M]);
        Secret(tmp)
    }
}

impl<const N: usize> Default for Secret<N> {
    #[inline(always)]
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> Drop for Secret<N> {
    #[inline(always)]
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_n_clone_takes_prefix() {
        let s = Secret([1u8, 2, 3, 4, 5, 6, 7, 8]);
        let t: Secret<4> = s.first_n_clone();
        assert_eq!(t.as_bytes(), &[1, 2, 3, 4]);
    }
}
