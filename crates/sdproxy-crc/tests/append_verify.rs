#![cfg(not(target_arch = "wasm32"))]

use proptest::prelude::*;
use sdproxy_crc::{crc16_xmodem, crc16_xmodem_bytes};

proptest! {
    #[test]
    fn appended_crc_verifies_to_zero(data in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let mut framed = data.clone();
        framed.extend_from_slice(&crc16_xmodem_bytes(&data));
        prop_assert_eq!(crc16_xmodem(&framed), 0);
    }

    #[test]
    fn single_bit_flip_changes_crc(
        data in proptest::collection::vec(any::<u8>(), 1..512),
        bit in 0usize..8,
        idx in any::<prop::sample::Index>(),
    ) {
        let i = idx.index(data.len());
        let mut corrupted = data.clone();
        corrupted[i] ^= 1 << bit;
        prop_assert_ne!(crc16_xmodem(&data), crc16_xmodem(&corrupted));
    }
}
