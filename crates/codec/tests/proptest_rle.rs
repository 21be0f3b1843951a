//! Property tests for the run-length codec and the instance record layout.
//!
//! These check that decoding never panics on arbitrary input, that every valid stream
//! round-trips, and that truncated streams yield a prefix of the original data.

use proptest::prelude::*;
use scenesync_codec::{decode, encode, InstanceBlob, RleCodec};

/// Arrays with a realistic mix of runs and distinct values.
fn runs_of<T: Clone + std::fmt::Debug>(
    value: impl Strategy<Value = T>,
) -> impl Strategy<Value = Vec<T>> {
    prop::collection::vec((value, 1usize..12), 0..40).prop_map(|segments| {
        segments
            .into_iter()
            .flat_map(|(value, repeat)| std::iter::repeat(value).take(repeat))
            .collect()
    })
}

proptest! {
    /// Property: byte arrays round-trip
    #[test]
    fn bytes_roundtrip(data in runs_of(any::<u8>())) {
        let encoded = encode(&data);
        prop_assert_eq!(decode::<u8>(&encoded).unwrap(), data);
    }

    /// Property: 4-byte arrays round-trip
    #[test]
    fn words_roundtrip(data in runs_of(0u32..4)) {
        let encoded = encode(&data);
        prop_assert_eq!(decode::<u32>(&encoded).unwrap(), data);
    }

    /// Property: fully distinct arrays round-trip
    #[test]
    fn distinct_roundtrip(len in 0usize..600) {
        let data: Vec<i64> = (0..len as i64).collect();
        let encoded = encode(&data);
        prop_assert_eq!(decode::<i64>(&encoded).unwrap(), data);
    }

    /// Property: every prefix of a valid stream decodes to a prefix of the input
    #[test]
    fn truncated_streams_yield_prefixes(data in runs_of(0u16..3)) {
        let encoded = encode(&data);
        for cut in 0..encoded.len() {
            let partial = decode::<u16>(&encoded[..cut]).unwrap();
            prop_assert!(partial.len() <= data.len());
            prop_assert_eq!(&partial[..], &data[..partial.len()]);
        }
    }

    /// Property: arbitrary bytes don't crash the decoder
    #[test]
    fn arbitrary_bytes_dont_crash(random_bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let codec = RleCodec::<u32>::raw().with_max_elements(1 << 16);
        let _result = codec.decode(&random_bytes);
        // No panic = success
    }

    /// Property: arbitrary bytes don't crash the record decoder
    #[test]
    fn arbitrary_records_dont_crash(random_bytes in prop::collection::vec(any::<u8>(), 0..200)) {
        let _result = InstanceBlob::decode(&random_bytes);
    }
}

mod unit_tests {
    use super::*;

    #[test]
    fn uniform_array_is_a_single_run() {
        let data = vec![9u32; 1000];
        let encoded = encode(&data);
        // header + 2 count bytes + element + end marker
        assert_eq!(encoded.len(), 1 + 2 + 4 + 1);
        assert_eq!(decode::<u32>(&encoded).unwrap(), data);
    }
}
