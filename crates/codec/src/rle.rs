//! Run-length codec for homogeneous arrays.
//!
//! Stream grammar: a sequence of segments terminated by an END byte (`0`). A segment
//! header stores the segment kind in bits 2-3 and `count width - 1` in bits 0-1; the
//! count follows as 1-4 little-endian bytes.
//! - RUN: `count` repeats of exactly one encoded element.
//! - BLOCK: `count` elements encoded back to back.
//!
//! A maximal run of at least two equal elements becomes a RUN once its encoded span
//! (`count * element_size`) reaches [`MIN_RUN_BYTES`]; shorter runs fold into the
//! surrounding BLOCK.

use crate::DecodeError;

const END: u8 = 0b0000;
const RUN: u8 = 0b0100;
const BLOCK: u8 = 0b1000;
const KIND_MASK: u8 = 0b1100;
const WIDTH_MASK: u8 = 0b0011;

/// Minimum encoded span (bytes) for a run to be emitted as a RUN segment.
pub const MIN_RUN_BYTES: usize = 5;

/// Default cap on decoded elements; guards against run-length bombs.
pub const MAX_ELEMENTS: usize = 1 << 24;

/// Fixed-size element copied as raw little-endian bytes.
pub trait RawElement: Copy + PartialEq {
    /// Encoded size in bytes.
    const SIZE: usize;
    /// Append the little-endian encoding.
    fn write_le(&self, out: &mut Vec<u8>);
    /// Read from the first [`Self::SIZE`] bytes of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! raw_element {
    ($($ty:ty),*) => {
        $(
            impl RawElement for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

raw_element!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// Result of a per-element decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementError {
    /// Not enough bytes left; decoding stops with a partial result.
    Incomplete,
    /// Malformed element; the whole decode call fails.
    Invalid,
}

type Encoder<'a, T> = Box<dyn Fn(&T, &mut Vec<u8>) + 'a>;
type Decoder<'a, T> = Box<dyn Fn(&[u8]) -> Result<(T, usize), ElementError> + 'a>;
type Comparator<'a, T> = Box<dyn Fn(&T, &T) -> bool + 'a>;

/// Run-length codec with pluggable element encode/decode/compare functions.
pub struct RleCodec<'a, T> {
    element_size: usize,
    encoder: Encoder<'a, T>,
    decoder: Decoder<'a, T>,
    comparator: Comparator<'a, T>,
    max_elements: usize,
}

impl<'a, T: RawElement + 'a> RleCodec<'a, T> {
    /// Codec copying elements as raw bytes and comparing with `==`.
    pub fn raw() -> Self {
        Self {
            element_size: T::SIZE,
            encoder: Box::new(|value: &T, out: &mut Vec<u8>| value.write_le(out)),
            decoder: Box::new(|bytes: &[u8]| {
                if bytes.len() < T::SIZE {
                    Err(ElementError::Incomplete)
                } else {
                    Ok((T::read_le(bytes), T::SIZE))
                }
            }),
            comparator: Box::new(|a: &T, b: &T| a == b),
            max_elements: MAX_ELEMENTS,
        }
    }
}

impl<'a, T: PartialEq + 'a> RleCodec<'a, T> {
    /// Codec with custom element encoding. `element_size` is the nominal encoded size
    /// used for the run threshold; the decoder returns the element and bytes consumed.
    pub fn custom<E, D>(element_size: usize, encoder: E, decoder: D) -> Self
    where
        E: Fn(&T, &mut Vec<u8>) + 'a,
        D: Fn(&[u8]) -> Result<(T, usize), ElementError> + 'a,
    {
        Self {
            element_size: element_size.max(1),
            encoder: Box::new(encoder),
            decoder: Box::new(decoder),
            comparator: Box::new(|a: &T, b: &T| a == b),
            max_elements: MAX_ELEMENTS,
        }
    }
}

impl<'a, T: Clone> RleCodec<'a, T> {
    /// Replace the equality used to detect runs.
    pub fn with_comparator<C>(mut self, comparator: C) -> Self
    where
        C: Fn(&T, &T) -> bool + 'a,
    {
        self.comparator = Box::new(comparator);
        self
    }

    /// Replace the decoded element cap.
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Encode `data` into a self-describing stream.
    pub fn encode(&self, data: &[T]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut block_start = 0;
        let mut index = 0;
        while index < data.len() {
            let mut end = index + 1;
            while end < data.len() && (self.comparator)(&data[index], &data[end]) {
                end += 1;
            }
            let run = end - index;
            if run >= 2 && run * self.element_size >= MIN_RUN_BYTES {
                self.write_block(&data[block_start..index], &mut out);
                self.write_run(&data[index], run, &mut out);
                block_start = end;
            }
            index = end;
        }
        self.write_block(&data[block_start..], &mut out);
        out.push(END);
        out
    }

    /// Decode a stream.
    ///
    /// A segment that declares more bytes than remain ends decoding with the elements
    /// decoded so far. Unknown segment kinds and rejected elements fail the call.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<T>, DecodeError> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let header_offset = offset;
            let header = bytes[offset];
            offset += 1;
            let kind = header & KIND_MASK;
            if kind == END {
                break;
            }
            if kind != RUN && kind != BLOCK {
                return Err(DecodeError::UnknownSegment {
                    header,
                    offset: header_offset,
                });
            }
            let width = (header & WIDTH_MASK) as usize + 1;
            let Some(count_bytes) = bytes.get(offset..offset + width) else {
                break;
            };
            offset += width;
            let count = read_count(count_bytes);
            if out.len() + count > self.max_elements {
                return Err(DecodeError::TooLarge(out.len() + count));
            }

            if kind == RUN {
                match (self.decoder)(&bytes[offset..]) {
                    Ok((value, used)) => {
                        offset = (offset + used).min(bytes.len());
                        out.extend(std::iter::repeat(value).take(count));
                    }
                    Err(ElementError::Incomplete) => break,
                    Err(ElementError::Invalid) => return Err(DecodeError::Rejected(offset)),
                }
            } else {
                for _ in 0..count {
                    match (self.decoder)(&bytes[offset..]) {
                        Ok((value, used)) => {
                            offset = (offset + used).min(bytes.len());
                            out.push(value);
                        }
                        Err(ElementError::Incomplete) => return Ok(out),
                        Err(ElementError::Invalid) => return Err(DecodeError::Rejected(offset)),
                    }
                }
            }
        }
        Ok(out)
    }

    fn write_run(&self, value: &T, count: usize, out: &mut Vec<u8>) {
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(u32::MAX as usize);
            write_header(RUN, chunk as u32, out);
            (self.encoder)(value, out);
            remaining -= chunk;
        }
    }

    fn write_block(&self, items: &[T], out: &mut Vec<u8>) {
        for chunk in items.chunks(u32::MAX as usize) {
            write_header(BLOCK, chunk.len() as u32, out);
            for item in chunk {
                (self.encoder)(item, out);
            }
        }
    }
}

/// Encode raw elements with the default settings.
pub fn encode<T: RawElement>(data: &[T]) -> Vec<u8> {
    RleCodec::raw().encode(data)
}

/// Decode raw elements with the default settings.
pub fn decode<T: RawElement>(bytes: &[u8]) -> Result<Vec<T>, DecodeError> {
    RleCodec::raw().decode(bytes)
}

fn count_width(count: u32) -> usize {
    match count {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

fn write_header(kind: u8, count: u32, out: &mut Vec<u8>) {
    let width = count_width(count);
    out.push(kind | (width as u8 - 1));
    out.extend_from_slice(&count.to_le_bytes()[..width]);
}

fn read_count(bytes: &[u8]) -> usize {
    let mut buf = [0u8; 4];
    buf[..bytes.len()].copy_from_slice(bytes);
    u32::from_le_bytes(buf) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_documented_example() {
        let data: [u32; 9] = [5, 5, 5, 5, 5, 5, 7, 7, 9];
        let encoded = encode(&data);
        let expected: Vec<u8> = vec![
            RUN, 6, 5, 0, 0, 0, // six 5s
            RUN, 2, 7, 0, 0, 0, // two 7s still span 8 bytes
            BLOCK, 1, 9, 0, 0, 0, // lone 9
            END,
        ];
        assert_eq!(encoded, expected);
        assert_eq!(decode::<u32>(&encoded).unwrap(), data.to_vec());
    }

    #[test]
    fn empty_input_is_just_end_marker() {
        assert_eq!(encode::<u16>(&[]), vec![END]);
        assert!(decode::<u16>(&[END]).unwrap().is_empty());
        assert!(decode::<u16>(&[]).unwrap().is_empty());
    }

    #[test]
    fn short_byte_runs_fold_into_blocks() {
        let data: Vec<u8> = vec![1, 2, 2, 2, 2, 3];
        let encoded = encode(&data);
        assert_eq!(encoded, vec![BLOCK, 6, 1, 2, 2, 2, 2, 3, END]);

        let data: Vec<u8> = vec![1, 2, 2, 2, 2, 2, 3];
        let encoded = encode(&data);
        assert_eq!(encoded, vec![BLOCK, 1, 1, RUN, 5, 2, BLOCK, 1, 3, END]);
    }

    #[test]
    fn wide_counts_use_extra_bytes() {
        let data = vec![4u8; 300];
        let encoded = encode(&data);
        assert_eq!(encoded, vec![RUN | 1, 0x2C, 0x01, 4, END]);
        assert_eq!(decode::<u8>(&encoded).unwrap(), data);
    }

    #[test]
    fn unknown_segment_kind_is_an_error() {
        let err = decode::<u8>(&[0b1100, 1, 0]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownSegment {
                header: 0b1100,
                offset: 0
            }
        );
    }

    #[test]
    fn truncated_stream_returns_partial_result() {
        let data: Vec<u32> = vec![1, 1, 1, 2, 3, 4];
        let encoded = encode(&data);
        let partial = decode::<u32>(&encoded[..encoded.len() - 6]).unwrap();
        assert_eq!(partial, vec![1, 1, 1, 2]);
    }

    #[test]
    fn element_cap_rejects_bombs() {
        let codec = RleCodec::<u8>::raw().with_max_elements(10);
        let bomb = [RUN | 3, 0xFF, 0xFF, 0xFF, 0x7F, 1, END];
        assert!(matches!(codec.decode(&bomb), Err(DecodeError::TooLarge(_))));
    }

    #[test]
    fn custom_codec_handles_variable_length_elements() {
        let codec = RleCodec::<String>::custom(
            8,
            |value, out| {
                out.push(value.len() as u8);
                out.extend_from_slice(value.as_bytes());
            },
            |bytes| {
                let (&len, rest) = bytes.split_first().ok_or(ElementError::Incomplete)?;
                let body = rest.get(..len as usize).ok_or(ElementError::Incomplete)?;
                let text = std::str::from_utf8(body).map_err(|_| ElementError::Invalid)?;
                Ok((text.to_string(), len as usize + 1))
            },
        );
        let data: Vec<String> = ["a", "a", "b", "cc", "cc", "cc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let encoded = codec.encode(&data);
        assert_eq!(codec.decode(&encoded).unwrap(), data);

        let invalid = [BLOCK, 1, 2, 0xFF, 0xFE, END];
        assert_eq!(codec.decode(&invalid), Err(DecodeError::Rejected(2)));
    }

    #[test]
    fn custom_comparator_controls_runs() {
        let codec = RleCodec::<u16>::raw().with_comparator(|a, b| a / 10 == b / 10);
        let encoded = codec.encode(&[10, 11, 12, 13]);
        assert_eq!(codec.decode(&encoded).unwrap(), vec![10, 10, 10, 10]);
    }
}
