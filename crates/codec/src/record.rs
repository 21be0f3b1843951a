//! Fixed binary layout of one bulk instance record.
//!
//! Layout (little-endian, 68 bytes):
//! `base_ref:u32 | position:3xf32 | rotation:4xf32 (x,y,z,w) | scale:3xf32 |
//! extra_offset:f32 | procedural_guid:16 bytes | flags:u32`

use crate::DecodeError;
use glam::{Quat, Vec3};

/// Encoded size of one record.
pub const RECORD_LEN: usize = 4 + 12 + 16 + 12 + 4 + 16 + 4;

/// Wire form of a placed instance. `base_ref == 0` means no base surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceBlob {
    /// Replicated id of the base surface object.
    pub base_ref: u32,
    /// World position.
    pub position: Vec3,
    /// Orientation.
    pub rotation: Quat,
    /// Scale.
    pub scale: Vec3,
    /// Extra vertical offset.
    pub extra_offset: f32,
    /// Procedural volume id.
    pub procedural_guid: u128,
    /// Raw placement flags.
    pub flags: u32,
}

impl InstanceBlob {
    /// Serialize into the fixed layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_LEN);
        out.extend_from_slice(&self.base_ref.to_le_bytes());
        for value in self.position.to_array() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        for value in self.rotation.to_array() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        for value in self.scale.to_array() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&self.extra_offset.to_le_bytes());
        out.extend_from_slice(&self.procedural_guid.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Parse the fixed layout. Trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < RECORD_LEN {
            return Err(DecodeError::Truncated {
                expected: RECORD_LEN,
                actual: bytes.len(),
            });
        }
        let mut reader = Reader { bytes, offset: 0 };
        let base_ref = reader.u32();
        let position = Vec3::new(reader.f32(), reader.f32(), reader.f32());
        let rotation = Quat::from_xyzw(reader.f32(), reader.f32(), reader.f32(), reader.f32());
        let scale = Vec3::new(reader.f32(), reader.f32(), reader.f32());
        let extra_offset = reader.f32();
        let procedural_guid = reader.u128();
        let flags = reader.u32();
        Ok(Self {
            base_ref,
            position,
            rotation,
            scale,
            extra_offset,
            procedural_guid,
            flags,
        })
    }
}

/// Cursor over a buffer already checked to hold a full record.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        buf
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn u128(&mut self) -> u128 {
        u128::from_le_bytes(self.take())
    }
}
