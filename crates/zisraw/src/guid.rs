//! GUIDs in the Microsoft on-disk layout.
//!
//! Only the first three fields are byte-swapped on disk (little-endian); the
//! trailing eight bytes are raw.

use std::fmt;

use deku::prelude::*;
use rand_core::{OsRng, RngCore};

/// A 16-byte GUID, stored as `u32, u16, u16, [u8; 8]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct Guid {
	/// First field (byte-swapped on disk).
	pub data1: u32,
	/// Second field (byte-swapped on disk).
	pub data2: u16,
	/// Third field (byte-swapped on disk).
	pub data3: u16,
	/// Trailing eight raw bytes.
	pub data4: [u8; 8],
}

impl Guid {
	/// The all-zero GUID.
	pub const NIL: Self = Self {
		data1: 0,
		data2: 0,
		data3: 0,
		data4: [0; 8],
	};

	/// Generate a fresh random (version 4) GUID from the OS RNG.
	pub fn generate() -> Self {
		let mut bytes = [0u8; 16];
		OsRng.fill_bytes(&mut bytes);
		// version 4, RFC 4122 variant
		bytes[6] = (bytes[6] & 0x0f) | 0x40;
		bytes[8] = (bytes[8] & 0x3f) | 0x80;

		let mut data4 = [0u8; 8];
		data4.copy_from_slice(&bytes[8..16]);
		Self {
			data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
			data2: u16::from_le_bytes([bytes[4], bytes[5]]),
			data3: u16::from_le_bytes([bytes[6], bytes[7]]),
			data4,
		}
	}

	/// Whether this is the all-zero GUID.
	pub fn is_nil(&self) -> bool {
		*self == Self::NIL
	}
}

impl fmt::Display for Guid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{{{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}}}",
			self.data1,
			self.data2,
			self.data3,
			self.data4[0],
			self.data4[1],
			self.data4[2],
			self.data4[3],
			self.data4[4],
			self.data4[5],
			self.data4[6],
			self.data4[7],
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use deku::{DekuContainerRead, DekuContainerWrite};

	#[test]
	fn wire_layout_swaps_first_three_fields_only() {
		let guid = Guid {
			data1: 0x0102_0304,
			data2: 0x0506,
			data3: 0x0708,
			data4: [9, 10, 11, 12, 13, 14, 15, 16],
		};
		let bytes = guid.to_bytes().expect("serialise");
		assert_eq!(
			bytes,
			vec![4, 3, 2, 1, 6, 5, 8, 7, 9, 10, 11, 12, 13, 14, 15, 16]
		);

		let (_, parsed) = Guid::from_bytes((&bytes, 0)).expect("parse");
		assert_eq!(parsed, guid);
	}

	#[test]
	fn generated_guids_differ() {
		assert_ne!(Guid::generate(), Guid::generate());
		assert!(!Guid::generate().is_nil());
	}
}
