use std::io::Read;

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::cli::CliDateTime;
use crate::nrbf::errors::DecodeError;
use crate::nrbf::records::{NrbfValue, PrimitiveType};
use crate::utilities::TimezoneLocalizer;

pub(crate) fn read_exact_counted(f: &mut impl Read, buf: &mut [u8]) -> Result<(), DecodeError> {
	let mut filled = 0;
	while filled < buf.len() {
		match f.read(&mut buf[filled..]) {
			Ok(0) => {
				return Err(DecodeError::UnexpectedEof {
					expected: buf.len(),
					actual: filled,
				})
			},
			Ok(n) => filled += n,
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(DecodeError::Io(e)),
		}
	}
	Ok(())
}

#[inline]
pub(crate) fn read_array<const N: usize>(f: &mut impl Read) -> Result<[u8; N], DecodeError> {
	let mut bytes = [0u8; N];
	read_exact_counted(f, &mut bytes)?;
	Ok(bytes)
}

pub(crate) fn read_vec(f: &mut impl Read, len: usize) -> Result<Vec<u8>, DecodeError> {
	let mut bytes = vec![0u8; len];
	read_exact_counted(f, &mut bytes)?;
	Ok(bytes)
}

pub(crate) trait ReadLe: Sized {
	fn read_le(f: &mut impl Read) -> Result<Self, DecodeError>;
}

macro_rules! impl_read_le {
    ($($ty: ty),*) => {$(
		impl ReadLe for $ty {
			#[inline]
			fn read_le(f: &mut impl Read) -> Result<Self, DecodeError> {
				Ok(Self::from_le_bytes(read_array(f)?))
			}
		}
	)*};
}

impl_read_le!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Reads a 7-bit-group length prefix (little-endian, at most five groups,
/// 32-bit range) followed by that many bytes of UTF-8.
pub(crate) fn read_length_prefixed_string(f: &mut impl Read) -> Result<String, DecodeError> {
	let mut length = 0u64;
	let mut terminated = false;
	for group in 0..5 {
		let byte = u8::read_le(f)?;
		length |= ((byte & 0x7F) as u64) << (7 * group);
		if byte & 0x80 == 0 {
			terminated = true;
			break;
		}
	}
	if !terminated || length > u32::MAX as u64 {
		return Err(DecodeError::InvalidLengthPrefix);
	}

	let bytes = read_vec(f, length as usize)?;
	String::from_utf8(bytes)
		.map_err(|_| DecodeError::InvalidStream("string payload is not valid UTF-8".to_string()))
}

fn dotnet_epoch() -> NaiveDateTime {
	NaiveDate::from_ymd_opt(1, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

/// 64-bit packed timestamp: top two bits select the kind, the rest are
/// 100ns ticks since 0001-01-01.
pub(crate) fn read_date_time(
	f: &mut impl Read,
	localizer: TimezoneLocalizer,
) -> Result<CliDateTime, DecodeError> {
	let raw = u64::read_le(f)?;
	let kind = (raw >> 62) as u8;
	let ticks = raw & 0x3FFF_FFFF_FFFF_FFFF;
	let naive = dotnet_epoch() + Duration::microseconds((ticks / 10) as i64);
	match kind {
		0 => Ok(CliDateTime::Unspecified(naive)),
		1 => Ok(CliDateTime::Utc(Utc.from_utc_datetime(&naive))),
		2 => Ok(CliDateTime::Local(localizer(naive))),
		_ => Err(DecodeError::InvalidDateTimeKind(kind)),
	}
}

pub(crate) fn read_time_span(f: &mut impl Read) -> Result<Duration, DecodeError> {
	let ticks = i64::read_le(f)?;
	Ok(Duration::microseconds(ticks / 10))
}

macro_rules! impl_scalar_readers {
    ($($name: ident: $ty: ty => $variant: ident),* $(,)?) => { paste::paste! {
		impl PrimitiveReader {$(
			#[inline]
			fn [<read_ $name>](f: &mut impl Read) -> Result<NrbfValue, DecodeError> {
				Ok(NrbfValue::$variant(<$ty>::read_le(f)?))
			}
		)*}
	}};
}

/// Reads untyped primitive values, i.e. values whose type is dictated by
/// the surrounding member or array type information.
#[derive(Copy, Clone)]
pub(crate) struct PrimitiveReader {
	localizer: TimezoneLocalizer,
}

impl_scalar_readers!(
	byte: u8 => Byte,
	sbyte: i8 => SByte,
	char: u16 => Char,
	int16: i16 => Int16,
	int32: i32 => Int32,
	int64: i64 => Int64,
	uint16: u16 => UInt16,
	uint32: u32 => UInt32,
	uint64: u64 => UInt64,
	single: f32 => Single,
	double: f64 => Double,
);

impl PrimitiveReader {
	pub fn new(localizer: TimezoneLocalizer) -> Self {
		PrimitiveReader { localizer }
	}

	pub fn read(&self, primitive_type: PrimitiveType, f: &mut impl Read) -> Result<NrbfValue, DecodeError> {
		match primitive_type {
			PrimitiveType::Boolean => Ok(NrbfValue::Boolean(u8::read_le(f)? != 0)),
			PrimitiveType::Byte => Self::read_byte(f),
			PrimitiveType::Char => Self::read_char(f),
			PrimitiveType::Decimal => Err(DecodeError::NotImplemented("primitive type Decimal")),
			PrimitiveType::Double => Self::read_double(f),
			PrimitiveType::Int16 => Self::read_int16(f),
			PrimitiveType::Int32 => Self::read_int32(f),
			PrimitiveType::Int64 => Self::read_int64(f),
			PrimitiveType::SByte => Self::read_sbyte(f),
			PrimitiveType::Single => Self::read_single(f),
			PrimitiveType::TimeSpan => Ok(NrbfValue::Duration(read_time_span(f)?)),
			PrimitiveType::DateTime => Ok(NrbfValue::DateTime(read_date_time(f, self.localizer)?)),
			PrimitiveType::UInt16 => Self::read_uint16(f),
			PrimitiveType::UInt32 => Self::read_uint32(f),
			PrimitiveType::UInt64 => Self::read_uint64(f),
			PrimitiveType::Null => Err(DecodeError::NotImplemented("primitive type Null")),
			PrimitiveType::String => Ok(NrbfValue::String(read_length_prefixed_string(f)?)),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use chrono::{FixedOffset, NaiveDate, TimeZone};

	use super::*;
	use crate::utilities::localize_system;

	fn encode_prefix(mut value: u32) -> Vec<u8> {
		let mut bytes = Vec::new();
		loop {
			let group = (value & 0x7F) as u8;
			value >>= 7;
			if value == 0 {
				bytes.push(group);
				return bytes;
			}
			bytes.push(group | 0x80);
		}
	}

	fn decode_string(bytes: &[u8]) -> Result<String, DecodeError> {
		read_length_prefixed_string(&mut Cursor::new(bytes))
	}

	#[test]
	fn length_prefix_roundtrip() {
		for length in [0usize, 1, 127, 128, 300, 16383, 16384, 65001] {
			let mut bytes = encode_prefix(length as u32);
			bytes.extend(std::iter::repeat(b'a').take(length));
			assert_eq!(decode_string(&bytes).unwrap().len(), length);
		}
	}

	#[test]
	fn length_prefix_group_boundaries() {
		// Interior group bits must carry into the decoded length.
		let mut bytes = vec![0x81, 0x82, 0x01];
		let length = 1 | (2 << 7) | (1 << 14);
		bytes.extend(std::iter::repeat(b'x').take(length));
		assert_eq!(decode_string(&bytes).unwrap().len(), length);

		// A full five-group encoding is still accepted.
		assert_eq!(decode_string(&[0x80, 0x80, 0x80, 0x80, 0x00]).unwrap(), "");
	}

	#[test]
	fn length_prefix_rejects_a_sixth_group() {
		assert!(matches!(
			decode_string(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
			Err(DecodeError::InvalidLengthPrefix)
		));
	}

	#[test]
	fn short_reads_carry_both_lengths() {
		let mut f = Cursor::new([0u8, 1, 2].as_slice());
		assert!(matches!(
			i64::read_le(&mut f),
			Err(DecodeError::UnexpectedEof { expected: 8, actual: 3 })
		));
	}

	const TICKS_2022_08_15: u64 = 0x08DA_7F15_27B7_6EFE;

	fn date_time_from(raw: u64, localizer: TimezoneLocalizer) -> Result<CliDateTime, DecodeError> {
		read_date_time(&mut Cursor::new(raw.to_le_bytes()), localizer)
	}

	#[test]
	fn date_time_kinds() {
		let expected_naive = NaiveDate::from_ymd_opt(2022, 8, 15)
			.unwrap()
			.and_hms_micro_opt(23, 23, 26, 372019)
			.unwrap();

		match date_time_from(TICKS_2022_08_15, localize_system).unwrap() {
			CliDateTime::Unspecified(naive) => assert_eq!(naive, expected_naive),
			other => panic!("expected an unspecified timestamp, got {other:?}"),
		}

		match date_time_from(TICKS_2022_08_15 | (1 << 62), localize_system).unwrap() {
			CliDateTime::Utc(utc) => assert_eq!(utc.naive_utc(), expected_naive),
			other => panic!("expected a UTC timestamp, got {other:?}"),
		}

		fn plus_nine(dt: chrono::NaiveDateTime) -> chrono::DateTime<FixedOffset> {
			FixedOffset::east_opt(9 * 3600).unwrap().from_local_datetime(&dt).unwrap()
		}
		match date_time_from(TICKS_2022_08_15 | (2 << 62), plus_nine).unwrap() {
			CliDateTime::Local(local) => {
				assert_eq!(local, plus_nine(expected_naive));
				assert_eq!(local.naive_local(), expected_naive);
			},
			other => panic!("expected a localized timestamp, got {other:?}"),
		}

		assert!(matches!(
			date_time_from(TICKS_2022_08_15 | (3 << 62), localize_system),
			Err(DecodeError::InvalidDateTimeKind(3))
		));
	}

	#[test]
	fn time_span_counts_ticks() {
		let mut f = Cursor::new(10_000_000i64.to_le_bytes());
		assert_eq!(read_time_span(&mut f).unwrap(), Duration::seconds(1));

		let mut f = Cursor::new((-10i64).to_le_bytes());
		assert_eq!(read_time_span(&mut f).unwrap(), Duration::microseconds(-1));
	}

	#[test]
	fn primitive_reader_keeps_value_width() {
		let reader = PrimitiveReader::new(localize_system);
		let mut f = Cursor::new(0x1122_3344_5566_7788u64.to_le_bytes());
		assert_eq!(
			reader.read(PrimitiveType::UInt64, &mut f).unwrap(),
			NrbfValue::UInt64(0x1122_3344_5566_7788)
		);

		let mut f = Cursor::new([1u8]);
		assert_eq!(reader.read(PrimitiveType::Boolean, &mut f).unwrap(), NrbfValue::Boolean(true));

		let mut f = Cursor::new([0u8; 16]);
		assert!(matches!(
			reader.read(PrimitiveType::Decimal, &mut f),
			Err(DecodeError::NotImplemented(_))
		));
	}
}
