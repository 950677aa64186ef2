use std::sync::Arc;

use chrono::Duration;

use crate::cli::CliDateTime;

// Every wire-level tag enumeration is a one-byte discriminant on the
// stream; decoding an unassigned discriminant must be recoverable so the
// caller can name the offending byte in its error.
macro_rules! wire_enum {
	($(#[$meta: meta])* $name: ident { $($variant: ident = $discriminant: literal),* $(,)? }) => {
		$(#[$meta])*
		#[repr(u8)]
		#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
		pub enum $name {
			$($variant = $discriminant),*
		}

		impl $name {
			pub(crate) fn from_repr(discriminant: u8) -> Option<Self> {
				match discriminant {
					$($discriminant => Some(Self::$variant),)*
					_ => None,
				}
			}
		}
	};
}

wire_enum! {
	RecordCode {
		SerializedStreamHeader = 0,
		ClassWithId = 1,
		SystemClassWithMembers = 2,
		ClassWithMembers = 3,
		SystemClassWithMembersAndTypes = 4,
		ClassWithMembersAndTypes = 5,
		BinaryObjectString = 6,
		BinaryArray = 7,
		MemberPrimitiveTyped = 8,
		MemberReference = 9,
		ObjectNull = 10,
		MessageEnd = 11,
		BinaryLibrary = 12,
		ObjectNullMultiple256 = 13,
		ObjectNullMultiple = 14,
		ArraySinglePrimitive = 15,
		ArraySingleObject = 16,
		ArraySingleString = 17,
		MethodCall = 21,
		MethodReturn = 22,
	}
}

wire_enum! {
	BinaryType {
		Primitive = 0,
		String = 1,
		Object = 2,
		SystemClass = 3,
		Class = 4,
		ObjectArray = 5,
		StringArray = 6,
		PrimitiveArray = 7,
	}
}

wire_enum! {
	PrimitiveType {
		Boolean = 1,
		Byte = 2,
		Char = 3,
		Decimal = 5,
		Double = 6,
		Int16 = 7,
		Int32 = 8,
		Int64 = 9,
		SByte = 10,
		Single = 11,
		TimeSpan = 12,
		DateTime = 13,
		UInt16 = 14,
		UInt32 = 15,
		UInt64 = 16,
		Null = 17,
		String = 18,
	}
}

wire_enum! {
	BinaryArrayType {
		Single = 0,
		Jagged = 1,
		Rectangular = 2,
		SingleOffset = 3,
		JaggedOffset = 4,
		RectangularOffset = 5,
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTypeInfo {
	pub name: String,
	pub library_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalTypeInfo {
	None,
	Primitive(PrimitiveType),
	SystemClass(String),
	Class(ClassTypeInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
	pub binary_type: BinaryType,
	pub additional: AdditionalTypeInfo,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
	pub name: String,
	pub type_info: TypeInfo,
}

#[derive(Debug)]
pub struct ClassInfo {
	pub object_id: i32,
	pub name: String,
	pub members: Vec<MemberInfo>,
	pub library_id: Option<i32>,
}

#[derive(Debug)]
pub struct ArrayInfo {
	pub object_id: i32,
	pub shape: Vec<i32>,
	pub lower_bounds: Vec<i32>,
	pub kind: BinaryArrayType,
	pub type_info: Option<TypeInfo>,
}

/// A class instance in the intermediate graph. `values` stays empty until
/// the owning record has been registered, so references back into the
/// instance resolve while its members are still being read.
#[derive(Debug)]
pub struct Instance {
	pub class_info: Arc<ClassInfo>,
	pub values: Option<Vec<NrbfValue>>,
}

#[derive(Debug)]
pub struct ArrayRecord {
	pub array_info: ArrayInfo,
	pub values: Option<Vec<NrbfValue>>,
}

/// An entry of the object table.
#[derive(Debug)]
pub enum NrbfObject {
	Instance(Instance),
	Array(ArrayRecord),
	Value(NrbfValue),
}

/// A decoded member-position value. Composite records land in the object
/// table and appear here as `Reference`.
#[derive(Debug, Clone, PartialEq)]
pub enum NrbfValue {
	Null,
	Boolean(bool),
	Byte(u8),
	SByte(i8),
	Char(u16),
	Int16(i16),
	Int32(i32),
	Int64(i64),
	UInt16(u16),
	UInt32(u32),
	UInt64(u64),
	Single(f32),
	Double(f64),
	String(String),
	DateTime(CliDateTime),
	Duration(Duration),
	Reference(i32),
}

/// Identity of the assembly a class was declared in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryInfo {
	pub name: String,
	pub version: String,
	pub culture: String,
	pub public_key_token: Option<String>,
}
