use std::io::Read;
use std::sync::Arc;

use nohash_hasher::IntMap;

use crate::nrbf::errors::DecodeError;
use crate::nrbf::readers::{
	read_array, read_exact_counted, read_length_prefixed_string, read_vec, PrimitiveReader, ReadLe,
};
use crate::nrbf::records::{
	AdditionalTypeInfo, ArrayInfo, ArrayRecord, BinaryArrayType, BinaryType, ClassInfo,
	ClassTypeInfo, Instance, MemberInfo, NrbfObject, NrbfValue, PrimitiveType, RecordCode, TypeInfo,
};
use crate::utilities::{localize_system, TimezoneLocalizer};

/// The decoded stream: header fields, the library table and the object
/// table, addressed by object id.
#[derive(Debug, Default)]
pub struct DecodeResult {
	root_id: Option<i32>,
	header_id: Option<i32>,
	major_version: Option<i32>,
	minor_version: Option<i32>,
	libraries: IntMap<i32, String>,
	objects: IntMap<i32, NrbfObject>,
}

impl DecodeResult {
	pub fn root_id(&self) -> Option<i32> {
		self.root_id
	}
	pub fn header_id(&self) -> Option<i32> {
		self.header_id
	}
	pub fn major_version(&self) -> Option<i32> {
		self.major_version
	}
	pub fn minor_version(&self) -> Option<i32> {
		self.minor_version
	}

	pub fn library_id_name_mappings(&self) -> &IntMap<i32, String> {
		&self.libraries
	}

	pub fn library_name(&self, id: i32) -> Option<&str> {
		self.libraries.get(&id).map(String::as_str)
	}

	pub fn objects(&self) -> &IntMap<i32, NrbfObject> {
		&self.objects
	}

	pub fn object(&self, id: i32) -> Option<&NrbfObject> {
		self.objects.get(&id)
	}

	fn set_header(&mut self, root_id: i32, header_id: i32, major: i32, minor: i32) {
		self.root_id = Some(root_id);
		self.header_id = Some(header_id);
		self.major_version = Some(major);
		self.minor_version = Some(minor);
	}

	fn add_library(&mut self, id: i32, name: String) {
		self.libraries.insert(id, name);
	}

	fn library_resolvable(&self, id: i32) -> bool {
		self.libraries.contains_key(&id)
	}

	fn add_object(&mut self, id: i32, object: NrbfObject) {
		self.objects.insert(id, object);
	}

	fn set_instance_values(&mut self, id: i32, values: Vec<NrbfValue>) -> Result<(), DecodeError> {
		match self.objects.get_mut(&id) {
			Some(NrbfObject::Instance(instance)) => {
				instance.values = Some(values);
				Ok(())
			},
			_ => Err(DecodeError::InvalidStream(format!(
				"object {id} is not a registered class instance"
			))),
		}
	}

	fn set_array_values(&mut self, id: i32, values: Vec<NrbfValue>) -> Result<(), DecodeError> {
		match self.objects.get_mut(&id) {
			Some(NrbfObject::Array(array)) => {
				array.values = Some(values);
				Ok(())
			},
			_ => Err(DecodeError::InvalidStream(format!(
				"object {id} is not a registered array"
			))),
		}
	}
}

/// Record-code dispatch loop over an NRBF stream.
pub struct Deserializer {
	primitives: PrimitiveReader,
}

impl Default for Deserializer {
	fn default() -> Self {
		Self::new()
	}
}

impl Deserializer {
	pub fn new() -> Self {
		Self::with_localizer(localize_system)
	}

	pub fn with_localizer(localizer: TimezoneLocalizer) -> Self {
		Deserializer {
			primitives: PrimitiveReader::new(localizer),
		}
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn deserialize<R: Read>(&self, f: &mut R) -> Result<DecodeResult, DecodeError> {
		let mut ctx = DecodeResult::default();
		loop {
			let code_byte = u8::read_le(f)?;
			let Some(code) = RecordCode::from_repr(code_byte) else {
				return Err(DecodeError::UnknownRecord(code_byte));
			};
			match code {
				RecordCode::SerializedStreamHeader => self.read_stream_header(&mut ctx, f)?,
				RecordCode::ClassWithId => {
					self.read_class_with_id(&mut ctx, f)?;
				},
				RecordCode::SystemClassWithMembersAndTypes => {
					self.read_system_class(&mut ctx, f)?;
				},
				RecordCode::ClassWithMembersAndTypes => {
					self.read_class(&mut ctx, f)?;
				},
				RecordCode::BinaryObjectString => {
					self.read_binary_object_string(&mut ctx, f)?;
				},
				RecordCode::BinaryArray => {
					self.read_binary_array(&mut ctx, f)?;
				},
				RecordCode::MessageEnd => break,
				RecordCode::BinaryLibrary => self.read_binary_library(&mut ctx, f)?,
				RecordCode::ArraySinglePrimitive => {
					self.read_array_single_primitive(&mut ctx, f)?;
				},
				RecordCode::SystemClassWithMembers => {
					return Err(DecodeError::NotImplemented("record SystemClassWithMembers"))
				},
				RecordCode::ClassWithMembers => {
					return Err(DecodeError::NotImplemented("record ClassWithMembers"))
				},
				RecordCode::ArraySingleObject => {
					return Err(DecodeError::NotImplemented("record ArraySingleObject"))
				},
				RecordCode::ArraySingleString => {
					return Err(DecodeError::NotImplemented("record ArraySingleString"))
				},
				RecordCode::MethodCall => return Err(DecodeError::NotImplemented("record MethodCall")),
				RecordCode::MethodReturn => {
					return Err(DecodeError::NotImplemented("record MethodReturn"))
				},
				RecordCode::MemberPrimitiveTyped => {
					return Err(DecodeError::NotImplemented("record MemberPrimitiveTyped"))
				},
				// Null and reference records have no meaning at the top level.
				RecordCode::MemberReference
				| RecordCode::ObjectNull
				| RecordCode::ObjectNullMultiple256
				| RecordCode::ObjectNullMultiple => return Err(DecodeError::UnknownRecord(code_byte)),
			}
		}
		Ok(ctx)
	}

	fn read_stream_header(&self, ctx: &mut DecodeResult, f: &mut impl Read) -> Result<(), DecodeError> {
		let b = read_array::<16>(f)?;
		let root_id = i32::from_le_bytes(b[0..4].try_into().unwrap());
		let header_id = i32::from_le_bytes(b[4..8].try_into().unwrap());
		let major = i32::from_le_bytes(b[8..12].try_into().unwrap());
		let minor = i32::from_le_bytes(b[12..16].try_into().unwrap());
		if major != 1 || minor != 0 {
			return Err(DecodeError::VersionMismatch { major, minor });
		}
		ctx.set_header(root_id, header_id, major, minor);
		Ok(())
	}

	fn read_binary_library(&self, ctx: &mut DecodeResult, f: &mut impl Read) -> Result<(), DecodeError> {
		let library_id = i32::read_le(f)?;
		let name = read_length_prefixed_string(f)?;
		ctx.add_library(library_id, name);
		Ok(())
	}

	fn read_class_with_id(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
	) -> Result<NrbfValue, DecodeError> {
		let b = read_array::<8>(f)?;
		let object_id = i32::from_le_bytes(b[0..4].try_into().unwrap());
		let metadata_id = i32::from_le_bytes(b[4..8].try_into().unwrap());

		let class_info = match ctx.object(metadata_id) {
			Some(NrbfObject::Instance(instance)) => instance.class_info.clone(),
			_ => {
				return Err(DecodeError::InvalidStream(format!(
					"object {metadata_id} is not a class instance"
				)))
			},
		};

		let specs = class_info
			.members
			.iter()
			.map(|m| (&m.type_info, 1))
			.collect::<Vec<_>>();
		let values = self.read_element_values(ctx, f, &specs)?;
		ctx.add_object(
			object_id,
			NrbfObject::Instance(Instance {
				class_info: class_info.clone(),
				values: Some(values),
			}),
		);
		Ok(NrbfValue::Reference(object_id))
	}

	fn read_system_class(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
	) -> Result<NrbfValue, DecodeError> {
		let (object_id, name, member_names) = self.read_class_info(f)?;
		let members = self.read_member_type_info(f, member_names)?;
		let class_info = Arc::new(ClassInfo {
			object_id,
			name,
			members,
			library_id: None,
		});
		self.read_instance_values(ctx, f, class_info)
	}

	fn read_class(&self, ctx: &mut DecodeResult, f: &mut impl Read) -> Result<NrbfValue, DecodeError> {
		let (object_id, name, member_names) = self.read_class_info(f)?;
		let members = self.read_member_type_info(f, member_names)?;
		let library_id = i32::read_le(f)?;
		if !ctx.library_resolvable(library_id) {
			return Err(DecodeError::UnresolvableLibraryId(library_id));
		}
		let class_info = Arc::new(ClassInfo {
			object_id,
			name,
			members,
			library_id: Some(library_id),
		});
		self.read_instance_values(ctx, f, class_info)
	}

	/// Registers the instance before reading its member values so that
	/// references back into it resolve mid-read.
	fn read_instance_values(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
		class_info: Arc<ClassInfo>,
	) -> Result<NrbfValue, DecodeError> {
		let object_id = class_info.object_id;
		ctx.add_object(
			object_id,
			NrbfObject::Instance(Instance {
				class_info: class_info.clone(),
				values: None,
			}),
		);
		let specs = class_info
			.members
			.iter()
			.map(|m| (&m.type_info, 1))
			.collect::<Vec<_>>();
		let values = self.read_element_values(ctx, f, &specs)?;
		ctx.set_instance_values(object_id, values)?;
		Ok(NrbfValue::Reference(object_id))
	}

	fn read_binary_object_string(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
	) -> Result<NrbfValue, DecodeError> {
		let object_id = i32::read_le(f)?;
		let value = read_length_prefixed_string(f)?;
		ctx.add_object(object_id, NrbfObject::Value(NrbfValue::String(value)));
		Ok(NrbfValue::Reference(object_id))
	}

	fn read_binary_array(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
	) -> Result<NrbfValue, DecodeError> {
		let b = read_array::<9>(f)?;
		let object_id = i32::from_le_bytes(b[0..4].try_into().unwrap());
		let kind_byte = b[4];
		let rank = i32::from_le_bytes(b[5..9].try_into().unwrap());

		let Some(kind) = BinaryArrayType::from_repr(kind_byte) else {
			return Err(DecodeError::InvalidStream(format!(
				"unknown binary array type: {kind_byte}"
			)));
		};
		if rank <= 0 {
			return Err(DecodeError::InvalidStream(format!(
				"rank must be a positive integer, got {rank}"
			)));
		}
		let rank = rank as usize;

		let has_offsets = matches!(
			kind,
			BinaryArrayType::SingleOffset | BinaryArrayType::JaggedOffset | BinaryArrayType::RectangularOffset
		);
		let (shape, lower_bounds) = if has_offsets {
			let b = read_vec(f, 4 * rank * 2)?;
			let mut values = b
				.chunks_exact(4)
				.map(|c| i32::from_le_bytes(c.try_into().unwrap()));
			let shape = values.by_ref().take(rank).collect::<Vec<_>>();
			let lower_bounds = values.collect::<Vec<_>>();
			(shape, lower_bounds)
		} else {
			let b = read_vec(f, 4 * rank)?;
			let shape = b
				.chunks_exact(4)
				.map(|c| i32::from_le_bytes(c.try_into().unwrap()))
				.collect::<Vec<_>>();
			(shape, vec![0; rank])
		};

		let tag = u8::read_le(f)?;
		let Some(binary_type) = BinaryType::from_repr(tag) else {
			return Err(DecodeError::InvalidStream(format!("unknown binary type: {tag}")));
		};
		let additional = self.read_additional_info(f, binary_type)?;
		let type_info = TypeInfo { binary_type, additional };

		let total = shape.iter().map(|&l| l as i64).product::<i64>();
		if total < 0 {
			return Err(DecodeError::InvalidStream(format!(
				"array shape {shape:?} has a negative extent"
			)));
		}

		ctx.add_object(
			object_id,
			NrbfObject::Array(ArrayRecord {
				array_info: ArrayInfo {
					object_id,
					shape,
					lower_bounds,
					kind,
					type_info: Some(type_info.clone()),
				},
				values: None,
			}),
		);
		let values = self.read_element_values(ctx, f, &[(&type_info, total as usize)])?;
		ctx.set_array_values(object_id, values)?;
		Ok(NrbfValue::Reference(object_id))
	}

	fn read_array_single_primitive(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
	) -> Result<NrbfValue, DecodeError> {
		let b = read_array::<8>(f)?;
		let object_id = i32::from_le_bytes(b[0..4].try_into().unwrap());
		let length = i32::from_le_bytes(b[4..8].try_into().unwrap());
		if length < 0 {
			return Err(DecodeError::InvalidStream(format!(
				"array length must be non-negative, got {length}"
			)));
		}

		let tag = u8::read_le(f)?;
		let Some(primitive_type) = PrimitiveType::from_repr(tag) else {
			return Err(DecodeError::InvalidStream(format!("unknown primitive type: {tag}")));
		};
		let type_info = TypeInfo {
			binary_type: BinaryType::Primitive,
			additional: AdditionalTypeInfo::Primitive(primitive_type),
		};

		ctx.add_object(
			object_id,
			NrbfObject::Array(ArrayRecord {
				array_info: ArrayInfo {
					object_id,
					shape: vec![length],
					lower_bounds: vec![0],
					kind: BinaryArrayType::Single,
					type_info: Some(type_info.clone()),
				},
				values: None,
			}),
		);
		let values = self.read_element_values(ctx, f, &[(&type_info, length as usize)])?;
		ctx.set_array_values(object_id, values)?;
		Ok(NrbfValue::Reference(object_id))
	}

	fn read_class_info(&self, f: &mut impl Read) -> Result<(i32, String, Vec<String>), DecodeError> {
		let object_id = i32::read_le(f)?;
		let name = read_length_prefixed_string(f)?;
		let member_count = i32::read_le(f)?;
		if member_count < 0 {
			return Err(DecodeError::InvalidStream(format!(
				"member count must be non-negative, got {member_count}"
			)));
		}
		let member_names = (0..member_count)
			.map(|_| read_length_prefixed_string(f))
			.collect::<Result<Vec<_>, _>>()?;
		Ok((object_id, name, member_names))
	}

	fn read_member_type_info(
		&self,
		f: &mut impl Read,
		member_names: Vec<String>,
	) -> Result<Vec<MemberInfo>, DecodeError> {
		let mut tags = vec![0u8; member_names.len()];
		read_exact_counted(f, &mut tags)?;

		let mut members = Vec::with_capacity(member_names.len());
		for (name, tag) in member_names.into_iter().zip(tags) {
			let Some(binary_type) = BinaryType::from_repr(tag) else {
				return Err(DecodeError::InvalidStream(format!("unknown binary type: {tag}")));
			};
			let additional = self.read_additional_info(f, binary_type)?;
			members.push(MemberInfo {
				name,
				type_info: TypeInfo { binary_type, additional },
			});
		}
		Ok(members)
	}

	fn read_additional_info(
		&self,
		f: &mut impl Read,
		binary_type: BinaryType,
	) -> Result<AdditionalTypeInfo, DecodeError> {
		match binary_type {
			BinaryType::Primitive | BinaryType::PrimitiveArray => {
				let tag = u8::read_le(f)?;
				match PrimitiveType::from_repr(tag) {
					Some(primitive_type) => Ok(AdditionalTypeInfo::Primitive(primitive_type)),
					None => Err(DecodeError::InvalidStream(format!(
						"unknown primitive type: {tag}"
					))),
				}
			},
			BinaryType::SystemClass => {
				Ok(AdditionalTypeInfo::SystemClass(read_length_prefixed_string(f)?))
			},
			BinaryType::Class => {
				let name = read_length_prefixed_string(f)?;
				let library_id = i32::read_le(f)?;
				Ok(AdditionalTypeInfo::Class(ClassTypeInfo { name, library_id }))
			},
			BinaryType::String | BinaryType::Object | BinaryType::ObjectArray | BinaryType::StringArray => {
				Ok(AdditionalTypeInfo::None)
			},
		}
	}

	/// Yields `sum(cardinalities)` values. Null-run records may satisfy
	/// several slots at once.
	fn read_element_values(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
		specs: &[(&TypeInfo, usize)],
	) -> Result<Vec<NrbfValue>, DecodeError> {
		let mut values = Vec::new();
		for (type_info, count) in specs {
			match type_info.binary_type {
				BinaryType::Primitive => {
					let AdditionalTypeInfo::Primitive(primitive_type) = type_info.additional else {
						return Err(DecodeError::InvalidStream(
							"primitive member without primitive type info".to_string(),
						));
					};
					for _ in 0..*count {
						values.push(self.primitives.read(primitive_type, f)?);
					}
				},
				BinaryType::String | BinaryType::Object | BinaryType::SystemClass | BinaryType::Class => {
					self.read_member_records(ctx, f, *count, &mut values)?;
				},
				BinaryType::ObjectArray => {
					return Err(DecodeError::NotImplemented("element type ObjectArray"))
				},
				BinaryType::StringArray => {
					return Err(DecodeError::NotImplemented("element type StringArray"))
				},
				BinaryType::PrimitiveArray => {
					return Err(DecodeError::NotImplemented("element type PrimitiveArray"))
				},
			}
		}
		Ok(values)
	}

	fn read_member_records(
		&self,
		ctx: &mut DecodeResult,
		f: &mut impl Read,
		count: usize,
		out: &mut Vec<NrbfValue>,
	) -> Result<(), DecodeError> {
		let mut remaining = count as i64;
		while remaining > 0 {
			let before = out.len();
			let code_byte = u8::read_le(f)?;
			let Some(code) = RecordCode::from_repr(code_byte) else {
				return Err(DecodeError::UnknownRecord(code_byte));
			};
			match code {
				RecordCode::ClassWithId => {
					let value = self.read_class_with_id(ctx, f)?;
					out.push(value);
				},
				RecordCode::SystemClassWithMembersAndTypes => {
					let value = self.read_system_class(ctx, f)?;
					out.push(value);
				},
				RecordCode::ClassWithMembersAndTypes => {
					let value = self.read_class(ctx, f)?;
					out.push(value);
				},
				RecordCode::BinaryObjectString => {
					let value = self.read_binary_object_string(ctx, f)?;
					out.push(value);
				},
				RecordCode::BinaryArray => {
					let value = self.read_binary_array(ctx, f)?;
					out.push(value);
				},
				RecordCode::MemberReference => {
					let object_id = i32::read_le(f)?;
					out.push(NrbfValue::Reference(object_id));
				},
				RecordCode::ObjectNull => out.push(NrbfValue::Null),
				RecordCode::ObjectNullMultiple256 => {
					let count = u8::read_le(f)?;
					out.extend(std::iter::repeat(NrbfValue::Null).take(count as usize));
				},
				RecordCode::ObjectNullMultiple => {
					let count = i32::read_le(f)?;
					if count < 0 {
						return Err(DecodeError::InvalidStream(format!(
							"null run length must be non-negative, got {count}"
						)));
					}
					out.extend(std::iter::repeat(NrbfValue::Null).take(count as usize));
				},
				RecordCode::SystemClassWithMembers => {
					return Err(DecodeError::NotImplemented("record SystemClassWithMembers"))
				},
				RecordCode::ClassWithMembers => {
					return Err(DecodeError::NotImplemented("record ClassWithMembers"))
				},
				RecordCode::MemberPrimitiveTyped => {
					return Err(DecodeError::NotImplemented("record MemberPrimitiveTyped"))
				},
				_ => return Err(DecodeError::UnknownRecord(code_byte)),
			}
			remaining -= (out.len() - before) as i64;
		}
		Ok(())
	}
}
