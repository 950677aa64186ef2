use std::cell::RefCell;

use fxhash::FxHashMap;
use nohash_hasher::IntMap;

use crate::cli::types::{CliRaw, CliType, CliTypeDef, CliTypeInstance, CliTypeMemberDef, CliValue, TypeExpr};
use crate::cli::{Builtins, CliContext, CliTypeParam};
use crate::nrbf::class_name::{
	library_info_from_csv, parse_class_name, split_namespace, ParametrizedClassInfo,
};
use crate::nrbf::errors::BridgeError;
use crate::nrbf::handlers::DecodeResult;
use crate::nrbf::records::{
	AdditionalTypeInfo, ArrayRecord, BinaryArrayType, BinaryType, ClassInfo, ClassTypeInfo,
	Instance, LibraryInfo, MemberInfo, NrbfObject, NrbfValue, PrimitiveType, TypeInfo,
};

type TypeKey = (String, Option<LibraryInfo>, usize);

/// Lowers a decoded record graph into the common value model, creating and
/// interning CLI types for the class metadata it encounters on the way.
pub struct Bridge<'l, 'r> {
	cli: &'l CliContext<'l>,
	result: &'r DecodeResult,
	builtins: Builtins<'l>,
	types: RefCell<FxHashMap<TypeKey, &'l CliType<'l>>>,
	instances: RefCell<FxHashMap<ParametrizedClassInfo, &'l CliTypeInstance<'l>>>,
	array_types: RefCell<FxHashMap<(usize, usize), &'l CliTypeInstance<'l>>>,
	objects: RefCell<IntMap<i32, CliValue<'l>>>,
}

impl<'l, 'r> std::fmt::Debug for Bridge<'l, 'r> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Bridge")
			.field("types", &crate::utilities::DebugMapLen(&self.types))
			.field("instances", &crate::utilities::DebugMapLen(&self.instances))
			.finish()
	}
}

fn plain(name: &str) -> ParametrizedClassInfo {
	ParametrizedClassInfo {
		name: name.to_string(),
		parameters: Vec::new(),
		library: None,
	}
}

impl<'l, 'r> Bridge<'l, 'r> {
	pub fn new(cli: &'l CliContext<'l>, result: &'r DecodeResult) -> Result<Bridge<'l, 'r>, BridgeError> {
		let builtins = Builtins::new(cli)?;

		let mut types = FxHashMap::default();
		types.insert(
			("System.Collections.Generic.List".to_string(), None, 1),
			builtins.types.list,
		);
		types.insert(
			("System.Collections.Generic.Dictionary".to_string(), None, 2),
			builtins.types.generic_dictionary,
		);
		types.insert(
			("System.Collections.Generic.KeyValuePair".to_string(), None, 2),
			builtins.types.key_value_pair,
		);

		let mut instances = FxHashMap::default();
		instances.insert(plain("System.Collections.ArrayList"), builtins.array_list);
		instances.insert(plain("System.Collections.Dictionary"), builtins.dictionary);
		instances.insert(plain("System.Object"), builtins.object);
		instances.insert(plain("System.String"), builtins.string);

		Ok(Bridge {
			cli,
			result,
			builtins,
			types: RefCell::new(types),
			instances: RefCell::new(instances),
			array_types: RefCell::new(FxHashMap::default()),
			objects: RefCell::new(IntMap::default()),
		})
	}

	#[inline]
	pub fn builtins(&self) -> &Builtins<'l> {
		&self.builtins
	}

	/// Converts the stream's root object.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn root(&self) -> Result<CliValue<'l>, BridgeError> {
		let Some(root_id) = self.result.root_id() else {
			return Err(BridgeError::MissingRootId);
		};
		self.get(root_id)
	}

	/// Converts the object registered under `id`, reusing the already
	/// converted value if there is one.
	pub fn get(&self, id: i32) -> Result<CliValue<'l>, BridgeError> {
		let cached = self.objects.borrow().get(&id).copied();
		if let Some(value) = cached {
			return Ok(value);
		}

		let Some(object) = self.result.object(id) else {
			return Err(BridgeError::UnknownObjectId(id));
		};
		match object {
			NrbfObject::Instance(instance) => self.convert_instance(id, instance),
			NrbfObject::Array(array) => self.convert_array(id, array),
			NrbfObject::Value(value) => {
				let converted = self.convert_wire_value(value)?;
				self.objects.borrow_mut().insert(id, converted);
				Ok(converted)
			},
		}
	}

	fn convert_instance(&self, id: i32, instance: &Instance) -> Result<CliValue<'l>, BridgeError> {
		let ti = self.type_instance_for_class_info(&instance.class_info)?;

		if ti.derived_from().is_intrinsic() {
			let Some(values) = &instance.values else {
				return Err(BridgeError::UnsupportedValue(format!("{ti} must have a value")));
			};
			let origin = ti.derived_from().origin();
			let value = if ti == self.builtins.array_list || origin == self.builtins.types.list.origin() {
				self.convert_array_list_value(ti, values)?
			} else if origin == self.builtins.types.generic_dictionary.origin() {
				self.convert_dictionary_value(ti, values)?
			} else if origin == self.builtins.types.key_value_pair.origin() {
				self.convert_key_value_pair_value(ti, values)?
			} else {
				return Err(BridgeError::NotImplemented("intrinsic class instance"));
			};
			self.objects.borrow_mut().insert(id, value);
			return Ok(value);
		}

		match &instance.values {
			None => {
				let value = ti.instantiate(CliRaw::Null).map_err(BridgeError::Type)?;
				self.objects.borrow_mut().insert(id, value);
				Ok(value)
			},
			Some(values) => {
				// Register the shell first so self-references converge on it.
				let composite = ti.composite_placeholder().map_err(BridgeError::Type)?;
				let value = CliValue::Composite(composite);
				self.objects.borrow_mut().insert(id, value);

				let members = ti.derived_from().members();
				let mut slots: Vec<Option<CliValue<'l>>> = vec![None; members.len()];
				for (info, wire_value) in instance.class_info.members.iter().zip(values) {
					let member = ti
						.derived_from()
						.member_by_name(&info.name)
						.map_err(BridgeError::Type)?;
					slots[member.ordinal()] = Some(self.convert_wire_value(wire_value)?);
				}

				let mut ordered = Vec::with_capacity(slots.len());
				for slot in slots {
					match slot {
						Some(v) => ordered.push(v),
						None => {
							return Err(BridgeError::Type(crate::cli::CliError::MemberCountMismatch {
								got: ordered.len(),
								expected: members.len(),
							}))
						},
					}
				}
				composite.set_members(&ordered).map_err(BridgeError::Type)?;
				Ok(value)
			},
		}
	}

	fn convert_array(&self, id: i32, array: &ArrayRecord) -> Result<CliValue<'l>, BridgeError> {
		let info = &array.array_info;
		if info.kind != BinaryArrayType::Single {
			return Err(BridgeError::NotImplemented("non-single array kinds"));
		}
		if info.shape.len() != 1 {
			return Err(BridgeError::NotImplemented("multi-dimensional arrays"));
		}
		let Some(type_info) = &info.type_info else {
			return Err(BridgeError::UnsupportedValue(format!(
				"array {id} carries no element type information"
			)));
		};
		let element_type = self.type_instance_for_type_info(type_info)?;
		let ti = self.array_type(element_type, info.shape.len())?;

		let length = info.shape[0] as usize;
		let mut values = Vec::with_capacity(length);
		match &array.values {
			Some(elements) => {
				if elements.len() != length {
					return Err(BridgeError::UnsupportedValue(format!(
						"array element count does not match the shape: {} vs {length}",
						elements.len()
					)));
				}
				for element in elements {
					values.push(self.convert_wire_value(element)?);
				}
			},
			None => {
				for _ in 0..length {
					values.push(self.convert_wire_value(&NrbfValue::Null)?);
				}
			},
		}

		let raw = CliRaw::Values(self.cli.bump().alloc_slice_copy(&values));
		let value = ti.instantiate(raw).map_err(BridgeError::Type)?;
		self.objects.borrow_mut().insert(id, value);
		Ok(value)
	}

	/// `[_items, _size]`: the backing array truncated to the declared
	/// element count.
	fn convert_array_list_value(
		&self,
		ti: &'l CliTypeInstance<'l>,
		values: &[NrbfValue],
	) -> Result<CliValue<'l>, BridgeError> {
		if values.len() < 2 {
			return Err(BridgeError::UnsupportedValue(format!(
				"{ti} must carry a backing array and an element count"
			)));
		}
		let backing = self.convert_wire_value(&values[0])?;
		let elements = self.array_elements(ti, backing)?;
		let NrbfValue::Int32(size) = values[1] else {
			return Err(BridgeError::UnsupportedValue(format!(
				"the element count of {ti} must be a 32-bit integer"
			)));
		};
		let size = (size.max(0) as usize).min(elements.len());
		Ok(ti
			.instantiate(CliRaw::Values(&elements[..size]))
			.map_err(BridgeError::Type)?)
	}

	/// The canonical four-member layout stores the `KeyValuePair[]` backing
	/// store at member index 3. Null slots are compacted away.
	fn convert_dictionary_value(
		&self,
		ti: &'l CliTypeInstance<'l>,
		values: &[NrbfValue],
	) -> Result<CliValue<'l>, BridgeError> {
		let Some(backing) = values.get(3) else {
			return Err(BridgeError::UnsupportedValue(format!(
				"{ti} must carry its entries at member index 3"
			)));
		};
		let backing = self.convert_wire_value(backing)?;
		let elements = self.array_elements(ti, backing)?;

		let mut pairs = Vec::with_capacity(elements.len());
		for element in elements {
			if element.is_null() {
				continue;
			}
			let Some(CliRaw::Pair(pair)) = element.raw() else {
				return Err(BridgeError::UnsupportedValue(format!(
					"the entries of {ti} must be key/value pairs"
				)));
			};
			pairs.push(*pair);
		}
		let raw = CliRaw::Pairs(self.cli.bump().alloc_slice_copy(&pairs));
		Ok(ti.instantiate(raw).map_err(BridgeError::Type)?)
	}

	fn convert_key_value_pair_value(
		&self,
		ti: &'l CliTypeInstance<'l>,
		values: &[NrbfValue],
	) -> Result<CliValue<'l>, BridgeError> {
		if values.len() != 2 {
			return Err(BridgeError::UnsupportedValue(format!(
				"value for {ti} must be a two element sequence"
			)));
		}
		let key = self.convert_wire_value(&values[0])?;
		let value = self.convert_wire_value(&values[1])?;
		Ok(ti.instantiate_with(&[key, value]).map_err(BridgeError::Type)?)
	}

	fn array_elements(
		&self,
		ti: &CliTypeInstance<'l>,
		value: CliValue<'l>,
	) -> Result<&'l [CliValue<'l>], BridgeError> {
		let backing = value
			.as_basic()
			.filter(|v| v.type_instance().derived_from().origin() == self.builtins.types.array.origin());
		let Some(backing) = backing else {
			return Err(BridgeError::UnsupportedValue(format!(
				"the backing store of {ti} must be an array"
			)));
		};
		match backing.value() {
			CliRaw::Values(values) => Ok(values),
			_ => Err(BridgeError::UnsupportedValue(format!(
				"the backing store of {ti} must hold element values"
			))),
		}
	}

	/// Coerces inline wire values; composite records arrive as references
	/// into the object table.
	fn convert_wire_value(&self, value: &NrbfValue) -> Result<CliValue<'l>, BridgeError> {
		let b = &self.builtins;
		let converted = match value {
			NrbfValue::Reference(id) => return self.get(*id),
			NrbfValue::Null => b.object.instantiate(CliRaw::Null),
			NrbfValue::Boolean(v) => b.boolean.instantiate(CliRaw::Boolean(*v)),
			NrbfValue::Byte(v) => b.byte.instantiate(CliRaw::Byte(*v)),
			NrbfValue::SByte(v) => b.sbyte.instantiate(CliRaw::SByte(*v)),
			NrbfValue::Char(v) => b.char_.instantiate(CliRaw::Char(*v)),
			NrbfValue::Int16(v) => b.int16.instantiate(CliRaw::Int16(*v)),
			NrbfValue::Int32(v) => b.int32.instantiate(CliRaw::Int32(*v)),
			NrbfValue::Int64(v) => b.int64.instantiate(CliRaw::Int64(*v)),
			NrbfValue::UInt16(v) => b.uint16.instantiate(CliRaw::UInt16(*v)),
			NrbfValue::UInt32(v) => b.uint32.instantiate(CliRaw::UInt32(*v)),
			NrbfValue::UInt64(v) => b.uint64.instantiate(CliRaw::UInt64(*v)),
			NrbfValue::Single(v) => b.single.instantiate(CliRaw::Single(*v)),
			NrbfValue::Double(v) => b.double.instantiate(CliRaw::Double(*v)),
			NrbfValue::String(v) => b.string.instantiate(CliRaw::String(self.cli.intern_str(v))),
			NrbfValue::DateTime(v) => b.date_time.instantiate(CliRaw::DateTime(*v)),
			NrbfValue::Duration(v) => b.time_span.instantiate(CliRaw::Duration(*v)),
		};
		converted.map_err(BridgeError::Type)
	}

	fn array_type(
		&self,
		element_type: &'l CliTypeInstance<'l>,
		rank: usize,
	) -> Result<&'l CliTypeInstance<'l>, BridgeError> {
		let key = (element_type as *const CliTypeInstance as usize, rank);
		let cached = self.array_types.borrow().get(&key).copied();
		if let Some(ti) = cached {
			return Ok(ti);
		}
		let ti = self.builtins.array_of(element_type).map_err(BridgeError::Type)?;
		self.array_types.borrow_mut().insert(key, ti);
		Ok(ti)
	}

	fn type_instance_for_type_info(&self, info: &TypeInfo) -> Result<&'l CliTypeInstance<'l>, BridgeError> {
		match info.binary_type {
			BinaryType::Primitive => {
				let AdditionalTypeInfo::Primitive(primitive_type) = info.additional else {
					return Err(BridgeError::UnsupportedValue(
						"primitive member without primitive type info".to_string(),
					));
				};
				Ok(self.primitive_type_instance(primitive_type))
			},
			BinaryType::String => Ok(self.builtins.string),
			BinaryType::Object => Ok(self.builtins.object),
			BinaryType::Class => {
				let AdditionalTypeInfo::Class(class_type_info) = &info.additional else {
					return Err(BridgeError::UnsupportedValue(
						"class member without class type info".to_string(),
					));
				};
				self.type_instance_for_class_type_info(class_type_info)
			},
			BinaryType::SystemClass => {
				let AdditionalTypeInfo::SystemClass(name) = &info.additional else {
					return Err(BridgeError::UnsupportedValue(
						"system class member without a class name".to_string(),
					));
				};
				let p_class_info = parse_class_name(name)?;
				self.type_instance_for_parametrized(&p_class_info, &[])
			},
			BinaryType::ObjectArray | BinaryType::StringArray | BinaryType::PrimitiveArray => {
				Err(BridgeError::NotImplemented("array-typed member info"))
			},
		}
	}

	fn primitive_type_instance(&self, primitive_type: PrimitiveType) -> &'l CliTypeInstance<'l> {
		let b = &self.builtins;
		match primitive_type {
			PrimitiveType::Boolean => b.boolean,
			PrimitiveType::Byte => b.byte,
			PrimitiveType::Char => b.char_,
			PrimitiveType::Decimal => b.decimal,
			PrimitiveType::Double => b.double,
			PrimitiveType::Int16 => b.int16,
			PrimitiveType::Int32 => b.int32,
			PrimitiveType::Int64 => b.int64,
			PrimitiveType::SByte => b.sbyte,
			PrimitiveType::Single => b.single,
			PrimitiveType::TimeSpan => b.time_span,
			PrimitiveType::DateTime => b.date_time,
			PrimitiveType::UInt16 => b.uint16,
			PrimitiveType::UInt32 => b.uint32,
			PrimitiveType::UInt64 => b.uint64,
			PrimitiveType::Null => b.object,
			PrimitiveType::String => b.string,
		}
	}

	fn library_for_id(&self, library_id: i32) -> Result<LibraryInfo, BridgeError> {
		let Some(name) = self.result.library_name(library_id) else {
			return Err(BridgeError::UnresolvableLibraryId(library_id));
		};
		library_info_from_csv(name)
	}

	fn merge_library(
		&self,
		mut p_class_info: ParametrizedClassInfo,
		library_id: Option<i32>,
	) -> Result<ParametrizedClassInfo, BridgeError> {
		if let Some(library_id) = library_id {
			if p_class_info.library.is_some() {
				return Err(BridgeError::InvalidClassName(format!(
					"{} carries both a library id and an inline library",
					p_class_info.name
				)));
			}
			p_class_info.library = Some(self.library_for_id(library_id)?);
		}
		Ok(p_class_info)
	}

	fn type_instance_for_class_info(&self, info: &ClassInfo) -> Result<&'l CliTypeInstance<'l>, BridgeError> {
		let p_class_info = self.merge_library(parse_class_name(&info.name)?, info.library_id)?;
		self.type_instance_for_parametrized(&p_class_info, &info.members)
	}

	fn type_instance_for_class_type_info(
		&self,
		info: &ClassTypeInfo,
	) -> Result<&'l CliTypeInstance<'l>, BridgeError> {
		let p_class_info = self.merge_library(parse_class_name(&info.name)?, Some(info.library_id))?;
		self.type_instance_for_parametrized(&p_class_info, &[])
	}

	fn cli_type_members(&self, members: &[MemberInfo]) -> Result<Vec<CliTypeMemberDef<'l>>, BridgeError> {
		members
			.iter()
			.map(|info| {
				Ok(CliTypeMemberDef {
					name: self.cli.intern_str(&info.name),
					ty: TypeExpr::Instance(self.type_instance_for_type_info(&info.type_info)?),
				})
			})
			.collect()
	}

	fn type_instance_for_parametrized(
		&self,
		p_class_info: &ParametrizedClassInfo,
		members: &[MemberInfo],
	) -> Result<&'l CliTypeInstance<'l>, BridgeError> {
		let cached = self.instances.borrow().get(p_class_info).copied();
		if let Some(ti) = cached {
			return Ok(ti);
		}

		let key: TypeKey = (
			p_class_info.name.clone(),
			p_class_info.library.clone(),
			p_class_info.parameters.len(),
		);
		let cached_type = self.types.borrow().get(&key).copied();
		let ty = match cached_type {
			None => {
				#[cfg(feature = "tracing")]
				tracing::debug!("defining CLI type for {:?}", key.0);
				let (namespace, name) = split_namespace(&p_class_info.name)?;
				let parameters = (0..p_class_info.parameters.len())
					.map(|n| CliTypeParam::new(self.cli, &format!("T{}", n + 1)))
					.collect::<Vec<_>>();
				let ty = CliType::define(
					self.cli,
					name,
					self.cli.namespace(namespace),
					CliTypeDef {
						parameters,
						members: self.cli_type_members(members)?,
						..CliTypeDef::default()
					},
				)
				.map_err(BridgeError::Type)?;
				self.types.borrow_mut().insert(key, ty);
				ty
			},
			Some(ty) => {
				// Class metadata may arrive after the type was first seen in
				// a member position; upgrade the memberless shell.
				if !ty.is_intrinsic() && ty.members().is_empty() && !members.is_empty() {
					let upgraded = ty.with_members(self.cli, self.cli_type_members(members)?);
					self.types.borrow_mut().insert(key, upgraded);
					upgraded
				} else {
					ty
				}
			},
		};

		let open_parameters = ty
			.parameters()
			.iter()
			.zip(ty.resolved_parameters())
			.filter(|(_, slot)| slot.is_none())
			.map(|(param, _)| param.derived_from())
			.collect::<Vec<_>>();
		if open_parameters.len() != p_class_info.parameters.len() {
			return Err(BridgeError::ArityMismatch {
				name: p_class_info.name.clone(),
				expected: open_parameters.len(),
				got: p_class_info.parameters.len(),
			});
		}

		let mut args = Vec::with_capacity(open_parameters.len());
		for (param, parameter_info) in open_parameters.into_iter().zip(&p_class_info.parameters) {
			let instance = self.type_instance_for_parametrized(parameter_info, &[])?;
			args.push((param, TypeExpr::Instance(instance)));
		}
		let ti = ty.instantiate_named(self.cli, &args).map_err(BridgeError::Type)?;
		self.instances.borrow_mut().insert(p_class_info.clone(), ti);
		Ok(ti)
	}
}
