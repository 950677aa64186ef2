use crate::cli::context::CliContext;
use crate::cli::errors::CliError;
use crate::cli::types::{
	CliRaw, CliType, CliTypeDef, CliTypeInstance, CliTypeMemberDef, CliTypeParam, CliValue,
	TypeExpr, TypeResolutionContext,
};

pub const INTERNAL_NAMESPACE: &str = "__internal__";

fn key_value_pair_payload<'l>(
	ti: &'l CliTypeInstance<'l>,
	values: &[CliValue<'l>],
) -> Result<CliRaw<'l>, CliError> {
	if values.len() != 2 {
		return Err(CliError::InvalidInstantiation(format!(
			"{ti} expects exactly two member values"
		)));
	}
	let pair = ti.ctx().bump().alloc([values[0], values[1]]);
	Ok(CliRaw::Pair(pair))
}

/// The intrinsic types of the model. All are interned per [`CliContext`]
/// through [`Builtins::new`].
#[derive(Copy, Clone)]
pub struct BuiltinTypes<'l> {
	pub boolean: &'l CliType<'l>,
	pub char_: &'l CliType<'l>,
	pub string: &'l CliType<'l>,
	pub single: &'l CliType<'l>,
	pub double: &'l CliType<'l>,
	pub sbyte: &'l CliType<'l>,
	pub int16: &'l CliType<'l>,
	pub int32: &'l CliType<'l>,
	pub int64: &'l CliType<'l>,
	pub uint16: &'l CliType<'l>,
	pub uint32: &'l CliType<'l>,
	pub uint64: &'l CliType<'l>,
	pub intptr: &'l CliType<'l>,
	pub uintptr: &'l CliType<'l>,
	pub byte: &'l CliType<'l>,
	pub object: &'l CliType<'l>,
	pub date_time: &'l CliType<'l>,
	pub time_span: &'l CliType<'l>,
	pub decimal: &'l CliType<'l>,
	pub array_list: &'l CliType<'l>,
	pub dictionary: &'l CliType<'l>,
	pub list: &'l CliType<'l>,
	pub generic_dictionary: &'l CliType<'l>,
	pub key_value_pair: &'l CliType<'l>,
	pub array: &'l CliType<'l>,
}

/// Builtin type instances bound to one resolution context, plus the
/// declaring types themselves.
#[derive(Copy, Clone)]
pub struct Builtins<'l> {
	cli: &'l CliContext<'l>,
	ctx: &'l TypeResolutionContext<'l>,
	pub types: BuiltinTypes<'l>,
	pub boolean: &'l CliTypeInstance<'l>,
	pub char_: &'l CliTypeInstance<'l>,
	pub string: &'l CliTypeInstance<'l>,
	pub single: &'l CliTypeInstance<'l>,
	pub double: &'l CliTypeInstance<'l>,
	pub sbyte: &'l CliTypeInstance<'l>,
	pub int16: &'l CliTypeInstance<'l>,
	pub int32: &'l CliTypeInstance<'l>,
	pub int64: &'l CliTypeInstance<'l>,
	pub uint16: &'l CliTypeInstance<'l>,
	pub uint32: &'l CliTypeInstance<'l>,
	pub uint64: &'l CliTypeInstance<'l>,
	pub intptr: &'l CliTypeInstance<'l>,
	pub uintptr: &'l CliTypeInstance<'l>,
	pub byte: &'l CliTypeInstance<'l>,
	pub object: &'l CliTypeInstance<'l>,
	pub date_time: &'l CliTypeInstance<'l>,
	pub time_span: &'l CliTypeInstance<'l>,
	pub decimal: &'l CliTypeInstance<'l>,
	pub array_list: &'l CliTypeInstance<'l>,
	pub dictionary: &'l CliTypeInstance<'l>,
	pub byte_array: &'l CliTypeInstance<'l>,
}

impl<'l> Builtins<'l> {
	pub fn new(cli: &'l CliContext<'l>) -> Result<Builtins<'l>, CliError> {
		let system = cli.namespace("System");
		let collections = cli.namespace("System.Collections");
		let generic = cli.namespace("System.Collections.Generic");
		let internal = cli.namespace(INTERNAL_NAMESPACE);

		let t = CliTypeParam::new(cli, "T");
		let t_key = CliTypeParam::new(cli, "TKey");
		let t_value = CliTypeParam::new(cli, "TValue");

		let types = BuiltinTypes {
			boolean: CliType::intrinsic(cli, "Boolean", system),
			char_: CliType::intrinsic(cli, "Char", system),
			string: CliType::intrinsic(cli, "String", system),
			single: CliType::intrinsic(cli, "Single", system),
			double: CliType::intrinsic(cli, "Double", system),
			sbyte: CliType::intrinsic(cli, "SByte", system),
			int16: CliType::intrinsic(cli, "Int16", system),
			int32: CliType::intrinsic(cli, "Int32", system),
			int64: CliType::intrinsic(cli, "Int64", system),
			uint16: CliType::intrinsic(cli, "UInt16", system),
			uint32: CliType::intrinsic(cli, "UInt32", system),
			uint64: CliType::intrinsic(cli, "UInt64", system),
			intptr: CliType::intrinsic(cli, "IntPtr", system),
			uintptr: CliType::intrinsic(cli, "UIntPtr", system),
			byte: CliType::intrinsic(cli, "Byte", system),
			object: CliType::intrinsic(cli, "Object", system),
			date_time: CliType::intrinsic(cli, "DateTime", system),
			time_span: CliType::intrinsic(cli, "TimeSpan", system),
			decimal: CliType::intrinsic(cli, "Decimal", system),
			array_list: CliType::intrinsic(cli, "ArrayList", collections),
			dictionary: CliType::intrinsic(cli, "Dictionary", collections),
			list: CliType::define(cli, "List", generic, CliTypeDef {
				intrinsic: true,
				parameters: vec![t],
				..CliTypeDef::default()
			})?,
			generic_dictionary: CliType::define(cli, "Dictionary", generic, CliTypeDef {
				intrinsic: true,
				parameters: vec![t_key, t_value],
				..CliTypeDef::default()
			})?,
			key_value_pair: CliType::define(cli, "KeyValuePair", generic, CliTypeDef {
				intrinsic: true,
				parameters: vec![t_key, t_value],
				members: vec![
					CliTypeMemberDef { name: cli.intern_str("Key"), ty: TypeExpr::Param(t_key) },
					CliTypeMemberDef { name: cli.intern_str("Value"), ty: TypeExpr::Param(t_value) },
				],
				member_handler: Some(key_value_pair_payload),
				..CliTypeDef::default()
			})?,
			array: CliType::define(cli, "Array", internal, CliTypeDef {
				intrinsic: true,
				parameters: vec![t],
				..CliTypeDef::default()
			})?,
		};

		let ctx = cli.resolution_context();
		let byte = ctx.instance(types.byte, Some(cli.intern_str("byte")));
		let builtins = Builtins {
			cli,
			ctx,
			types,
			boolean: ctx.instance(types.boolean, Some(cli.intern_str("bool"))),
			char_: ctx.instance(types.char_, Some(cli.intern_str("char"))),
			string: ctx.instance(types.string, Some(cli.intern_str("string"))),
			single: ctx.instance(types.single, Some(cli.intern_str("float"))),
			double: ctx.instance(types.double, Some(cli.intern_str("double"))),
			sbyte: ctx.instance(types.sbyte, Some(cli.intern_str("int8"))),
			int16: ctx.instance(types.int16, Some(cli.intern_str("int16"))),
			int32: ctx.instance(types.int32, Some(cli.intern_str("int32"))),
			int64: ctx.instance(types.int64, Some(cli.intern_str("int64"))),
			uint16: ctx.instance(types.uint16, Some(cli.intern_str("uint16"))),
			uint32: ctx.instance(types.uint32, Some(cli.intern_str("uint32"))),
			uint64: ctx.instance(types.uint64, Some(cli.intern_str("uint64"))),
			intptr: ctx.instance(types.intptr, Some(cli.intern_str("IntPtr"))),
			uintptr: ctx.instance(types.uintptr, Some(cli.intern_str("UIntPtr"))),
			byte,
			object: ctx.instance(types.object, Some(cli.intern_str("object"))),
			date_time: ctx.instance(types.date_time, None),
			time_span: ctx.instance(types.time_span, None),
			decimal: ctx.instance(types.decimal, None),
			array_list: ctx.instance(types.array_list, None),
			dictionary: ctx.instance(types.dictionary, None),
			byte_array: types.array.instantiate(cli, &[TypeExpr::Instance(byte)])?,
		};
		Ok(builtins)
	}

	#[inline]
	pub fn cli(&self) -> &'l CliContext<'l> {
		self.cli
	}

	#[inline]
	pub fn ctx(&self) -> &'l TypeResolutionContext<'l> {
		self.ctx
	}

	/// `Array<T>` for the given element type, instantiated in a fresh
	/// resolution scope.
	pub fn array_of(&self, element: &'l CliTypeInstance<'l>) -> Result<&'l CliTypeInstance<'l>, CliError> {
		self.types.array.instantiate(self.cli, &[TypeExpr::Instance(element)])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cli::types::CliType;

	#[test]
	fn namespaces_are_interned() {
		let cli = CliContext::new();
		let _ = Builtins::new(&cli).unwrap();
		assert!(std::ptr::eq(cli.namespace("System.Collections"), cli.namespace("System.Collections")));
		assert!(std::ptr::eq(
			cli.namespace("System.Collections").parent().unwrap(),
			cli.namespace("System"),
		));
	}

	#[test]
	fn generic_dictionary_stringification() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let foo = CliType::new(&cli, "Foo", cli.namespace("Foo.Bar"));
		let foo_instance = foo.instantiate(&cli, &[]).unwrap();

		let ti = builtins
			.types
			.generic_dictionary
			.instantiate(&cli, &[
				TypeExpr::Instance(builtins.string),
				TypeExpr::Instance(foo_instance),
			])
			.unwrap();
		assert_eq!(
			ti.to_string(),
			"System.Collections.Generic.Dictionary<System.String, Foo.Bar.Foo>"
		);
	}

	#[test]
	fn byte_array_is_an_internal_array() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		assert_eq!(builtins.byte_array.to_string(), "__internal__.Array<System.Byte>");
		assert!(builtins.byte_array.derived_from().origin() == builtins.types.array);
	}

	#[test]
	fn key_value_pair_member_handler_builds_pairs() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let ti = builtins
			.types
			.key_value_pair
			.instantiate(&cli, &[
				TypeExpr::Instance(builtins.string),
				TypeExpr::Instance(builtins.int32),
			])
			.unwrap();

		let key = builtins.string.basic_value(CliRaw::String(cli.intern_str("answer")));
		let value = builtins.int32.basic_value(CliRaw::Int32(42));
		let pair = ti.instantiate_with(&[key, value]).unwrap();
		let Some(CliRaw::Pair(members)) = pair.raw() else {
			panic!("expected a pair payload");
		};
		assert_eq!(members[0].raw(), Some(CliRaw::String("answer")));
		assert_eq!(members[1].raw(), Some(CliRaw::Int32(42)));

		assert!(ti.member("Key").unwrap().ty() == builtins.string);
		assert!(ti.member("Value").unwrap().ty() == builtins.int32);
	}
}
