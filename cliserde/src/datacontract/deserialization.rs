use std::io::BufRead;

use bumpalo::Bump;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::cli::{Builtins, CliTypeInstance, CliValue, TypeExpr};
use crate::datacontract::errors::{invalid, DataContractError};
use crate::datacontract::handlers::{ElementAttrs, Frame, FrameStack, XmlnsMap};
use crate::datacontract::models::{
	ArrayDescriptor, BasicDescriptor, CompositeDescriptor, DictionaryDescriptor, MemberDescriptor,
	SingletonDescriptor, TypeDescriptor,
};
use crate::datacontract::xsd::XsdSerializers;

/// Decodes data contract XML against a descriptor tree, assembling values
/// bottom-up through a handler stack.
pub struct Deserializer<'l> {
	builtins: Builtins<'l>,
	xsd: XsdSerializers<'l>,
}

impl<'l> Deserializer<'l> {
	pub fn new(builtins: &Builtins<'l>) -> Self {
		Deserializer {
			builtins: *builtins,
			xsd: XsdSerializers::new(builtins),
		}
	}

	#[inline]
	pub(crate) fn xsd(&self) -> &XsdSerializers<'l> {
		&self.xsd
	}

	#[inline]
	pub(crate) fn bump(&self) -> &'l Bump {
		self.builtins.cli().bump()
	}

	pub fn deserialize_str(
		&self,
		xml: &str,
		root: &MemberDescriptor<'l>,
	) -> Result<CliValue<'l>, DataContractError> {
		self.deserialize(xml.as_bytes(), root)
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn deserialize<R: BufRead>(
		&self,
		input: R,
		root: &MemberDescriptor<'l>,
	) -> Result<CliValue<'l>, DataContractError> {
		let mut reader = NsReader::from_reader(input);
		let mut stack = FrameStack::new(root.clone());
		let mut buf = Vec::new();

		loop {
			let (resolve, event) = reader.read_resolved_event_into(&mut buf)?;
			match event {
				Event::Start(e) => {
					let namespace = element_namespace(resolve)?;
					let (local, attrs) = element_parts(&e)?;
					stack.start(self, namespace.as_deref(), &local, &attrs)?;
				},
				Event::Empty(e) => {
					let namespace = element_namespace(resolve)?;
					let (local, attrs) = element_parts(&e)?;
					stack.start(self, namespace.as_deref(), &local, &attrs)?;
					stack.end(self)?;
				},
				Event::Text(e) => {
					let raw = std::str::from_utf8(&e)
						.map_err(|_| invalid("text content is not valid UTF-8"))?;
					let text = quick_xml::escape::unescape(raw)?;
					stack.text(&text)?;
				},
				Event::CData(e) => {
					let raw = std::str::from_utf8(&e)
						.map_err(|_| invalid("CDATA content is not valid UTF-8"))?;
					stack.text(raw)?;
				},
				Event::End(_) => stack.end(self)?,
				Event::Eof => break,
				_ => {},
			}
			buf.clear();
		}

		stack
			.into_result()
			.ok_or_else(|| invalid("document contained no root object"))
	}

	/// Derives the descriptor a value of `cli_type` deserializes through,
	/// when no explicit descriptor is supplied.
	pub(crate) fn type_descriptor_from_cli_type(
		&self,
		cli_type: &'l CliTypeInstance<'l>,
	) -> Result<TypeDescriptor<'l>, DataContractError> {
		let ty = cli_type.derived_from();
		let namespace = ty.namespace().to_string();
		let name = ty.name();

		if namespace == "System.Collections" && name == "ArrayList" {
			return Ok(TypeDescriptor::Array(ArrayDescriptor {
				cli_type: Some(cli_type),
				item_cli_type: Some(self.builtins.object),
				item_descriptor: None,
			}));
		}
		if namespace == "System.Collections.Generic" && name == "List" {
			return Ok(TypeDescriptor::Array(ArrayDescriptor {
				cli_type: Some(cli_type),
				item_cli_type: Some(self.resolved_parameter(cli_type, 0)?),
				item_descriptor: None,
			}));
		}
		if namespace == "System" {
			if let Some(descriptor) = self.builtin_descriptor(name) {
				return Ok(descriptor);
			}
		}
		Ok(TypeDescriptor::Composite(CompositeDescriptor {
			cli_type: Some(cli_type),
			members: Vec::new(),
		}))
	}

	fn builtin_descriptor(&self, name: &str) -> Option<TypeDescriptor<'l>> {
		let b = &self.builtins;
		let basic = |cli_type| TypeDescriptor::Basic(BasicDescriptor { cli_type: Some(cli_type) });
		let descriptor = match name {
			// Pointer-sized integers serialize through a wrapper element.
			"IntPtr" => TypeDescriptor::Singleton(SingletonDescriptor { cli_type: Some(b.int64) }),
			"UIntPtr" => TypeDescriptor::Singleton(SingletonDescriptor { cli_type: Some(b.uint64) }),
			"Boolean" => basic(b.boolean),
			"SByte" => basic(b.sbyte),
			"Int16" => basic(b.int16),
			"Int32" => basic(b.int32),
			"Int64" => basic(b.int64),
			"Byte" => basic(b.byte),
			"UInt16" => basic(b.uint16),
			"UInt32" => basic(b.uint32),
			"UInt64" => basic(b.uint64),
			"Single" => basic(b.single),
			"Double" => basic(b.double),
			"Decimal" => basic(b.decimal),
			"String" => basic(b.string),
			"DateTime" => basic(b.date_time),
			"TimeSpan" => basic(b.time_span),
			_ => return None,
		};
		Some(descriptor)
	}

	pub(crate) fn xs_type_from_cli_type(
		&self,
		cli_type: &CliTypeInstance<'l>,
	) -> Result<String, DataContractError> {
		let ty = cli_type.derived_from();
		if ty.namespace().to_string() == "System" {
			let xsd_type = match ty.name() {
				"SByte" | "Int16" | "Int32" | "Int64" | "Byte" | "UInt16" | "UInt32" | "UInt64" => "long",
				"String" => "string",
				"DateTime" => "dateTime",
				"Boolean" => "bool",
				"Double" | "Single" => "double",
				"Decimal" => "decimal",
				_ => "",
			};
			if !xsd_type.is_empty() {
				return Ok(xsd_type.to_string());
			}
		}
		Err(DataContractError::NotImplemented(format!(
			"no XSD mapping for {cli_type}"
		)))
	}

	fn resolved_parameter(
		&self,
		cli_type: &'l CliTypeInstance<'l>,
		ordinal: usize,
	) -> Result<&'l CliTypeInstance<'l>, DataContractError> {
		let slot = cli_type.derived_from().resolved_parameters().get(ordinal).copied();
		let Some(Some(expr)) = slot else {
			return Err(invalid(format!("{cli_type} has no resolved parameter {ordinal}")));
		};
		expr.resolve(cli_type.ctx()).map_err(DataContractError::Type)
	}

	pub(crate) fn array_frame(
		&self,
		descriptor: ArrayDescriptor<'l>,
		xmlns: XmlnsMap,
	) -> Result<Frame<'l>, DataContractError> {
		let Some(cli_type) = descriptor.cli_type else {
			return Err(invalid("array descriptor has no CLI type".to_string()));
		};
		let item_cli_type = match descriptor.item_cli_type {
			Some(item) => item,
			None => {
				if cli_type.derived_from().parameters().len() != 1 {
					return Err(invalid(format!("cannot infer the item type of {cli_type}")));
				}
				self.resolved_parameter(cli_type, 0)?
			},
		};
		let item_descriptor = match descriptor.item_descriptor {
			Some(item_descriptor) => {
				if item_descriptor.cli_type().is_none() {
					item_descriptor.with_cli_type(item_cli_type)
				} else {
					*item_descriptor
				}
			},
			None => self.type_descriptor_from_cli_type(item_cli_type)?,
		};
		Ok(Frame::Array {
			cli_type,
			item: MemberDescriptor::new("*", None, item_descriptor),
			xmlns,
			items: Vec::new(),
		})
	}

	pub(crate) fn dictionary_frame(
		&self,
		descriptor: DictionaryDescriptor<'l>,
		xmlns: XmlnsMap,
	) -> Result<Frame<'l>, DataContractError> {
		let Some(cli_type) = descriptor.cli_type else {
			return Err(invalid("dictionary descriptor has no CLI type".to_string()));
		};
		let (key_cli_type, value_cli_type) = match (descriptor.key_cli_type, descriptor.value_cli_type) {
			(Some(key), Some(value)) => (key, value),
			_ => {
				if cli_type.derived_from().parameters().len() != 2 {
					return Err(invalid(format!("cannot infer the entry types of {cli_type}")));
				}
				(self.resolved_parameter(cli_type, 0)?, self.resolved_parameter(cli_type, 1)?)
			},
		};

		// Entries deserialize as anonymous key/value pair composites.
		let pair_type = self.builtins.types.key_value_pair.instantiate(
			self.builtins.cli(),
			&[TypeExpr::Instance(key_cli_type), TypeExpr::Instance(value_cli_type)],
		)?;
		let members = vec![
			MemberDescriptor::new("Key", None, self.type_descriptor_from_cli_type(key_cli_type)?),
			MemberDescriptor::new("Value", None, self.type_descriptor_from_cli_type(value_cli_type)?),
		];
		Ok(Frame::Dictionary {
			cli_type,
			item: MemberDescriptor::new(
				"*",
				None,
				TypeDescriptor::Composite(CompositeDescriptor {
					cli_type: Some(pair_type),
					members,
				}),
			),
			xmlns,
			items: Vec::new(),
		})
	}

	pub(crate) fn singleton_frame(
		&self,
		descriptor: SingletonDescriptor<'l>,
		xmlns: XmlnsMap,
	) -> Result<Frame<'l>, DataContractError> {
		let Some(cli_type) = descriptor.cli_type else {
			return Err(invalid("singleton descriptor has no CLI type".to_string()));
		};
		Ok(Frame::Singleton {
			item: MemberDescriptor::new("*", None, self.type_descriptor_from_cli_type(cli_type)?),
			xmlns,
		})
	}
}

fn element_namespace(resolve: ResolveResult) -> Result<Option<String>, DataContractError> {
	match resolve {
		ResolveResult::Bound(namespace) => {
			let namespace = String::from_utf8(namespace.0.to_vec())
				.map_err(|_| invalid("element namespace is not valid UTF-8"))?;
			Ok(Some(namespace))
		},
		ResolveResult::Unbound => Ok(None),
		ResolveResult::Unknown(prefix) => Err(invalid(format!(
			"unknown namespace prefix '{}'",
			String::from_utf8_lossy(&prefix)
		))),
	}
}

fn element_parts(e: &BytesStart) -> Result<(String, ElementAttrs), DataContractError> {
	let local = String::from_utf8(e.local_name().as_ref().to_vec())
		.map_err(|_| invalid("element name is not valid UTF-8"))?;

	let mut attrs = ElementAttrs::default();
	for attr in e.attributes() {
		let attr = attr?;
		let key = attr.key.as_ref();
		let value = std::str::from_utf8(&attr.value)
			.map_err(|_| invalid("attribute value is not valid UTF-8"))?;
		let value = quick_xml::escape::unescape(value)?.into_owned();

		if key == b"xmlns" {
			attrs.xmlns.push((String::new(), value));
			continue;
		}
		if let Some(prefix) = key.strip_prefix(b"xmlns:") {
			let prefix = String::from_utf8(prefix.to_vec())
				.map_err(|_| invalid("namespace prefix is not valid UTF-8"))?;
			attrs.xmlns.push((prefix, value));
			continue;
		}

		let key = String::from_utf8(key.to_vec())
			.map_err(|_| invalid("attribute name is not valid UTF-8"))?;
		let (prefix, local_name) = match key.split_once(':') {
			Some((prefix, local_name)) => (prefix.to_string(), local_name.to_string()),
			None => (String::new(), key),
		};
		attrs.named.push((prefix, local_name, value));
	}
	Ok((local, attrs))
}
