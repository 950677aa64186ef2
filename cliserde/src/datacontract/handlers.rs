use fxhash::FxHashMap;

use crate::cli::{CliRaw, CliTypeInstance, CliValue};
use crate::datacontract::deserialization::Deserializer;
use crate::datacontract::errors::{invalid, DataContractError};
use crate::datacontract::models::{CompositeDescriptor, MemberDescriptor, TypeDescriptor};
use crate::datacontract::xsd::parse_bool;

pub const DC_NAMESPACE_PREFIX: &str = "http://schemas.datacontract.org/2004/07/";
pub const DC_NAMESPACE_ARRAY: &str = "http://schemas.microsoft.com/2003/10/Serialization/Arrays";
pub const XMLSCHEMA_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
pub const XMLSCHEMA_INSTANCE_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub(crate) type XmlnsMap = FxHashMap<String, String>;

/// Attributes of one element, with namespace resolution deferred until the
/// in-scope prefix map is known.
#[derive(Debug, Default)]
pub(crate) struct ElementAttrs {
	/// `xmlns` / `xmlns:p` declarations, keyed by prefix (empty for the
	/// default namespace).
	pub xmlns: Vec<(String, String)>,
	/// Remaining attributes as (prefix, local name, value).
	pub named: Vec<(String, String, String)>,
}

impl ElementAttrs {
	fn find_instance_attr(&self, xmlns: &XmlnsMap, local: &str) -> Option<String> {
		self.named.iter().find_map(|(prefix, name, value)| {
			// Unprefixed attributes are in no namespace.
			if name != local || prefix.is_empty() {
				return None;
			}
			match xmlns.get(prefix.as_str()) {
				Some(uri) if uri == XMLSCHEMA_INSTANCE_NAMESPACE => Some(value.clone()),
				_ => None,
			}
		})
	}
}

/// One element handler. The stack behaves like a chain of SAX content
/// handlers: a member frame dispatches on its descriptor and is swapped
/// for the concrete frame of the value being read.
pub(crate) enum Frame<'l> {
	Sentinel,
	Member {
		descriptor: MemberDescriptor<'l>,
		xmlns: XmlnsMap,
	},
	Composite {
		descriptor: CompositeDescriptor<'l>,
		xmlns: XmlnsMap,
		pending: Option<String>,
		values: FxHashMap<String, CliValue<'l>>,
	},
	Array {
		cli_type: &'l CliTypeInstance<'l>,
		item: MemberDescriptor<'l>,
		xmlns: XmlnsMap,
		items: Vec<CliValue<'l>>,
	},
	Dictionary {
		cli_type: &'l CliTypeInstance<'l>,
		item: MemberDescriptor<'l>,
		xmlns: XmlnsMap,
		items: Vec<[CliValue<'l>; 2]>,
	},
	Singleton {
		item: MemberDescriptor<'l>,
		xmlns: XmlnsMap,
	},
	Basic {
		xsd_type: String,
		xmlns: XmlnsMap,
		content: String,
	},
	Nil {
		cli_type: Option<&'l CliTypeInstance<'l>>,
		xmlns: XmlnsMap,
	},
}

impl Frame<'_> {
	fn xmlns(&self) -> Option<&XmlnsMap> {
		match self {
			Frame::Sentinel => None,
			Frame::Member { xmlns, .. }
			| Frame::Composite { xmlns, .. }
			| Frame::Array { xmlns, .. }
			| Frame::Dictionary { xmlns, .. }
			| Frame::Singleton { xmlns, .. }
			| Frame::Basic { xmlns, .. }
			| Frame::Nil { xmlns, .. } => Some(xmlns),
		}
	}
}

pub(crate) struct FrameStack<'l> {
	frames: Vec<Frame<'l>>,
	result: Option<CliValue<'l>>,
}

impl<'l> FrameStack<'l> {
	pub fn new(root: MemberDescriptor<'l>) -> Self {
		FrameStack {
			frames: vec![
				Frame::Sentinel,
				Frame::Member {
					descriptor: root,
					xmlns: XmlnsMap::default(),
				},
			],
			result: None,
		}
	}

	pub fn into_result(self) -> Option<CliValue<'l>> {
		self.result
	}

	fn top_xmlns(&self) -> XmlnsMap {
		self.frames
			.last()
			.and_then(Frame::xmlns)
			.cloned()
			.unwrap_or_default()
	}

	pub fn start(
		&mut self,
		des: &Deserializer<'l>,
		namespace: Option<&str>,
		local: &str,
		attrs: &ElementAttrs,
	) -> Result<(), DataContractError> {
		let mut xmlns = self.top_xmlns();
		for (prefix, uri) in &attrs.xmlns {
			xmlns.insert(prefix.clone(), uri.clone());
		}

		// A container frame first derives the member handler for this
		// child element.
		let member_frame = match self.frames.last_mut() {
			Some(Frame::Composite { descriptor, pending, .. }) => {
				let Some(member) = descriptor.member_by_tag(local) else {
					return Err(invalid(format!("no member descriptor for element '{local}'")));
				};
				let mut member = member.clone();
				if member.descriptor.cli_type().is_none() {
					let Some(cli_type) = descriptor.cli_type else {
						return Err(invalid("composite descriptor has no CLI type".to_string()));
					};
					let member_type = cli_type
						.member(member.cli_member_name())
						.map_err(DataContractError::Type)?
						.ty();
					member.descriptor = member.descriptor.with_cli_type(member_type);
				}
				*pending = Some(member.cli_member_name().to_string());
				Some(member)
			},
			Some(Frame::Array { item, .. })
			| Some(Frame::Dictionary { item, .. })
			| Some(Frame::Singleton { item, .. }) => Some(item.clone()),
			Some(Frame::Basic { .. }) => {
				return Err(invalid(format!(
					"basic object may not contain nested elements, got '{local}'"
				)))
			},
			Some(Frame::Nil { .. }) => {
				return Err(invalid(format!("a nil object cannot contain elements, got '{local}'")))
			},
			Some(Frame::Member { .. }) => None,
			Some(Frame::Sentinel) | None => {
				return Err(invalid(format!("unexpected element '{local}' outside the root")))
			},
		};
		// The member handler dispatches on attributes and descriptor kind;
		// it is replaced by the concrete handler of the value being read.
		let descriptor = match member_frame {
			Some(descriptor) => descriptor,
			None => {
				let Some(Frame::Member { descriptor, .. }) = self.frames.pop() else {
					return Err(invalid(format!("no active member handler for element '{local}'")));
				};
				descriptor
			},
		};

		if let Some(nil) = attrs.find_instance_attr(&xmlns, "nil") {
			if parse_bool(&nil)? {
				self.frames.push(Frame::Nil {
					cli_type: descriptor.descriptor.cli_type(),
					xmlns,
				});
				return Ok(());
			}
		}

		if let Some(xsi_type) = attrs.find_instance_attr(&xmlns, "type") {
			let (prefix, xsd_type) = match xsi_type.split_once(':') {
				Some((prefix, xsd_type)) => (prefix, xsd_type),
				None => ("", xsi_type.as_str()),
			};
			let Some(uri) = xmlns.get(prefix) else {
				return Err(invalid(format!("undeclared namespace prefix '{prefix}' in type attribute")));
			};
			if uri != XMLSCHEMA_NAMESPACE {
				return Err(invalid(format!(
					"type attribute refers to unexpected namespace {uri}"
				)));
			}
			self.frames.push(Frame::Basic {
				xsd_type: xsd_type.to_string(),
				xmlns,
				content: String::new(),
			});
			return Ok(());
		}

		match descriptor.descriptor {
			TypeDescriptor::Composite(composite) => {
				if let Some(expected) = &descriptor.namespace {
					if namespace != Some(expected.as_str()) {
						return Err(invalid(format!(
							"the object's namespace must be {expected}, got {}",
							namespace.unwrap_or("none")
						)));
					}
				}
				if descriptor.name != "*" && local != descriptor.name {
					return Err(invalid(format!(
						"the object's tag name must be {}, got {local}",
						descriptor.name
					)));
				}
				self.frames.push(Frame::Composite {
					descriptor: composite,
					xmlns,
					pending: None,
					values: FxHashMap::default(),
				});
			},
			TypeDescriptor::Array(array) => self.frames.push(des.array_frame(array, xmlns)?),
			TypeDescriptor::Dictionary(dictionary) => {
				self.frames.push(des.dictionary_frame(dictionary, xmlns)?)
			},
			TypeDescriptor::Singleton(singleton) => {
				self.frames.push(des.singleton_frame(singleton, xmlns)?)
			},
			TypeDescriptor::Basic(basic) => {
				let Some(cli_type) = basic.cli_type else {
					return Err(invalid(format!("basic member '{local}' has no CLI type")));
				};
				self.frames.push(Frame::Basic {
					xsd_type: des.xs_type_from_cli_type(cli_type)?,
					xmlns,
					content: String::new(),
				});
			},
		}
		Ok(())
	}

	pub fn text(&mut self, content: &str) -> Result<(), DataContractError> {
		match self.frames.last_mut() {
			Some(Frame::Basic { content: buffer, .. }) => {
				buffer.push_str(content);
				Ok(())
			},
			Some(Frame::Nil { .. }) => Err(invalid("a nil object cannot have content".to_string())),
			_ => Ok(()),
		}
	}

	pub fn end(&mut self, des: &Deserializer<'l>) -> Result<(), DataContractError> {
		if matches!(self.frames.last(), Some(Frame::Sentinel) | None) {
			return Ok(());
		}
		let frame = self.frames.pop().expect("frame stack is not empty");

		let value = match frame {
			Frame::Sentinel => unreachable!(),
			Frame::Member { .. } | Frame::Singleton { .. } => None,
			Frame::Composite { descriptor, values, .. } => {
				let Some(cli_type) = descriptor.cli_type else {
					return Err(invalid("composite descriptor has no CLI type".to_string()));
				};
				let members = values
					.iter()
					.map(|(name, value)| (name.as_str(), *value))
					.collect::<Vec<_>>();
				Some(cli_type.instantiate_dict(&members).map_err(DataContractError::Type)?)
			},
			Frame::Array { cli_type, items, .. } => {
				let raw = CliRaw::Values(des.bump().alloc_slice_copy(&items));
				Some(cli_type.instantiate(raw).map_err(DataContractError::Type)?)
			},
			Frame::Dictionary { cli_type, items, .. } => {
				let raw = CliRaw::Pairs(des.bump().alloc_slice_copy(&items));
				Some(cli_type.instantiate(raw).map_err(DataContractError::Type)?)
			},
			Frame::Basic { xsd_type, content, .. } => {
				if content.is_empty() {
					Some(des.xsd().cli_type_for(&xsd_type)?.basic_value(CliRaw::Null))
				} else {
					Some(des.xsd().deserialize(&xsd_type, &content)?)
				}
			},
			Frame::Nil { cli_type, .. } => {
				let Some(cli_type) = cli_type else {
					return Err(invalid("nil member has no CLI type".to_string()));
				};
				Some(cli_type.basic_value(CliRaw::Null))
			},
		};

		if let Some(value) = value {
			self.push_value(value)?;
		}
		Ok(())
	}

	/// Routes a finished value to the nearest enclosing collector;
	/// member and singleton frames are transparent.
	fn push_value(&mut self, value: CliValue<'l>) -> Result<(), DataContractError> {
		for frame in self.frames.iter_mut().rev() {
			match frame {
				Frame::Member { .. } | Frame::Singleton { .. } | Frame::Basic { .. } | Frame::Nil { .. } => {
					continue
				},
				Frame::Sentinel => break,
				Frame::Composite { pending, values, .. } => {
					if let Some(name) = pending {
						values.insert(name.clone(), value);
					}
					return Ok(());
				},
				Frame::Array { items, .. } => {
					items.push(value);
					return Ok(());
				},
				Frame::Dictionary { items, .. } => {
					let Some(CliRaw::Pair(pair)) = value.raw() else {
						return Err(invalid("dictionary items must be key/value pairs".to_string()));
					};
					items.push(*pair);
					return Ok(());
				},
			}
		}
		self.result = Some(value);
		Ok(())
	}
}
