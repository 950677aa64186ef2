use crate::cli::CliTypeInstance;

/// Descriptor of a serialized member: the XML tag it answers to, the
/// namespace it is pinned to (if any), and the shape of its value. A name
/// of `"*"` matches any tag; `member_name` maps the tag onto a differently
/// named CLI member.
#[derive(Debug, Clone)]
pub struct MemberDescriptor<'l> {
	pub name: String,
	pub namespace: Option<String>,
	pub descriptor: TypeDescriptor<'l>,
	pub member_name: Option<String>,
}

impl<'l> MemberDescriptor<'l> {
	pub fn new(name: impl Into<String>, namespace: Option<&str>, descriptor: TypeDescriptor<'l>) -> Self {
		MemberDescriptor {
			name: name.into(),
			namespace: namespace.map(str::to_string),
			descriptor,
			member_name: None,
		}
	}

	pub fn with_member_name(mut self, member_name: impl Into<String>) -> Self {
		self.member_name = Some(member_name.into());
		self
	}

	pub(crate) fn cli_member_name(&self) -> &str {
		self.member_name.as_deref().unwrap_or(&self.name)
	}
}

#[derive(Debug, Clone)]
pub enum TypeDescriptor<'l> {
	Basic(BasicDescriptor<'l>),
	Composite(CompositeDescriptor<'l>),
	Array(ArrayDescriptor<'l>),
	Dictionary(DictionaryDescriptor<'l>),
	Singleton(SingletonDescriptor<'l>),
}

impl<'l> TypeDescriptor<'l> {
	pub fn cli_type(&self) -> Option<&'l CliTypeInstance<'l>> {
		match self {
			TypeDescriptor::Basic(d) => d.cli_type,
			TypeDescriptor::Composite(d) => d.cli_type,
			TypeDescriptor::Array(d) => d.cli_type,
			TypeDescriptor::Dictionary(d) => d.cli_type,
			TypeDescriptor::Singleton(d) => d.cli_type,
		}
	}

	pub(crate) fn with_cli_type(&self, cli_type: &'l CliTypeInstance<'l>) -> TypeDescriptor<'l> {
		let mut descriptor = self.clone();
		match &mut descriptor {
			TypeDescriptor::Basic(d) => d.cli_type = Some(cli_type),
			TypeDescriptor::Composite(d) => d.cli_type = Some(cli_type),
			TypeDescriptor::Array(d) => d.cli_type = Some(cli_type),
			TypeDescriptor::Dictionary(d) => d.cli_type = Some(cli_type),
			TypeDescriptor::Singleton(d) => d.cli_type = Some(cli_type),
		}
		descriptor
	}
}

#[derive(Debug, Clone, Default)]
pub struct BasicDescriptor<'l> {
	pub cli_type: Option<&'l CliTypeInstance<'l>>,
}

#[derive(Debug, Clone, Default)]
pub struct CompositeDescriptor<'l> {
	pub cli_type: Option<&'l CliTypeInstance<'l>>,
	pub members: Vec<MemberDescriptor<'l>>,
}

impl<'l> CompositeDescriptor<'l> {
	pub(crate) fn member_by_tag(&self, tag: &str) -> Option<&MemberDescriptor<'l>> {
		self.members.iter().find(|m| m.name == tag)
	}
}

#[derive(Debug, Clone, Default)]
pub struct ArrayDescriptor<'l> {
	pub cli_type: Option<&'l CliTypeInstance<'l>>,
	pub item_cli_type: Option<&'l CliTypeInstance<'l>>,
	pub item_descriptor: Option<Box<TypeDescriptor<'l>>>,
}

#[derive(Debug, Clone, Default)]
pub struct DictionaryDescriptor<'l> {
	pub cli_type: Option<&'l CliTypeInstance<'l>>,
	pub key_cli_type: Option<&'l CliTypeInstance<'l>>,
	pub value_cli_type: Option<&'l CliTypeInstance<'l>>,
}

#[derive(Debug, Clone, Default)]
pub struct SingletonDescriptor<'l> {
	pub cli_type: Option<&'l CliTypeInstance<'l>>,
}
