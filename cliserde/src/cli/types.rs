use std::cell::{Cell, RefCell};
use std::fmt::{Debug, Display, Formatter};

use bumpalo::Bump;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use fxhash::FxHashMap;
use nohash_hasher::IntMap;
use rust_decimal::Decimal;

use crate::cli::context::CliContext;
use crate::cli::errors::CliError;
use crate::utilities::impl_identity;

type PtrMap<V> = IntMap<usize, V>;

#[inline]
fn ptr_key<T>(value: &T) -> usize {
	value as *const T as usize
}

pub struct CliNamespace<'l> {
	name: &'l str,
	parent: Option<&'l CliNamespace<'l>>,
}

impl<'l> CliNamespace<'l> {
	pub(crate) fn alloc(bump: &'l Bump, name: &str, parent: Option<&'l CliNamespace<'l>>) -> &'l CliNamespace<'l> {
		bump.alloc(CliNamespace {
			name: bump.alloc_str(name),
			parent,
		})
	}

	pub fn name(&self) -> &'l str {
		self.name
	}
	pub fn parent(&self) -> Option<&'l CliNamespace<'l>> {
		self.parent
	}
}

impl Display for CliNamespace<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		if let Some(parent) = self.parent {
			if !parent.name.is_empty() || parent.parent.is_some() {
				Display::fmt(parent, f)?;
				f.write_str(".")?;
			}
		}
		f.write_str(self.name)
	}
}

impl Debug for CliNamespace<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "CliNamespace({self})")
	}
}

pub struct CliTypeParam<'l> {
	name: &'l str,
}

impl<'l> CliTypeParam<'l> {
	pub fn new(cli: &CliContext<'l>, name: &str) -> &'l CliTypeParam<'l> {
		let bump = cli.bump();
		bump.alloc(CliTypeParam { name: bump.alloc_str(name) })
	}

	pub fn name(&self) -> &'l str {
		self.name
	}
}

impl Debug for CliTypeParam<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "CliTypeParam({})", self.name)
	}
}

pub struct BoundCliTypeParam<'l> {
	derived_from: &'l CliTypeParam<'l>,
	ordinal: usize,
	bound_to: Cell<Option<&'l CliType<'l>>>,
}

impl<'l> BoundCliTypeParam<'l> {
	pub fn derived_from(&self) -> &'l CliTypeParam<'l> {
		self.derived_from
	}
	pub fn name(&self) -> &'l str {
		self.derived_from.name
	}
	pub fn ordinal(&self) -> usize {
		self.ordinal
	}
	pub fn bound_to(&self) -> Option<&'l CliType<'l>> {
		self.bound_to.get()
	}
}

impl Debug for BoundCliTypeParam<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "BoundCliTypeParam({}#{})", self.name(), self.ordinal)
	}
}

pub struct BoundCliTypeMember<'l> {
	name: &'l str,
	ty: TypeExpr<'l>,
	ordinal: usize,
	bound_to: Cell<Option<&'l CliType<'l>>>,
}

impl<'l> BoundCliTypeMember<'l> {
	pub fn name(&self) -> &'l str {
		self.name
	}
	pub fn ty(&self) -> TypeExpr<'l> {
		self.ty
	}
	pub fn ordinal(&self) -> usize {
		self.ordinal
	}
	pub fn bound_to(&self) -> Option<&'l CliType<'l>> {
		self.bound_to.get()
	}
}

impl Debug for BoundCliTypeMember<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "BoundCliTypeMember({}#{})", self.name, self.ordinal)
	}
}

/// A type expression in member or parameter position. Resolution turns it
/// into an interned [`CliTypeInstance`] against a [`TypeResolutionContext`].
#[derive(Copy, Clone)]
pub enum TypeExpr<'l> {
	Param(&'l CliTypeParam<'l>),
	Type(&'l CliType<'l>),
	Instance(&'l CliTypeInstance<'l>),
}

impl<'l> TypeExpr<'l> {
	pub fn resolve(&self, ctx: &'l TypeResolutionContext<'l>) -> Result<&'l CliTypeInstance<'l>, CliError> {
		match self {
			TypeExpr::Param(param) => {
				let found = ctx.refs.borrow().get(param.name).copied();
				found.ok_or_else(|| CliError::UnboundParameter(param.name.to_string()))
			},
			TypeExpr::Type(ty) => ty.resolve(ctx),
			TypeExpr::Instance(instance) => Ok(instance),
		}
	}

	fn stringify(
		&self,
		refs: &RefCell<FxHashMap<&'l str, &'l CliTypeInstance<'l>>>,
		reprs: &RefCell<PtrMap<String>>,
	) -> String {
		match self {
			TypeExpr::Param(param) => match refs.borrow().get(param.name) {
				Some(instance) => instance.to_string(),
				None => param.name.to_string(),
			},
			TypeExpr::Type(ty) => ty.stringify(refs, reprs),
			TypeExpr::Instance(instance) => instance.to_string(),
		}
	}
}

impl Debug for TypeExpr<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			TypeExpr::Param(p) => write!(f, "TypeExpr::Param({})", p.name),
			TypeExpr::Type(t) => write!(f, "TypeExpr::Type({t})"),
			TypeExpr::Instance(i) => write!(f, "TypeExpr::Instance({i})"),
		}
	}
}

pub type MemberHandler<'l> = fn(&'l CliTypeInstance<'l>, &[CliValue<'l>]) -> Result<CliRaw<'l>, CliError>;

pub struct CliTypeMemberDef<'l> {
	pub name: &'l str,
	pub ty: TypeExpr<'l>,
}

/// Declaration input for [`CliType::define`]. Empty `resolved` / `defaults`
/// vectors stand for all-open slots.
pub struct CliTypeDef<'l> {
	pub intrinsic: bool,
	pub parameters: Vec<&'l CliTypeParam<'l>>,
	pub resolved: Vec<Option<TypeExpr<'l>>>,
	pub defaults: Vec<Option<TypeExpr<'l>>>,
	pub members: Vec<CliTypeMemberDef<'l>>,
	pub derived_from: Option<&'l CliType<'l>>,
	pub member_handler: Option<MemberHandler<'l>>,
}

impl Default for CliTypeDef<'_> {
	fn default() -> Self {
		CliTypeDef {
			intrinsic: false,
			parameters: Vec::new(),
			resolved: Vec::new(),
			defaults: Vec::new(),
			members: Vec::new(),
			derived_from: None,
			member_handler: None,
		}
	}
}

/// A nominal, possibly generic type. Types are immutable once defined;
/// partial application yields a new type sharing the member declarations.
/// Equality and hashing are pointer identity.
pub struct CliType<'l> {
	name: &'l str,
	namespace: &'l CliNamespace<'l>,
	intrinsic: bool,
	parameters: Cell<&'l [&'l BoundCliTypeParam<'l>]>,
	resolved_parameters: Cell<&'l [Option<TypeExpr<'l>>]>,
	default_parameters: Cell<&'l [Option<TypeExpr<'l>>]>,
	members: Cell<&'l [&'l BoundCliTypeMember<'l>]>,
	derived_from: Cell<Option<&'l CliType<'l>>>,
	member_handler: Option<MemberHandler<'l>>,
}

impl<'l> CliType<'l> {
	pub fn new(cli: &CliContext<'l>, name: &str, namespace: &'l CliNamespace<'l>) -> &'l CliType<'l> {
		match Self::define(cli, name, namespace, CliTypeDef::default()) {
			Ok(ty) => ty,
			Err(_) => unreachable!(),
		}
	}

	pub fn intrinsic(cli: &CliContext<'l>, name: &str, namespace: &'l CliNamespace<'l>) -> &'l CliType<'l> {
		let def = CliTypeDef { intrinsic: true, ..CliTypeDef::default() };
		match Self::define(cli, name, namespace, def) {
			Ok(ty) => ty,
			Err(_) => unreachable!(),
		}
	}

	pub fn define(
		cli: &CliContext<'l>,
		name: &str,
		namespace: &'l CliNamespace<'l>,
		def: CliTypeDef<'l>,
	) -> Result<&'l CliType<'l>, CliError> {
		let bump = cli.bump();

		let param_count = def.parameters.len();
		let mut resolved = def.resolved;
		let mut defaults = def.defaults;
		if resolved.is_empty() {
			resolved.resize(param_count, None);
		}
		if defaults.is_empty() {
			defaults.resize(param_count, None);
		}
		if resolved.len() != param_count || defaults.len() > param_count {
			return Err(CliError::TooManyParameters {
				expected: param_count,
				got: resolved.len().max(defaults.len()),
			});
		}
		defaults.resize(param_count, None);

		for (i, param) in def.parameters.iter().enumerate() {
			if resolved[i].is_some() && defaults[i].is_some() {
				return Err(CliError::DefaultShadowsBound(param.name.to_string()));
			}
		}

		let ty: &'l CliType<'l> = bump.alloc(CliType {
			name: bump.alloc_str(name),
			namespace,
			intrinsic: def.intrinsic,
			parameters: Cell::new(&[]),
			resolved_parameters: Cell::new(&[]),
			default_parameters: Cell::new(&[]),
			members: Cell::new(&[]),
			derived_from: Cell::new(def.derived_from),
			member_handler: def.member_handler,
		});

		let mut bound_params = bumpalo::collections::Vec::with_capacity_in(param_count, bump);
		for (ordinal, param) in def.parameters.iter().enumerate() {
			bound_params.push(&*bump.alloc(BoundCliTypeParam {
				derived_from: param,
				ordinal,
				bound_to: Cell::new(Some(ty)),
			}));
		}
		ty.parameters.set(bound_params.into_bump_slice());
		ty.resolved_parameters.set(bump.alloc_slice_copy(&resolved));
		ty.default_parameters.set(bump.alloc_slice_copy(&defaults));

		let mut bound_members = bumpalo::collections::Vec::with_capacity_in(def.members.len(), bump);
		for (ordinal, member) in def.members.into_iter().enumerate() {
			bound_members.push(&*bump.alloc(BoundCliTypeMember {
				name: member.name,
				ty: member.ty,
				ordinal,
				bound_to: Cell::new(Some(ty)),
			}));
		}
		ty.members.set(bound_members.into_bump_slice());

		Ok(ty)
	}

	pub fn name(&self) -> &'l str {
		self.name
	}
	pub fn namespace(&self) -> &'l CliNamespace<'l> {
		self.namespace
	}
	pub fn is_intrinsic(&self) -> bool {
		self.intrinsic
	}
	pub fn parameters(&self) -> &'l [&'l BoundCliTypeParam<'l>] {
		self.parameters.get()
	}
	pub fn resolved_parameters(&self) -> &'l [Option<TypeExpr<'l>>] {
		self.resolved_parameters.get()
	}
	pub fn default_parameters(&self) -> &'l [Option<TypeExpr<'l>>] {
		self.default_parameters.get()
	}
	pub fn members(&self) -> &'l [&'l BoundCliTypeMember<'l>] {
		self.members.get()
	}
	pub fn derived_from(&self) -> Option<&'l CliType<'l>> {
		self.derived_from.get()
	}
	pub fn member_handler(&self) -> Option<MemberHandler<'l>> {
		self.member_handler
	}

	/// The unpartialized ancestor, or the type itself.
	pub fn origin(&'l self) -> &'l CliType<'l> {
		let mut origin = self;
		while let Some(parent) = origin.derived_from.get() {
			origin = parent;
		}
		origin
	}

	pub fn member_by_name(&'l self, name: &str) -> Result<&'l BoundCliTypeMember<'l>, CliError> {
		let found = self.members.get().iter().find(|m| m.name == name);
		found.copied().ok_or_else(|| CliError::NoSuchMember {
			type_name: self.to_string(),
			member: name.to_string(),
		})
	}

	pub fn param_by_name(&self, name: &str) -> Option<&'l CliTypeParam<'l>> {
		let found = self.parameters.get().iter().find(|p| p.name() == name);
		found.map(|p| p.derived_from)
	}

	fn stringify(
		&self,
		refs: &RefCell<FxHashMap<&'l str, &'l CliTypeInstance<'l>>>,
		reprs: &RefCell<PtrMap<String>>,
	) -> String {
		let key = ptr_key(self);
		if let Some(repr) = reprs.borrow().get(&key) {
			return repr.clone();
		}

		// Re-entry through a parameter cycle prints the sentinel.
		reprs.borrow_mut().insert(key, "...".to_string());

		let param_list = if !self.parameters.get().is_empty() {
			let params = self
				.resolved_parameters
				.get()
				.iter()
				.map(|slot| match slot {
					Some(expr) => expr.stringify(refs, reprs),
					None => "?".to_string(),
				})
				.collect::<Vec<_>>()
				.join(", ");
			format!("<{params}>")
		} else {
			String::new()
		};

		let mut namespace = self.namespace.to_string();
		if !namespace.is_empty() {
			namespace.push('.');
		}
		let repr = format!("{namespace}{}{param_list}", self.name);
		reprs.borrow_mut().insert(key, repr.clone());
		repr
	}

	/// Resolves the type into an instance interned in `ctx`. Every open
	/// parameter slot must have been filled by partial application.
	pub fn resolve(&'l self, ctx: &'l TypeResolutionContext<'l>) -> Result<&'l CliTypeInstance<'l>, CliError> {
		let key = ptr_key(self);
		let cached = ctx.resolved.borrow().get(&key).copied();
		if let Some(resolved) = cached {
			return Ok(resolved);
		}

		for (param, slot) in self.parameters.get().iter().zip(self.resolved_parameters.get()) {
			let Some(expr) = slot else {
				return Err(CliError::UnresolvedParameters(self.to_string()));
			};
			let instance = expr.resolve(ctx)?;
			ctx.refs.borrow_mut().insert(param.name(), instance);
		}

		let instance = ctx.instance(self, None);
		ctx.resolved.borrow_mut().insert(key, instance);
		Ok(instance)
	}

	fn replace(
		&'l self,
		cli: &CliContext<'l>,
		resolved: Vec<Option<TypeExpr<'l>>>,
		derived_from: Option<&'l CliType<'l>>,
	) -> &'l CliType<'l> {
		let bump = cli.bump();
		let ty: &'l CliType<'l> = bump.alloc(CliType {
			name: self.name,
			namespace: self.namespace,
			intrinsic: self.intrinsic,
			parameters: Cell::new(&[]),
			resolved_parameters: Cell::new(bump.alloc_slice_copy(&resolved)),
			default_parameters: Cell::new(self.default_parameters.get()),
			members: Cell::new(&[]),
			derived_from: Cell::new(derived_from),
			member_handler: self.member_handler,
		});

		let mut bound_params = bumpalo::collections::Vec::with_capacity_in(self.parameters.get().len(), bump);
		for param in self.parameters.get() {
			bound_params.push(&*bump.alloc(BoundCliTypeParam {
				derived_from: param.derived_from,
				ordinal: param.ordinal,
				bound_to: Cell::new(Some(ty)),
			}));
		}
		ty.parameters.set(bound_params.into_bump_slice());

		let mut bound_members = bumpalo::collections::Vec::with_capacity_in(self.members.get().len(), bump);
		for member in self.members.get() {
			bound_members.push(&*bump.alloc(BoundCliTypeMember {
				name: member.name,
				ty: member.ty,
				ordinal: member.ordinal,
				bound_to: Cell::new(Some(ty)),
			}));
		}
		ty.members.set(bound_members.into_bump_slice());
		ty
	}

	/// A copy of this type with the member list swapped out. Parameters and
	/// already-resolved slots carry over.
	pub fn with_members(
		&'l self,
		cli: &CliContext<'l>,
		members: Vec<CliTypeMemberDef<'l>>,
	) -> &'l CliType<'l> {
		let bump = cli.bump();
		let ty = self.replace(cli, self.resolved_parameters.get().to_vec(), self.derived_from.get());
		let mut bound_members = bumpalo::collections::Vec::with_capacity_in(members.len(), bump);
		for (ordinal, member) in members.into_iter().enumerate() {
			bound_members.push(&*bump.alloc(BoundCliTypeMember {
				name: member.name,
				ty: member.ty,
				ordinal,
				bound_to: Cell::new(Some(ty)),
			}));
		}
		ty.members.set(bound_members.into_bump_slice());
		ty
	}

	/// Left-merges positional arguments into the open parameter slots.
	pub fn partial(&'l self, cli: &CliContext<'l>, args: &[TypeExpr<'l>]) -> Result<&'l CliType<'l>, CliError> {
		let params = self.parameters.get();
		if args.len() > params.len() {
			return Err(CliError::TooManyParameters { expected: params.len(), got: args.len() });
		}

		let mut resolved = self.resolved_parameters.get().to_vec();
		for (i, arg) in args.iter().enumerate() {
			if resolved[i].is_some() {
				return Err(CliError::AlreadyBound {
					type_name: self.to_string(),
					param: params[i].name().to_string(),
				});
			}
			resolved[i] = Some(*arg);
		}
		Ok(self.replace(cli, resolved, Some(self)))
	}

	/// Like [`CliType::partial`], but fills slots by parameter name.
	pub fn partial_named(
		&'l self,
		cli: &CliContext<'l>,
		args: &[(&'l CliTypeParam<'l>, TypeExpr<'l>)],
	) -> Result<&'l CliType<'l>, CliError> {
		let params = self.parameters.get();
		let mut resolved = self.resolved_parameters.get().to_vec();
		for (i, param) in params.iter().enumerate() {
			let Some((_, arg)) = args.iter().find(|(p, _)| p.name() == param.name()) else {
				continue;
			};
			if resolved[i].is_some() {
				return Err(CliError::AlreadyBound {
					type_name: self.to_string(),
					param: param.name().to_string(),
				});
			}
			resolved[i] = Some(*arg);
		}
		Ok(self.replace(cli, resolved, Some(self)))
	}

	pub fn instantiate(
		&'l self,
		cli: &CliContext<'l>,
		args: &[TypeExpr<'l>],
	) -> Result<&'l CliTypeInstance<'l>, CliError> {
		self.partial(cli, args)?.resolve(cli.resolution_context())
	}

	pub fn instantiate_named(
		&'l self,
		cli: &CliContext<'l>,
		args: &[(&'l CliTypeParam<'l>, TypeExpr<'l>)],
	) -> Result<&'l CliTypeInstance<'l>, CliError> {
		self.partial_named(cli, args)?.resolve(cli.resolution_context())
	}
}

impl Display for CliType<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let refs = RefCell::new(FxHashMap::default());
		let reprs = RefCell::new(PtrMap::default());
		f.write_str(&self.stringify(&refs, &reprs))
	}
}

impl Debug for CliType<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "CliType({self})")
	}
}

/// Shared intern and cycle-guard tables for one resolution scope. All type
/// instances of one decode hang off a single context.
pub struct TypeResolutionContext<'l> {
	bump: &'l Bump,
	resolved: RefCell<PtrMap<&'l CliTypeInstance<'l>>>,
	refs: RefCell<FxHashMap<&'l str, &'l CliTypeInstance<'l>>>,
	reprs: RefCell<PtrMap<String>>,
}

impl<'l> TypeResolutionContext<'l> {
	pub(crate) fn new(bump: &'l Bump) -> TypeResolutionContext<'l> {
		TypeResolutionContext {
			bump,
			resolved: RefCell::new(PtrMap::default()),
			refs: RefCell::new(FxHashMap::default()),
			reprs: RefCell::new(PtrMap::default()),
		}
	}

	pub fn bump(&self) -> &'l Bump {
		self.bump
	}

	pub fn binding(&self, param: &CliTypeParam<'l>) -> Option<&'l CliTypeInstance<'l>> {
		self.refs.borrow().get(param.name()).copied()
	}

	pub(crate) fn instance(
		&'l self,
		derived_from: &'l CliType<'l>,
		builtin_name: Option<&'l str>,
	) -> &'l CliTypeInstance<'l> {
		self.bump.alloc(CliTypeInstance {
			ctx: self,
			derived_from,
			builtin_name,
			member_handler: derived_from.member_handler,
		})
	}
}

impl Debug for TypeResolutionContext<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TypeResolutionContext")
			.field("resolved", &self.resolved.borrow().len())
			.field("refs", &self.refs.borrow().len())
			.finish()
	}
}

/// A member of a resolved type instance, with its own type resolved against
/// the instance's context.
#[derive(Copy, Clone)]
pub struct CliInstanceMember<'l> {
	derived_from: &'l BoundCliTypeMember<'l>,
	ty: &'l CliTypeInstance<'l>,
}

impl<'l> CliInstanceMember<'l> {
	pub fn derived_from(&self) -> &'l BoundCliTypeMember<'l> {
		self.derived_from
	}
	pub fn name(&self) -> &'l str {
		self.derived_from.name()
	}
	pub fn ordinal(&self) -> usize {
		self.derived_from.ordinal()
	}
	pub fn ty(&self) -> &'l CliTypeInstance<'l> {
		self.ty
	}
}

/// A fully resolved type. Carries the resolution context so member types and
/// nested parameters resolve lazily against it.
pub struct CliTypeInstance<'l> {
	ctx: &'l TypeResolutionContext<'l>,
	derived_from: &'l CliType<'l>,
	builtin_name: Option<&'l str>,
	member_handler: Option<MemberHandler<'l>>,
}

impl<'l> CliTypeInstance<'l> {
	pub fn ctx(&self) -> &'l TypeResolutionContext<'l> {
		self.ctx
	}
	pub fn derived_from(&self) -> &'l CliType<'l> {
		self.derived_from
	}
	pub fn builtin_name(&self) -> Option<&'l str> {
		self.builtin_name
	}

	pub fn member_count(&self) -> usize {
		self.derived_from.members().len()
	}

	pub fn member_at(&self, ordinal: usize) -> Result<CliInstanceMember<'l>, CliError> {
		let Some(member) = self.derived_from.members().get(ordinal).copied() else {
			return Err(CliError::NoSuchMember {
				type_name: self.to_string(),
				member: ordinal.to_string(),
			});
		};
		Ok(CliInstanceMember {
			derived_from: member,
			ty: member.ty().resolve(self.ctx)?,
		})
	}

	pub fn member(&self, name: &str) -> Result<CliInstanceMember<'l>, CliError> {
		let member = self.derived_from.member_by_name(name)?;
		self.member_at(member.ordinal())
	}

	/// Constructs a basic or empty-composite value carrying `value` as raw
	/// payload. Composite types with members require
	/// [`CliTypeInstance::instantiate_with`].
	pub fn instantiate(&'l self, value: CliRaw<'l>) -> Result<CliValue<'l>, CliError> {
		if self.derived_from.intrinsic {
			return Ok(self.basic_value(value));
		}
		if !self.derived_from.members().is_empty() || !matches!(value, CliRaw::Null) {
			return Err(CliError::InvalidInstantiation(format!(
				"member values must be specified for {self}"
			)));
		}
		let composite = self.ctx.bump.alloc(CliCompositeObject {
			type_instance: self,
			members: Cell::new(&[]),
		});
		Ok(CliValue::Composite(composite))
	}

	/// Constructs a value from positional member values. Intrinsic types run
	/// their member handler to produce the raw payload.
	pub fn instantiate_with(&'l self, member_values: &[CliValue<'l>]) -> Result<CliValue<'l>, CliError> {
		if self.derived_from.intrinsic {
			if member_values.is_empty() {
				return Ok(self.basic_value(CliRaw::Null));
			}
			let Some(handler) = self.member_handler else {
				return Err(CliError::InvalidInstantiation(format!(
					"{self} is an intrinsic type and no member handler is provided"
				)));
			};
			let raw = handler(self, member_values)?;
			return Ok(self.basic_value(raw));
		}

		let expected = self.derived_from.members().len();
		if member_values.len() != expected {
			return Err(CliError::MemberCountMismatch {
				got: member_values.len(),
				expected,
			});
		}
		let composite = self.ctx.bump.alloc(CliCompositeObject {
			type_instance: self,
			members: Cell::new(self.ctx.bump.alloc_slice_copy(member_values)),
		});
		Ok(CliValue::Composite(composite))
	}

	/// Constructs a value from named member values, ordered by each member's
	/// ordinal.
	pub fn instantiate_dict(&'l self, members: &[(&str, CliValue<'l>)]) -> Result<CliValue<'l>, CliError> {
		let mut ordered = Vec::with_capacity(members.len());
		for (name, value) in members {
			let member = self.derived_from.member_by_name(name)?;
			ordered.push((member.ordinal(), *value));
		}
		ordered.sort_by_key(|(ordinal, _)| *ordinal);
		let values = ordered.into_iter().map(|(_, v)| v).collect::<Vec<_>>();
		self.instantiate_with(&values)
	}

	/// An explicitly typed null.
	pub fn null_value(&'l self) -> CliValue<'l> {
		CliValue::Null(self.ctx.bump.alloc(CliNullValue { type_instance: self }))
	}

	/// An empty composite shell whose members are patched in later, so
	/// self-referential graphs can register the object before its members
	/// are known.
	pub fn composite_placeholder(&'l self) -> Result<&'l CliCompositeObject<'l>, CliError> {
		if self.derived_from.intrinsic {
			return Err(CliError::InvalidInstantiation(format!(
				"{self} is an intrinsic type and cannot be built incrementally"
			)));
		}
		Ok(self.ctx.bump.alloc(CliCompositeObject {
			type_instance: self,
			members: Cell::new(&[]),
		}))
	}

	/// Directly wraps a raw payload as a basic value of this type, without
	/// intrinsic-type checks.
	pub fn basic_value(&'l self, value: CliRaw<'l>) -> CliValue<'l> {
		CliValue::Basic(self.ctx.bump.alloc(CliBasicValue { type_instance: self, value }))
	}

	pub fn resolve(&'l self, _ctx: &'l TypeResolutionContext<'l>) -> Result<&'l CliTypeInstance<'l>, CliError> {
		Ok(self)
	}
}

impl Display for CliTypeInstance<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.derived_from.stringify(&self.ctx.refs, &self.ctx.reprs))
	}
}

impl Debug for CliTypeInstance<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "CliTypeInstance({self})")
	}
}

/// A decoded point-in-time value, tagged with the serialized kind.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CliDateTime {
	Unspecified(NaiveDateTime),
	Utc(DateTime<Utc>),
	Local(DateTime<FixedOffset>),
}

impl CliDateTime {
	/// Normalizes to UTC; unspecified timestamps have no known offset.
	pub fn to_utc(&self) -> Option<DateTime<Utc>> {
		match self {
			CliDateTime::Unspecified(_) => None,
			CliDateTime::Utc(dt) => Some(*dt),
			CliDateTime::Local(dt) => Some(dt.with_timezone(&Utc)),
		}
	}

	pub fn naive(&self) -> NaiveDateTime {
		match self {
			CliDateTime::Unspecified(dt) => *dt,
			CliDateTime::Utc(dt) => dt.naive_utc(),
			CliDateTime::Local(dt) => dt.naive_local(),
		}
	}
}

/// Raw payload of a basic value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CliRaw<'l> {
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
	String(&'l str),
	Bytes(&'l [u8]),
	DateTime(CliDateTime),
	Duration(Duration),
	Decimal(Decimal),
	Values(&'l [CliValue<'l>]),
	Pair(&'l [CliValue<'l>; 2]),
	Pairs(&'l [[CliValue<'l>; 2]]),
}

impl CliRaw<'_> {
	pub fn is_null(&self) -> bool {
		matches!(self, CliRaw::Null)
	}
}

#[derive(Debug)]
pub struct CliBasicValue<'l> {
	type_instance: &'l CliTypeInstance<'l>,
	value: CliRaw<'l>,
}

impl<'l> CliBasicValue<'l> {
	pub fn type_instance(&self) -> &'l CliTypeInstance<'l> {
		self.type_instance
	}
	pub fn value(&self) -> CliRaw<'l> {
		self.value
	}
}

#[derive(Debug)]
pub struct CliNullValue<'l> {
	type_instance: &'l CliTypeInstance<'l>,
}

impl<'l> CliNullValue<'l> {
	pub fn type_instance(&self) -> &'l CliTypeInstance<'l> {
		self.type_instance
	}
}

pub struct CliCompositeObject<'l> {
	type_instance: &'l CliTypeInstance<'l>,
	members: Cell<&'l [CliValue<'l>]>,
}

impl<'l> CliCompositeObject<'l> {
	pub fn type_instance(&self) -> &'l CliTypeInstance<'l> {
		self.type_instance
	}

	pub fn members(&self) -> &'l [CliValue<'l>] {
		self.members.get()
	}

	pub fn member_at(&self, ordinal: usize) -> Result<CliValue<'l>, CliError> {
		self.members.get().get(ordinal).copied().ok_or_else(|| CliError::NoSuchMember {
			type_name: self.type_instance.to_string(),
			member: ordinal.to_string(),
		})
	}

	pub fn member(&self, name: &str) -> Result<CliValue<'l>, CliError> {
		let member = self.type_instance.derived_from.member_by_name(name)?;
		self.member_at(member.ordinal())
	}

	/// Fills a placeholder created by
	/// [`CliTypeInstance::composite_placeholder`].
	pub fn set_members(&self, values: &[CliValue<'l>]) -> Result<(), CliError> {
		let expected = self.type_instance.derived_from.members().len();
		if values.len() != expected {
			return Err(CliError::MemberCountMismatch { got: values.len(), expected });
		}
		self.members.set(self.type_instance.ctx.bump.alloc_slice_copy(values));
		Ok(())
	}
}

impl Debug for CliCompositeObject<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CliCompositeObject")
			.field("type", &format_args!("{}", self.type_instance))
			.field("members", &self.members.get().len())
			.finish()
	}
}

impl_identity!(CliNamespace, CliTypeParam, CliType, CliTypeInstance, CliBasicValue, CliNullValue, CliCompositeObject);

/// A value in the common model: basic, typed null, or composite. Copyable
/// handle; equality is object identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CliValue<'l> {
	Basic(&'l CliBasicValue<'l>),
	Null(&'l CliNullValue<'l>),
	Composite(&'l CliCompositeObject<'l>),
}

impl<'l> CliValue<'l> {
	pub fn type_instance(&self) -> &'l CliTypeInstance<'l> {
		match self {
			CliValue::Basic(v) => v.type_instance,
			CliValue::Null(v) => v.type_instance,
			CliValue::Composite(v) => v.type_instance,
		}
	}

	pub fn as_basic(&self) -> Option<&'l CliBasicValue<'l>> {
		match *self {
			CliValue::Basic(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_composite(&self) -> Option<&'l CliCompositeObject<'l>> {
		match *self {
			CliValue::Composite(v) => Some(v),
			_ => None,
		}
	}

	pub fn raw(&self) -> Option<CliRaw<'l>> {
		self.as_basic().map(|v| v.value)
	}

	pub fn is_null(&self) -> bool {
		match self {
			CliValue::Null(_) => true,
			CliValue::Basic(v) => v.value.is_null(),
			CliValue::Composite(_) => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cli::builtins::Builtins;

	fn generic_type<'l>(cli: &CliContext<'l>, t: &'l CliTypeParam<'l>) -> &'l CliType<'l> {
		CliType::define(
			cli,
			"GenericType",
			cli.root_namespace(),
			CliTypeDef {
				parameters: vec![t],
				members: vec![CliTypeMemberDef {
					name: cli.intern_str("mem0"),
					ty: TypeExpr::Param(t),
				}],
				..CliTypeDef::default()
			},
		)
		.unwrap()
	}

	#[test]
	fn unresolved_parameters_fail_to_resolve() {
		let cli = CliContext::new();
		let t = CliTypeParam::new(&cli, "T");
		let t1 = generic_type(&cli, t);
		assert!(matches!(
			t1.resolve(cli.resolution_context()),
			Err(CliError::UnresolvedParameters(_))
		));
	}

	#[test]
	fn partial_application_binds_by_name() {
		let cli = CliContext::new();
		let t = CliTypeParam::new(&cli, "T");
		let t1 = generic_type(&cli, t);
		let t2 = CliType::new(&cli, "Intrinsic1", cli.root_namespace());

		let pt = t1.partial_named(&cli, &[(t, TypeExpr::Type(t2))]).unwrap();
		assert_eq!(pt.name(), "GenericType");
		assert!(matches!(
			pt.resolved_parameters()[0],
			Some(TypeExpr::Type(bound)) if bound == t2
		));

		let ti = pt.resolve(cli.resolution_context()).unwrap();
		assert_eq!(ti.to_string(), "GenericType<Intrinsic1>");
	}

	#[test]
	fn partial_application_rejects_rebinding() {
		let cli = CliContext::new();
		let t = CliTypeParam::new(&cli, "T");
		let t1 = generic_type(&cli, t);
		let t2 = CliType::new(&cli, "Intrinsic1", cli.root_namespace());
		let t3 = CliType::new(&cli, "Intrinsic2", cli.root_namespace());

		let pt = t1.partial(&cli, &[TypeExpr::Type(t2)]).unwrap();
		assert!(matches!(
			pt.partial(&cli, &[TypeExpr::Type(t3)]),
			Err(CliError::AlreadyBound { .. })
		));
		assert!(matches!(
			t1.partial(&cli, &[TypeExpr::Type(t2), TypeExpr::Type(t3)]),
			Err(CliError::TooManyParameters { expected: 1, got: 2 })
		));
	}

	#[test]
	fn instantiation_from_member_dict_orders_by_ordinal() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let t = CliTypeParam::new(&cli, "T");
		let t1 = generic_type(&cli, t);
		let t2 = CliType::new(&cli, "Intrinsic1", cli.root_namespace());
		let ti = t1.instantiate_named(&cli, &[(t, TypeExpr::Type(t2))]).unwrap();

		let member = builtins.int32.basic_value(CliRaw::Int32(123));
		let value = ti.instantiate_dict(&[("mem0", member)]).unwrap();
		let composite = value.as_composite().unwrap();
		assert_eq!(composite.member("mem0").unwrap().raw(), Some(CliRaw::Int32(123)));
	}

	#[test]
	fn composite_type_with_partially_applied_members() {
		let cli = CliContext::new();
		let t = CliTypeParam::new(&cli, "T");
		let t1 = generic_type(&cli, t);
		let t2 = CliType::new(&cli, "Intrinsic1", cli.root_namespace());
		let t3 = CliType::new(&cli, "Intrinsic2", cli.root_namespace());

		let t4 = CliType::define(
			&cli,
			"CompositeType",
			cli.root_namespace(),
			CliTypeDef {
				members: vec![
					CliTypeMemberDef {
						name: cli.intern_str("mem0"),
						ty: TypeExpr::Type(t1.partial(&cli, &[TypeExpr::Type(t2)]).unwrap()),
					},
					CliTypeMemberDef {
						name: cli.intern_str("mem1"),
						ty: TypeExpr::Type(t1.partial(&cli, &[TypeExpr::Type(t3)]).unwrap()),
					},
				],
				..CliTypeDef::default()
			},
		)
		.unwrap();

		let ti = t4.instantiate(&cli, &[]).unwrap();
		let mem0 = ti.member_at(0).unwrap();
		let mem1 = ti.member_at(1).unwrap();
		assert!(matches!(
			mem0.ty().derived_from().resolved_parameters()[0],
			Some(TypeExpr::Type(bound)) if bound.name() == "Intrinsic1"
		));
		assert!(matches!(
			mem1.ty().derived_from().resolved_parameters()[0],
			Some(TypeExpr::Type(bound)) if bound.name() == "Intrinsic2"
		));
	}

	#[test]
	fn member_count_mismatch_is_fatal() {
		let cli = CliContext::new();
		let t = CliTypeParam::new(&cli, "T");
		let t1 = generic_type(&cli, t);
		let t2 = CliType::new(&cli, "Intrinsic1", cli.root_namespace());
		let ti = t1.instantiate(&cli, &[TypeExpr::Type(t2)]).unwrap();

		assert!(matches!(
			ti.instantiate_with(&[]),
			Err(CliError::MemberCountMismatch { got: 0, expected: 1 })
		));
	}

	#[test]
	fn stringification_guards_against_cycles() {
		let cli = CliContext::new();
		let t = CliTypeParam::new(&cli, "T");
		let a = CliType::define(
			&cli,
			"Recursive",
			cli.root_namespace(),
			CliTypeDef {
				parameters: vec![t],
				resolved: vec![Some(TypeExpr::Param(t))],
				..CliTypeDef::default()
			},
		)
		.unwrap();

		let ctx = cli.resolution_context();
		let instance = ctx.instance(a, None);
		ctx.refs.borrow_mut().insert("T", instance);
		assert_eq!(instance.to_string(), "Recursive<...>");
	}

	#[test]
	fn typed_null_values() {
		let cli = CliContext::new();
		let builtins = Builtins::new(&cli).unwrap();
		let null = builtins.int32.null_value();
		assert!(null.is_null());
		assert!(null.type_instance() == builtins.int32);
	}

	#[test]
	fn default_parameters_shall_not_shadow_bound_ones() {
		let cli = CliContext::new();
		let t = CliTypeParam::new(&cli, "T");
		let t2 = CliType::new(&cli, "Intrinsic1", cli.root_namespace());
		let result = CliType::define(
			&cli,
			"Bad",
			cli.root_namespace(),
			CliTypeDef {
				parameters: vec![t],
				resolved: vec![Some(TypeExpr::Type(t2))],
				defaults: vec![Some(TypeExpr::Type(t2))],
				..CliTypeDef::default()
			},
		);
		assert!(matches!(result, Err(CliError::DefaultShadowsBound(_))));
	}
}
