use std::cell::RefCell;
use std::pin::Pin;

use bumpalo::Bump;
use derivative::Derivative;
use fxhash::FxHashMap;

use crate::cli::types::{CliNamespace, TypeResolutionContext};

/// Owns the arena every type, instance and value of a decode lives in, and
/// interns namespaces so equal dotted names share one identity. Resolution
/// contexts created through it are dropped together with the context.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CliContext<'l> {
	#[derivative(Debug = "ignore")]
	bump: Pin<Box<Bump>>,
	#[derivative(Debug = "ignore")]
	contexts: RefCell<Vec<Box<TypeResolutionContext<'l>>>>,
	#[derivative(Debug(format_with = "crate::utilities::fmt_debug_map_len"))]
	namespaces: RefCell<FxHashMap<String, &'l CliNamespace<'l>>>,
}

impl<'l> CliContext<'l> {
	pub fn new() -> Self {
		CliContext {
			bump: Pin::new(Box::new(Bump::new())),
			contexts: RefCell::new(Vec::new()),
			namespaces: RefCell::new(FxHashMap::default()),
		}
	}

	#[inline]
	pub(crate) fn bump(&self) -> &'l Bump {
		unsafe { std::mem::transmute(&*self.bump) }
	}

	#[inline]
	pub fn intern_str(&self, value: &str) -> &'l str {
		self.bump().alloc_str(value)
	}

	/// A fresh intern/cycle-guard table tied to this context's arena.
	pub fn resolution_context(&self) -> &'l TypeResolutionContext<'l> {
		let ctx = Box::new(TypeResolutionContext::new(self.bump()));
		let borrowed = unsafe {
			std::mem::transmute::<&TypeResolutionContext<'l>, &'l TypeResolutionContext<'l>>(&*ctx)
		};
		self.contexts.borrow_mut().push(ctx);
		borrowed
	}

	pub fn root_namespace(&self) -> &'l CliNamespace<'l> {
		self.namespace("")
	}

	/// Interns a dotted namespace path, creating parents as needed. Equal
	/// paths always return the same namespace object.
	pub fn namespace(&self, dotted: &str) -> &'l CliNamespace<'l> {
		let interned = self.namespaces.borrow().get(dotted).copied();
		if let Some(namespace) = interned {
			return namespace;
		}

		let namespace = if dotted.is_empty() {
			CliNamespace::alloc(self.bump(), "", None)
		} else {
			let (parent, name) = match dotted.rsplit_once('.') {
				Some((parent, name)) => (parent, name),
				None => ("", dotted),
			};
			CliNamespace::alloc(self.bump(), name, Some(self.namespace(parent)))
		};
		self.namespaces.borrow_mut().insert(dotted.to_string(), namespace);
		namespace
	}
}

impl Default for CliContext<'_> {
	fn default() -> Self {
		Self::new()
	}
}
