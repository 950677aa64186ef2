pub mod builtins;
pub mod context;
pub mod types;
mod errors;

pub use builtins::{Builtins, BuiltinTypes};
pub use context::CliContext;
pub use errors::CliError;
pub use types::{
	CliDateTime, CliNamespace, CliRaw, CliType, CliTypeDef, CliTypeInstance, CliTypeMemberDef,
	CliTypeParam, CliValue, TypeExpr, TypeResolutionContext,
};
