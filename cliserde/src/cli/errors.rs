#[derive(Debug, thiserror::Error)]
pub enum CliError {
	#[error("type parameter '{0}' is unbound")]
	UnboundParameter(String),

	#[error("{0} has unresolved parameters")]
	UnresolvedParameters(String),

	#[error("{type_name} already has a value for parameter '{param}'")]
	AlreadyBound { type_name: String, param: String },

	#[error("expected at most {expected} type parameters, got {got}")]
	TooManyParameters { expected: usize, got: usize },

	#[error("default parameter '{0}' shall not shadow a bound parameter")]
	DefaultShadowsBound(String),

	#[error("invalid instantiation: {0}")]
	InvalidInstantiation(String),

	#[error("given values do not match the member count (got {got}, {expected} expected)")]
	MemberCountMismatch { got: usize, expected: usize },

	#[error("{type_name} has no member '{member}'")]
	NoSuchMember { type_name: String, member: String },
}
