use fxhash::FxHashMap;

use crate::nrbf::errors::BridgeError;
use crate::nrbf::records::LibraryInfo;

/// Parsed, structured form of a qualified (and possibly generic) class
/// name, e.g. ``System.Collections.Generic.List`1[[Foo.Bar, Lib, …]]``.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParametrizedClassInfo {
	pub name: String,
	pub parameters: Vec<ParametrizedClassInfo>,
	pub library: Option<LibraryInfo>,
}

#[derive(Debug, Clone, PartialEq)]
enum NameTree {
	Leaf(String),
	List(Vec<NameTree>),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Token<'a> {
	Literal(&'a str),
	Whitespace,
	Comma,
	LBracket,
	RBracket,
}

fn tokenize(value: &str) -> Vec<(Token, usize)> {
	let mut tokens = Vec::new();
	let mut start = None;
	for (col, c) in value.char_indices() {
		let token = match c {
			' ' | '\t' => Some(Token::Whitespace),
			',' => Some(Token::Comma),
			'[' => Some(Token::LBracket),
			']' => Some(Token::RBracket),
			_ => None,
		};
		match token {
			Some(token) => {
				if let Some(s) = start.take() {
					tokens.push((Token::Literal(&value[s..col]), s));
				}
				// Consecutive whitespace collapses into one token.
				if token != Token::Whitespace || !matches!(tokens.last(), Some((Token::Whitespace, _))) {
					tokens.push((token, col));
				}
			},
			None => {
				if start.is_none() {
					start = Some(col);
				}
			},
		}
	}
	if let Some(s) = start {
		tokens.push((Token::Literal(&value[s..]), s));
	}
	tokens
}

/// Builds the bracket-nested intermediate tree: `[` pushes a level, `]`
/// pops it onto the parent, commas separate siblings.
fn parse_intermediate(value: &str) -> Result<Vec<NameTree>, BridgeError> {
	let mut tokens: Vec<NameTree> = Vec::new();
	let mut stack: Vec<Vec<NameTree>> = Vec::new();
	// Two states: expecting an item, or just past one.
	let mut expecting_item = true;

	for (token, col) in tokenize(value) {
		if expecting_item {
			match token {
				Token::Whitespace => {},
				Token::Comma => {
					return Err(BridgeError::InvalidClassName(format!(
						"unexpected ',' at column {}: {value}",
						col + 1
					)))
				},
				Token::LBracket => {
					stack.push(std::mem::take(&mut tokens));
				},
				Token::RBracket => {
					let Some(mut parent) = stack.pop() else {
						return Err(BridgeError::InvalidClassName(format!(
							"unexpected ']' at column {}: {value}",
							col + 1
						)));
					};
					parent.push(NameTree::List(std::mem::take(&mut tokens)));
					tokens = parent;
					expecting_item = false;
				},
				Token::Literal(literal) => {
					tokens.push(NameTree::Leaf(literal.to_string()));
					expecting_item = false;
				},
			}
		} else {
			match token {
				Token::Whitespace => {},
				Token::Comma => expecting_item = true,
				Token::LBracket => {
					stack.push(std::mem::take(&mut tokens));
					expecting_item = true;
				},
				Token::RBracket => {
					let Some(mut parent) = stack.pop() else {
						return Err(BridgeError::InvalidClassName(format!(
							"unexpected ']' at column {}: {value}",
							col + 1
						)));
					};
					parent.push(NameTree::List(std::mem::take(&mut tokens)));
					tokens = parent;
				},
				Token::Literal(_) => {
					return Err(BridgeError::InvalidClassName(format!(
						"unexpected literal at column {}: {value}",
						col + 1
					)))
				},
			}
		}
	}

	if !stack.is_empty() {
		return Err(BridgeError::InvalidClassName(format!("unclosed bracket: {value}")));
	}
	Ok(tokens)
}

pub(crate) struct PropertiesRepr {
	pub items: Vec<String>,
	pub mappings: FxHashMap<String, String>,
}

fn parse_properties_parts<'a>(
	parts: impl Iterator<Item = &'a str>,
) -> Result<PropertiesRepr, BridgeError> {
	let mut items = Vec::new();
	let mut mappings = FxHashMap::default();
	let mut items_part = true;

	for part in parts {
		let part = part.trim();
		match part.split_once('=') {
			Some((key, value)) => {
				items_part = false;
				mappings.insert(key.to_string(), value.to_string());
			},
			None => {
				if !items_part {
					return Err(BridgeError::InvalidClassName(format!(
						"invalid property representation: {part}"
					)));
				}
				items.push(part.to_string());
			},
		}
	}
	Ok(PropertiesRepr { items, mappings })
}

fn parse_properties(trees: &[NameTree]) -> Result<PropertiesRepr, BridgeError> {
	let mut parts = Vec::with_capacity(trees.len());
	for tree in trees {
		match tree {
			NameTree::Leaf(leaf) => parts.push(leaf.as_str()),
			NameTree::List(_) => {
				return Err(BridgeError::InvalidClassName(format!(
					"invalid property representation: {trees:?}"
				)))
			},
		}
	}
	parse_properties_parts(parts.into_iter())
}

/// Parses a comma-separated assembly descriptor such as
/// `Lib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null`.
pub(crate) fn library_info_from_csv(value: &str) -> Result<LibraryInfo, BridgeError> {
	library_info_from_properties(&parse_properties_parts(value.split(','))?)
}

pub(crate) fn library_info_from_properties(repr: &PropertiesRepr) -> Result<LibraryInfo, BridgeError> {
	let Some(name) = repr.items.last() else {
		return Err(BridgeError::InvalidClassName("missing library name".to_string()));
	};
	let version = repr.mappings.get("Version").ok_or_else(|| {
		BridgeError::InvalidClassName(format!("library {name} has no Version property"))
	})?;
	let culture = repr.mappings.get("Culture").ok_or_else(|| {
		BridgeError::InvalidClassName(format!("library {name} has no Culture property"))
	})?;
	Ok(LibraryInfo {
		name: name.clone(),
		version: version.clone(),
		culture: culture.clone(),
		public_key_token: repr.mappings.get("PublicKeyToken").cloned(),
	})
}

/// A bracketed parameter is either a bare name or a name plus an assembly
/// descriptor.
fn concrete_class_info(repr: PropertiesRepr) -> Result<(String, Option<LibraryInfo>), BridgeError> {
	match repr.items.len() {
		1 => {
			if !repr.mappings.is_empty() {
				return Err(BridgeError::InvalidClassName(format!(
					"stray properties after {}",
					repr.items[0]
				)));
			}
			Ok((repr.items.into_iter().next().unwrap(), None))
		},
		2 => {
			let library = library_info_from_properties(&PropertiesRepr {
				items: repr.items[1..].to_vec(),
				mappings: repr.mappings,
			})?;
			Ok((repr.items.into_iter().next().unwrap(), Some(library)))
		},
		_ => Err(BridgeError::InvalidClassName(format!(
			"invalid property representation: {:?}",
			repr.items
		))),
	}
}

/// Splits the backtick arity suffix off a literal, e.g. ``List`1`` → 1.
fn split_arity(token: &str) -> Result<(&str, usize), BridgeError> {
	match token.split_once('`') {
		None => Ok((token, 0)),
		Some((name, arity)) => match arity.parse::<usize>() {
			Ok(arity) => Ok((name, arity)),
			Err(_) => Err(BridgeError::InvalidClassName(format!("invalid arity: {arity}"))),
		},
	}
}

fn parse_inner(tokens: &[NameTree], mut i: usize) -> Result<(usize, ParametrizedClassInfo), BridgeError> {
	let Some(token) = tokens.get(i) else {
		return Err(BridgeError::InvalidClassName("unexpected end of tokens".to_string()));
	};

	let (name, arity, library) = match token {
		NameTree::Leaf(leaf) => {
			let (name, arity) = split_arity(leaf)?;
			(name.to_string(), arity, None)
		},
		NameTree::List(list) => {
			let (name_and_arity, library) = concrete_class_info(parse_properties(list)?)?;
			let (name, arity) = split_arity(&name_and_arity)?;
			(name.to_string(), arity, library)
		},
	};
	i += 1;

	let mut parameters = Vec::with_capacity(arity);
	if arity > 0 {
		let Some(NameTree::List(inner)) = tokens.get(i) else {
			return Err(BridgeError::InvalidClassName("unexpected end of tokens".to_string()));
		};
		i += 1;

		let mut j = 0;
		while parameters.len() < arity {
			if j >= inner.len() {
				return Err(BridgeError::InvalidClassName("unexpected end of tokens".to_string()));
			}
			let (next, parameter) = parse_inner(inner, j)?;
			j = next;
			parameters.push(parameter);
		}
		if j < inner.len() {
			return Err(BridgeError::InvalidClassName(format!(
				"redundant tokens: {:?}",
				&inner[j..]
			)));
		}
	}

	Ok((i, ParametrizedClassInfo { name, parameters, library }))
}

/// Parses the class-name mini-language into its structured form.
pub fn parse_class_name(value: &str) -> Result<ParametrizedClassInfo, BridgeError> {
	let tokens = parse_intermediate(value)?;
	let (consumed, info) = parse_inner(&tokens, 0)?;
	if consumed < tokens.len() {
		return Err(BridgeError::InvalidClassName(format!(
			"redundant tokens: {:?}",
			&tokens[consumed..]
		)));
	}
	Ok(info)
}

/// Splits a dotted qualified name into namespace and plain name. The
/// namespace may be empty.
pub(crate) fn split_namespace(qualified: &str) -> Result<(&str, &str), BridgeError> {
	match qualified.rsplit_once('.') {
		None => {
			if qualified.is_empty() {
				return Err(BridgeError::InvalidClassName("empty qualified type name".to_string()));
			}
			Ok(("", qualified))
		},
		Some((namespace, name)) => {
			if name.is_empty() {
				return Err(BridgeError::InvalidClassName(format!(
					"invalid qualified type name: {qualified}"
				)));
			}
			Ok((namespace, name))
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bare_names_parse() {
		let info = parse_class_name("Some.Name.Space.Foo").unwrap();
		assert_eq!(info.name, "Some.Name.Space.Foo");
		assert!(info.parameters.is_empty());
		assert!(info.library.is_none());
	}

	#[test]
	fn generic_names_carry_their_parameters() {
		let info = parse_class_name(
			"System.Collections.Generic.List`1[[Some.Name.Space.Foo, SomeAssembly, \
			 Version=1.0.0.0, Culture=neutral, PublicKeyToken=null]]",
		)
		.unwrap();
		assert_eq!(info.name, "System.Collections.Generic.List");
		assert_eq!(info.parameters.len(), 1);
		assert!(info.library.is_none());

		let parameter = &info.parameters[0];
		assert_eq!(parameter.name, "Some.Name.Space.Foo");
		assert_eq!(
			parameter.library,
			Some(LibraryInfo {
				name: "SomeAssembly".to_string(),
				version: "1.0.0.0".to_string(),
				culture: "neutral".to_string(),
				public_key_token: Some("null".to_string()),
			})
		);
	}

	#[test]
	fn nested_parameters_match_their_arities() {
		let info = parse_class_name(
			"System.Collections.Generic.Dictionary`2[[System.String, mscorlib, Version=4.0.0.0, \
			 Culture=neutral, PublicKeyToken=b77a5c561934e089],[System.Collections.Generic.List`1\
			 [[System.Int32, mscorlib, Version=4.0.0.0, Culture=neutral, \
			 PublicKeyToken=b77a5c561934e089]], mscorlib, Version=4.0.0.0, Culture=neutral, \
			 PublicKeyToken=b77a5c561934e089]]",
		)
		.unwrap();
		assert_eq!(info.name, "System.Collections.Generic.Dictionary");
		assert_eq!(info.parameters.len(), 2);
		assert_eq!(info.parameters[0].name, "System.String");
		assert_eq!(info.parameters[1].name, "System.Collections.Generic.List");
		assert_eq!(info.parameters[1].parameters.len(), 1);
		assert_eq!(info.parameters[1].parameters[0].name, "System.Int32");
	}

	#[test]
	fn malformed_names_are_rejected() {
		assert!(matches!(
			parse_class_name("List`x[[System.Int32]]"),
			Err(BridgeError::InvalidClassName(_))
		));
		assert!(matches!(
			parse_class_name("List`1[[System.Int32]"),
			Err(BridgeError::InvalidClassName(_))
		));
		assert!(matches!(
			parse_class_name("List`1[[A],[B]]"),
			Err(BridgeError::InvalidClassName(_))
		));
		assert!(matches!(
			parse_class_name("List`2[[A]]"),
			Err(BridgeError::InvalidClassName(_))
		));
		assert!(matches!(parse_class_name(",A"), Err(BridgeError::InvalidClassName(_))));
	}

	#[test]
	fn library_descriptors_parse_from_csv() {
		let library =
			library_info_from_csv("SomeAssembly, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null")
				.unwrap();
		assert_eq!(library.name, "SomeAssembly");
		assert_eq!(library.version, "1.0.0.0");
		assert_eq!(library.culture, "neutral");
		assert_eq!(library.public_key_token.as_deref(), Some("null"));

		assert!(matches!(
			library_info_from_csv("SomeAssembly, Culture=neutral"),
			Err(BridgeError::InvalidClassName(_))
		));
	}

	#[test]
	fn qualified_names_split_on_the_last_dot() {
		assert_eq!(split_namespace("Some.Name.Space.Foo").unwrap(), ("Some.Name.Space", "Foo"));
		assert_eq!(split_namespace("Foo").unwrap(), ("", "Foo"));
		assert!(split_namespace("").is_err());
		assert!(split_namespace("Foo.").is_err());
	}
}
