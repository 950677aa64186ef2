use std::fmt::Formatter;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};

/// Maps a naive wall-clock timestamp onto a concrete UTC offset.
pub type TimezoneLocalizer = fn(NaiveDateTime) -> DateTime<FixedOffset>;

/// Interprets a naive timestamp in the machine's local timezone.
/// Ambiguous wall-clock times resolve to the earlier alternative,
/// nonexistent ones fall back to UTC.
pub fn localize_system(dt: NaiveDateTime) -> DateTime<FixedOffset> {
	match Local.from_local_datetime(&dt).earliest() {
		Some(local) => local.fixed_offset(),
		None => Utc.from_utc_datetime(&dt).fixed_offset(),
	}
}

macro_rules! impl_identity {
    ($($ty: ident),*) => {
		$(
			impl Eq for $ty<'_> {}

			impl PartialEq<Self> for $ty<'_> {
				#[inline]
				fn eq(&self, other: &Self) -> bool {
					std::ptr::eq(self, other)
				}
			}

			impl std::hash::Hash for $ty<'_> {
				fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
					(self as *const Self).hash(state)
				}
			}
		)*
	};
}

pub(crate) use impl_identity;

pub(crate) fn fmt_debug_map_len<K, V, S>(
	map: &std::cell::RefCell<std::collections::HashMap<K, V, S>>,
	fmt: &mut Formatter,
) -> std::fmt::Result {
	write!(fmt, "[{}]", map.borrow().len())
}

/// Formats a `RefCell<HashMap<..>>` as `[len]`, same as [`fmt_debug_map_len`]
/// but usable directly as a `Debug` value (e.g. in `debug_struct(..).field(..)`).
pub(crate) struct DebugMapLen<'a, K, V, S>(pub &'a std::cell::RefCell<std::collections::HashMap<K, V, S>>);

impl<'a, K, V, S> std::fmt::Debug for DebugMapLen<'a, K, V, S> {
	fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
		fmt_debug_map_len(self.0, fmt)
	}
}
