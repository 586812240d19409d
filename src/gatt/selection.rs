//! Allow-list matching for discovered services and characteristics

use uuid::Uuid;

/// Pick the discovered entry matching the earliest allow-list entry
///
/// Allow-list order decides, not discovery order.
pub fn select_allowed<'a, T>(
    discovered: &'a [T],
    allow_list: &[Uuid],
    uuid_of: impl Fn(&T) -> Uuid,
) -> Option<&'a T> {
    allow_list
        .iter()
        .find_map(|wanted| discovered.iter().find(|d| uuid_of(d) == *wanted))
}

/// Braced UUIDs of everything discovered, for diagnostics
pub fn describe<T>(discovered: &[T], uuid_of: impl Fn(&T) -> Uuid) -> Vec<String> {
    discovered
        .iter()
        .map(|d| uuid_of(d).braced().to_string())
        .collect()
}
