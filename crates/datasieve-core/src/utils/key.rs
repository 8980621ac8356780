//! Composite key encoding.
//!
//! Components are joined with the ASCII unit separator. Any separator or
//! escape byte inside a component is prefixed with the escape byte, so two
//! different component lists never produce the same encoded key.
use crate::chunk::ColumnAccessor;

/// Separates components of a composite key.
pub const SEPARATOR: u8 = 0x1F;
/// Prefixes a literal separator or escape byte inside a component.
pub const ESCAPE: u8 = 0x1B;

/// Append one escaped component to `buf`.
#[inline]
pub fn push_component(buf: &mut Vec<u8>, component: &[u8]) {
    for &b in component {
        if b == SEPARATOR || b == ESCAPE {
            buf.push(ESCAPE);
        }
        buf.push(b);
    }
}

/// Encode a list of components into `buf`, clearing it first.
///
/// Returns `false` (and leaves `buf` empty) when any component is null:
/// a row with a null key part has no key.
pub fn encode_into<'a, I>(components: I, buf: &mut Vec<u8>) -> bool
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    buf.clear();
    for (i, component) in components.into_iter().enumerate() {
        let Some(value) = component else {
            buf.clear();
            return false;
        };
        if i > 0 {
            buf.push(SEPARATOR);
        }
        push_component(buf, value.as_bytes());
    }
    true
}

/// Owned variant of [`encode_into`].
pub fn encode_key<'a, I>(components: I) -> Option<Vec<u8>>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut buf = Vec::new();
    encode_into(components, &mut buf).then_some(buf)
}

/// Encode the key of `row` from its column values. Returns `false` for a row
/// with a null key part.
pub fn encode_row<C: ColumnAccessor>(columns: &[C], row: usize, buf: &mut Vec<u8>) -> bool {
    encode_into(columns.iter().map(|c| c.value_as_str(row)), buf)
}

/// Split an encoded key back into its components.
pub fn decode_key(key: &[u8]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = Vec::new();
    let mut escaped = false;
    for &b in key {
        if escaped {
            current.push(b);
            escaped = false;
        } else if b == ESCAPE {
            escaped = true;
        } else if b == SEPARATOR {
            parts.push(String::from_utf8_lossy(&current).into_owned());
            current.clear();
        } else {
            current.push(b);
        }
    }
    parts.push(String::from_utf8_lossy(&current).into_owned());
    parts
}

/// Human readable form used in failure samples.
pub fn display_key(key: &[u8]) -> String {
    let parts = decode_key(key);
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(", "))
    }
}
