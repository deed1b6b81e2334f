//! Closed tagged value type for captured call arguments and return values.
//!
//! The host runtime's metadata extractor converts every argument and return
//! value into a [`Value`] at capture time. The engine itself never inspects
//! host objects: trigger matching, verification, and export all operate on
//! this closed set of variants.
//!
//! # Display bounding
//!
//! Trace documents embed values as display strings. [`Value::repr`] bounds
//! every rendering at [`REPR_LIMIT`] characters so byte buffers and large
//! collections cannot bloat the export. Truncated reprs end in `...`.

/// Maximum length of a value repr before truncation.
pub const REPR_LIMIT: usize = 64;

/// Bytes of a `Bytes` value that participate in the hex repr.
///
/// 32 bytes encode to 64 hex characters, which already saturates
/// [`REPR_LIMIT`], so encoding more would be wasted work.
const BYTES_REPR_PREFIX: usize = 32;

/// A captured argument or return value.
///
/// Comparison is by value, never by identity: two `Int(3)` values compare
/// equal regardless of where they were captured. Hook value triggers and
/// return verification rely on this.
///
/// # Example
///
/// ```
/// use huella::value::{Value, ValueKind};
///
/// let v = Value::Sequence(vec![Value::Int(1), Value::Text("a".into())]);
/// assert_eq!(v.kind(), ValueKind::Sequence);
/// assert_eq!(v.type_label(), "list");
/// assert_eq!(v.repr(), r#"[1, "a"]"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    Text(String),
    /// Ordered sequence of values.
    Sequence(Vec<Value>),
    /// Ordered key-value mapping.
    Mapping(Vec<(String, Value)>),
    /// Raw byte buffer.
    Bytes(Vec<u8>),
    /// Anything the extractor could not classify, carried as a
    /// pre-rendered display string.
    Other(String),
}

/// Field-less kind of a [`Value`], used in hook type-trigger sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Float,
    Text,
    Sequence,
    Mapping,
    Bytes,
    Other,
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Sequence(_) => ValueKind::Sequence,
            Value::Mapping(_) => ValueKind::Mapping,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Other(_) => ValueKind::Other,
        }
    }

    /// Short type label used in exported argument triples.
    pub fn type_label(&self) -> &'static str {
        self.kind().label()
    }

    /// Bounded display rendering.
    ///
    /// The result never exceeds [`REPR_LIMIT`] characters plus the `...`
    /// marker, and truncation always lands on a char boundary.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.render(&mut out);
        bound_repr(out)
    }

    /// Append this value's rendering to `out`, stopping early once the
    /// buffer already exceeds the bound. Nested collections respect the
    /// same cutoff, so a deep structure costs no more than the limit.
    fn render(&self, out: &mut String) {
        if out.len() > REPR_LIMIT {
            return;
        }
        match self {
            Value::Int(v) => {
                out.push_str(&v.to_string());
            }
            Value::Float(v) => {
                out.push_str(&v.to_string());
            }
            Value::Text(v) => {
                out.push_str(&format!("{v:?}"));
            }
            Value::Sequence(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render(out);
                    if out.len() > REPR_LIMIT {
                        break;
                    }
                }
                out.push(']');
            }
            Value::Mapping(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    value.render(out);
                    if out.len() > REPR_LIMIT {
                        break;
                    }
                }
                out.push('}');
            }
            Value::Bytes(bytes) => {
                // The 32-byte prefix encodes to 66 chars with the 0x tag,
                // so any buffer long enough to drop data always overflows
                // the bound and picks up the truncation marker.
                let take = bytes.len().min(BYTES_REPR_PREFIX);
                out.push_str("0x");
                out.push_str(&hex::encode(&bytes[..take]));
            }
            Value::Other(text) => {
                out.push_str(text);
            }
        }
    }
}

impl ValueKind {
    /// Short label for exported argument triples and log lines.
    pub fn label(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "str",
            ValueKind::Sequence => "list",
            ValueKind::Mapping => "dict",
            ValueKind::Bytes => "bytes",
            ValueKind::Other => "any",
        }
    }
}

/// Cut `s` at [`REPR_LIMIT`] on a char boundary and append `...`.
fn bound_repr(mut s: String) -> String {
    if s.len() <= REPR_LIMIT {
        return s;
    }
    let mut cut = REPR_LIMIT;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str("...");
    s
}
