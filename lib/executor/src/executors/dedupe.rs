use std::{
    fmt::Write,
    hash::{BuildHasherDefault, Hash, Hasher},
    sync::Arc,
};

use ahash::AHasher;
use serde_json::{Map, Value};
use xxhash_rust::xxh3::xxh3_64;

use crate::execution_request::ExecutionRequest;

pub type ABuildHasher = BuildHasherDefault<AHasher>;

/// Identity of a request inside a batch window.
///
/// Two requests are the same iff their documents, operation names and variables are equal.
/// The key is the canonical string `document \0 operation name \0 variables`, where the
/// variables are printed as compact JSON with object keys sorted recursively, so the
/// order in which variables were inserted does not matter. Equality compares the whole
/// string, the xxh3 fingerprint only speeds up hashing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupKey {
    fingerprint: u64,
    canonical: Arc<str>,
}

impl Hash for DedupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint);
    }
}

impl DedupKey {
    pub fn new(request: &ExecutionRequest) -> Self {
        let mut canonical = String::with_capacity(request.document.len() + 64);
        canonical.push_str(&request.document);
        canonical.push('\0');
        if let Some(operation_name) = &request.operation_name {
            canonical.push_str(operation_name);
        }
        canonical.push('\0');
        write_canonical_object(&mut canonical, &request.variables);

        DedupKey {
            fingerprint: xxh3_64(canonical.as_bytes()),
            canonical: canonical.into(),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl From<&ExecutionRequest> for DedupKey {
    fn from(request: &ExecutionRequest) -> Self {
        DedupKey::new(request)
    }
}

pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_canonical_object(out, map),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        // Display of a scalar is its compact JSON form
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_canonical_object(out: &mut String, map: &Map<String, Value>) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));

    out.push('{');
    for (index, (key, value)) in entries.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:", Value::String(key.clone()));
        write_canonical(out, value);
    }
    out.push('}');
}
