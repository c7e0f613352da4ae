//! Codec tolerance (§4.2, §9): the reader must succeed even when a segment
//! declares a codec name with no registered implementation - proprietary
//! k-NN codecs, or a future Lucene codec this binary predates. Instead of
//! the source system's reflection-based registry patching, lookup here is
//! a pure function with an in-process cache: unknown names synthesize a
//! [`FallbackCodec`] that delegates every stored-fields concern to a
//! nearest-version base and returns a no-op vector format (never consumed
//! by this reader anyway, per §4.2's read-only stored-fields scope).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::lucene::stored_fields::{StoredFieldsFormat, StoredFieldsV5, StoredFieldsV9};

/// A Lucene codec, reduced to the one concern this reader needs: decoding
/// stored fields. Real Lucene codecs additionally cover postings, doc
/// values, points, and vectors - out of scope per §1's "full Lucene
/// query/merge semantics" non-goal.
pub trait Codec: Send + Sync {
    fn name(&self) -> &str;
    fn stored_fields_format(&self) -> Arc<dyn StoredFieldsFormat>;
}

struct RegisteredCodec {
    name: String,
    stored_fields: Arc<dyn StoredFieldsFormat>,
}

impl Codec for RegisteredCodec {
    fn name(&self) -> &str {
        &self.name
    }
    fn stored_fields_format(&self) -> Arc<dyn StoredFieldsFormat> {
        self.stored_fields.clone()
    }
}

/// A synthesized codec for an unrecognized name. Delegates stored-fields
/// decoding to `base` (the newest registered codec, as a best guess at
/// wire compatibility) and is otherwise inert.
pub struct FallbackCodec {
    name: String,
    base: Arc<dyn Codec>,
}

impl Codec for FallbackCodec {
    fn name(&self) -> &str {
        &self.name
    }
    fn stored_fields_format(&self) -> Arc<dyn StoredFieldsFormat> {
        self.base.stored_fields_format()
    }
}

/// Registered codecs by name, plus a cache of synthesized fallbacks so a
/// repeatedly-seen unknown name doesn't get re-synthesized per segment
/// (§4.2: "cached per unknown name within the process").
pub struct CodecRegistry {
    registered: HashMap<String, Arc<dyn Codec>>,
    fallbacks: Mutex<HashMap<String, Arc<dyn Codec>>>,
    newest: Arc<dyn Codec>,
}

impl CodecRegistry {
    /// Builds the registry covering Lucene 5 through 9's stored-fields
    /// formats (§1's target matrix).
    pub fn standard() -> Self {
        let make = |name: &str, sf: Arc<dyn StoredFieldsFormat>| -> Arc<dyn Codec> {
            Arc::new(RegisteredCodec { name: name.to_string(), stored_fields: sf })
        };
        let lucene50 = make("Lucene50", Arc::new(StoredFieldsV5));
        let lucene62 = make("Lucene62", Arc::new(StoredFieldsV5));
        let lucene70 = make("Lucene70", Arc::new(StoredFieldsV9));
        let lucene80 = make("Lucene80", Arc::new(StoredFieldsV9));
        let lucene90 = make("Lucene90", Arc::new(StoredFieldsV9));

        let mut registered: HashMap<String, Arc<dyn Codec>> = HashMap::new();
        for codec in [&lucene50, &lucene62, &lucene70, &lucene80, &lucene90] {
            registered.insert(codec.name().to_string(), codec.clone());
        }

        Self {
            registered,
            fallbacks: Mutex::new(HashMap::new()),
            newest: lucene90,
        }
    }

    /// Resolves `name` to a registered codec, or a cached/synthesized
    /// [`FallbackCodec`] when the name isn't recognized (§4.2 steps 1-3).
    pub fn resolve(&self, name: &str) -> Arc<dyn Codec> {
        if let Some(codec) = self.registered.get(name) {
            return codec.clone();
        }
        let mut fallbacks = self.fallbacks.lock().expect("fallback cache poisoned");
        fallbacks
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(FallbackCodec {
                    name: name.to_string(),
                    base: self.newest.clone(),
                }) as Arc<dyn Codec>
            })
            .clone()
    }
}
