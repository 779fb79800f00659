//! Utility-library instrumentation
//!
//! The agent bundles a general-purpose utility library and builds two risky
//! behaviours on it: a string escaper that silently gives up past a nesting
//! depth, and a guide attribute filter built from `reduce(keys(attrs))`. The
//! instrumented wrapper caps iterator nesting below the escaper's own cutoff
//! and captures the attribute set so the next `dom` call can be checked with
//! its tag name.

use crate::env::SandboxEnv;
use crate::error::{SandboxError, SandboxResult};
use cage_filter::filter_guide_tag;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// How many `keys` results are remembered
pub const KEYS_MEMO_CAPACITY: usize = 256;

/// Iteration callback: `(value, key)`
pub type Iteratee<'a> = dyn FnMut(&Value, &Value) -> SandboxResult<()> + 'a;

/// Reduction callback: `(memo, value, key) -> memo`
pub type Reducer<'a> = dyn FnMut(Value, &Value, &Value) -> SandboxResult<Value> + 'a;

/// The operations of the agent's utility library the sandbox wraps
pub trait UtilityLibrary: Send + Sync {
    /// Visit every element (arrays) or entry (objects)
    ///
    /// # Errors
    /// Whatever the iteratee returns
    fn each(&self, collection: &Value, iteratee: &mut Iteratee<'_>) -> SandboxResult<()>;

    /// Own keys of an object
    fn keys(&self, object: &Value) -> Vec<String>;

    /// Fold over every element or entry
    ///
    /// # Errors
    /// Whatever the reducer returns
    fn reduce(&self, collection: &Value, reducer: &mut Reducer<'_>, memo: Value) -> SandboxResult<Value>;
}

/// Reference implementation over JSON values
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonUtilityLibrary;

impl JsonUtilityLibrary {
    fn entries(collection: &Value) -> Vec<(Value, Value)> {
        match collection {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (v.clone(), Value::from(i)))
                .collect(),
            Value::Object(fields) => fields
                .iter()
                .map(|(k, v)| (v.clone(), Value::String(k.clone())))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl UtilityLibrary for JsonUtilityLibrary {
    fn each(&self, collection: &Value, iteratee: &mut Iteratee<'_>) -> SandboxResult<()> {
        for (value, key) in Self::entries(collection) {
            iteratee(&value, &key)?;
        }
        Ok(())
    }

    fn keys(&self, object: &Value) -> Vec<String> {
        object
            .as_object()
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn reduce(&self, collection: &Value, reducer: &mut Reducer<'_>, memo: Value) -> SandboxResult<Value> {
        Self::entries(collection)
            .into_iter()
            .try_fold(memo, |acc, (value, key)| reducer(acc, &value, &key))
    }
}

/// A `keys` result the sandbox can recognize again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyList {
    id: u64,
    keys: Vec<String>,
}

impl KeyList {
    /// The keys
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn to_value(&self) -> Value {
        Value::Array(self.keys.iter().cloned().map(Value::String).collect())
    }
}

/// What `reduce` folds over
#[derive(Debug, Clone, Copy)]
pub enum ReduceSource<'a> {
    /// A list returned by [`InstrumentedLibrary::keys`]
    Keys(&'a KeyList),
    /// Any other value
    Value(&'a Value),
}

/// Library state kept in the environment
#[derive(Default)]
pub(crate) struct LibraryState {
    inner: Option<Arc<dyn UtilityLibrary>>,
    keys_memo: VecDeque<(u64, Value)>,
    next_keys_id: u64,
    last_attributes: Option<Vec<(String, String)>>,
}

impl fmt::Debug for LibraryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryState")
            .field("installed", &self.inner.is_some())
            .field("keys_memo", &self.keys_memo.len())
            .field("last_attributes", &self.last_attributes)
            .finish()
    }
}

impl LibraryState {
    /// Remember `source` and return the id its key list carries
    fn remember_keys(&mut self, source: Value) -> u64 {
        let id = self.next_keys_id;
        self.next_keys_id += 1;
        self.keys_memo.push_back((id, source));
        while self.keys_memo.len() > KEYS_MEMO_CAPACITY {
            self.keys_memo.pop_front();
        }
        id
    }

    fn source_of(&self, id: u64) -> Option<&Value> {
        self.keys_memo.iter().find(|(k, _)| *k == id).map(|(_, v)| v)
    }
}

impl SandboxEnv {
    /// Install the agent's utility library
    ///
    /// Only the first installation takes effect; later ones are ignored.
    /// Returns whether this call installed it.
    pub fn install_library(&self, library: Arc<dyn UtilityLibrary>) -> bool {
        let installed = self.with_state(|s| {
            if s.library.inner.is_some() {
                return false;
            }
            s.library.inner = Some(library);
            true
        });
        if !installed {
            tracing::warn!("utility library already installed; ignoring replacement");
        }
        installed
    }

    /// The instrumented library, once installed
    #[must_use]
    pub fn library(self: &Arc<Self>) -> Option<InstrumentedLibrary> {
        self.with_state(|s| s.library.inner.clone())
            .map(|inner| InstrumentedLibrary {
                env: Arc::clone(self),
                inner,
            })
    }

    /// Attribute set captured by the last `reduce(keys(..))`
    #[must_use]
    pub fn captured_attributes(&self) -> Option<Vec<(String, String)>> {
        self.with_state(|s| s.library.last_attributes.clone())
    }
}

/// The agent's utility library with the sandbox's checks mixed in
#[derive(Clone)]
pub struct InstrumentedLibrary {
    env: Arc<SandboxEnv>,
    inner: Arc<dyn UtilityLibrary>,
}

impl fmt::Debug for InstrumentedLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedLibrary").finish_non_exhaustive()
    }
}

impl InstrumentedLibrary {
    /// `each`, failing at the nesting limit
    ///
    /// # Errors
    /// Capability violation when nested [`RECURSION_LIMIT`](crate::RECURSION_LIMIT)
    /// deep, or the iteratee's error
    pub fn each(&self, collection: &Value, iteratee: &mut Iteratee<'_>) -> SandboxResult<()> {
        let _level = self.env.enter_recursion()?;
        self.inner.each(collection, iteratee)
    }

    /// `keys`, remembering which object the result came from
    #[must_use]
    pub fn keys(&self, object: &Value) -> KeyList {
        let keys = self.inner.keys(object);
        let id = self
            .env
            .with_state(|s| s.library.remember_keys(object.clone()));
        KeyList { id, keys }
    }

    /// `reduce`, capturing the attribute set when folding over a `keys` result
    ///
    /// # Errors
    /// The reducer's error; the captured set is discarded with it
    pub fn reduce(
        &self,
        source: ReduceSource<'_>,
        reducer: &mut Reducer<'_>,
        memo: Value,
    ) -> SandboxResult<Value> {
        let (collection, captured) = match source {
            ReduceSource::Keys(list) => {
                let captured = self.env.with_state(|s| {
                    s.library.source_of(list.id).map(attributes_of)
                });
                (list.to_value(), captured)
            }
            ReduceSource::Value(value) => (value.clone(), None),
        };
        self.env
            .with_state(|s| s.library.last_attributes = captured);

        let result = self.inner.reduce(&collection, reducer, memo);
        if result.is_err() {
            self.env.with_state(|s| s.library.last_attributes = None);
        }
        result
    }

    /// `dom`, checking the element the captured attribute set belongs to
    ///
    /// Only the call right after a captured `reduce(keys(..))` is checked.
    /// Markup is expected in the form `<tag></tag>`.
    ///
    /// # Errors
    /// Capability violation if the tag cannot be read or the guide filter
    /// denies it (downgraded when unsealed)
    pub fn dom(&self, markup: &str) -> SandboxResult<()> {
        let Some(attributes) = self.env.with_state(|s| s.library.last_attributes.take()) else {
            return Ok(());
        };
        let tag = empty_element_tag(markup).ok_or_else(|| {
            SandboxError::capability("unable to extract tag name from dom() call")
        })?;
        let result = filter_guide_tag(
            tag,
            attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
        self.env.enforce(result, "guide element")
    }

    /// `template` compiles text to code and is never allowed
    ///
    /// # Errors
    /// Always
    pub fn template(&self, text: &str) -> SandboxResult<String> {
        tracing::warn!("agent tried to use _.template() with {:?}", text);
        Err(SandboxError::capability("_.template() is forbidden"))
    }
}

/// Attribute name/value pairs of a captured object
fn attributes_of(source: &Value) -> Vec<(String, String)> {
    source
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| {
                    let value = v.as_str().map_or_else(|| v.to_string(), str::to_string);
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `tag` from `<tag></tag>`
fn empty_element_tag(markup: &str) -> Option<&str> {
    let inner = markup.strip_prefix('<')?.strip_suffix('>')?;
    // inner is `tag></tag`
    if inner.len() < 3 || (inner.len() - 3) % 2 != 0 {
        return None;
    }
    let tag_len = (inner.len() - 3) / 2;
    let tag = inner.get(..tag_len)?;
    (inner.get(tag_len..) == Some(&format!("></{tag}")[..])).then_some(tag)
}
