use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Monotonic tag telling successive schema sources apart.
///
/// Connections remember the generation they were dialed for; a mismatch means the schema
/// changed underneath them and they must be re-established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Generation of a project that has not loaded any schema yet.
    pub const NONE: Generation = Generation(0);

    pub fn next() -> Self {
        Generation(NEXT_GENERATION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Where a schema comes from. This is the persisted part of a [`SchemaSource`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "value")]
pub enum SchemaOrigin {
    StaticFiles {
        import_paths: Vec<PathBuf>,
        entry_files: Vec<PathBuf>,
    },
    LiveReflection {
        address: String,
    },
}

/// An immutable schema origin stamped with a fresh [`Generation`].
#[derive(Clone, Debug)]
pub struct SchemaSource {
    origin: SchemaOrigin,
    generation: Generation,
}

impl SchemaSource {
    pub fn new(origin: SchemaOrigin) -> Self {
        Self {
            origin,
            generation: Generation::next(),
        }
    }

    pub fn static_files(import_paths: Vec<PathBuf>, entry_files: Vec<PathBuf>) -> Self {
        Self::new(SchemaOrigin::StaticFiles {
            import_paths,
            entry_files,
        })
    }

    pub fn live_reflection(address: impl Into<String>) -> Self {
        Self::new(SchemaOrigin::LiveReflection {
            address: address.into(),
        })
    }

    pub fn origin(&self) -> &SchemaOrigin {
        &self.origin
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_source_gets_a_newer_generation() {
        let first = SchemaSource::live_reflection("localhost:50051");
        let second = SchemaSource::live_reflection("localhost:50051");

        assert!(second.generation() > first.generation());
        assert!(first.generation() > Generation::NONE);
    }

    #[test]
    fn origin_is_tagged_when_serialized() {
        let origin = SchemaOrigin::LiveReflection {
            address: "localhost:50051".to_string(),
        };

        let json = serde_json::to_value(&origin).unwrap();

        assert_eq!(json["type"], "LiveReflection");
        assert_eq!(json["value"]["address"], "localhost:50051");
    }
}
