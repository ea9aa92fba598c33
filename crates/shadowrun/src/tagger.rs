//! In-process surrogate allocation.
//!
//! Objects are never identified by address on the wire. The tagger hands out
//! allocation-time object ids and class ids and folds them into net references.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use shadowpack::NetReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagError {
    ObjectIdsExhausted,
    ClassIdsExhausted,
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectIdsExhausted => write!(f, "object id space exhausted"),
            Self::ClassIdsExhausted => write!(f, "class id space exhausted"),
        }
    }
}

impl std::error::Error for TagError {}

/// Allocates surrogate tokens. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct ObjectTagger {
    next_object: AtomicU64,
    next_class: AtomicU32,
}

impl Default for ObjectTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTagger {
    pub fn new() -> Self {
        Self { next_object: AtomicU64::new(1), next_class: AtomicU32::new(1) }
    }

    /// Tags a new instance of `class`.
    pub fn tag_object(&self, class: NetReference) -> Result<NetReference, TagError> {
        let object_id = self.next_object_id()?;
        Ok(NetReference::new(object_id, class.class_id(), false))
    }

    /// Tags a new class object, giving it both an object id and a fresh class id.
    pub fn tag_class(&self) -> Result<NetReference, TagError> {
        let object_id = self.next_object_id()?;
        let class_id = self.next_class.fetch_add(1, Ordering::Relaxed);
        if class_id > NetReference::MAX_CLASS_ID {
            return Err(TagError::ClassIdsExhausted);
        }
        Ok(NetReference::new(object_id, class_id, true))
    }

    /// Number of object ids handed out so far.
    pub fn objects_tagged(&self) -> u64 {
        (self.next_object.load(Ordering::Relaxed) - 1).min(NetReference::MAX_OBJECT_ID)
    }

    fn next_object_id(&self) -> Result<u64, TagError> {
        let id = self.next_object.fetch_add(1, Ordering::Relaxed);
        if id > NetReference::MAX_OBJECT_ID {
            return Err(TagError::ObjectIdsExhausted);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_objects_inherit_class_id() -> Result<(), TagError> {
        let tagger = ObjectTagger::new();
        let class = tagger.tag_class()?;
        let obj = tagger.tag_object(class)?;

        assert!(class.is_class());
        assert!(!obj.is_class());
        assert_eq!(obj.class_id(), class.class_id());
        assert_ne!(obj.object_id(), class.object_id());
        assert_eq!(tagger.objects_tagged(), 2);
        Ok(())
    }

    #[test]
    fn test_concurrent_tags_are_unique() {
        let tagger = Arc::new(ObjectTagger::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tagger = tagger.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| tagger.tag_object(NetReference::NULL).map(|r| r.object_id()))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
