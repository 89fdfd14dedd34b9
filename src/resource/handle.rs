use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Identity of a [`Handle`]. Two handles are equal if and only if their ids are equal.
pub type HandleId = usize;

/**
 * Shared, reference-counted ownership of a resource.
 * Equality and hashing use identity, never the value of the resource.
 */
pub struct Handle<A> {
    slot: Arc<RwLock<A>>,
}

impl<A> Handle<A> {

    pub fn new(value: A) -> Self {
        Self { slot: Arc::new(RwLock::new(value)) }
    }

    pub fn id(&self) -> HandleId {
        Arc::as_ptr(&self.slot) as *const () as HandleId
    }

    /// Gets underlying resource with read-only access.
    pub fn read(&self) -> RwLockReadGuard<'_, A> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets underlying resource with read and write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, A> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-owning reference to the same resource.
    pub fn downgrade(&self) -> WeakHandle<A> {
        WeakHandle {
            id: self.id(),
            slot: Arc::downgrade(&self.slot),
        }
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }
}

impl<A> Clone for Handle<A> {
    fn clone(&self) -> Self {
        Self { slot: self.slot.clone() }
    }
}

impl<A> PartialEq for Handle<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<A> Eq for Handle<A> {}

impl<A> std::hash::Hash for Handle<A> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<A> fmt::Debug for Handle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.id())
    }
}

/**
 * Non-owning reference to a resource.
 * Upgrading fails once every [`Handle`] to the resource has been dropped.
 */
pub struct WeakHandle<A> {
    id: HandleId,
    slot: Weak<RwLock<A>>,
}

impl<A> WeakHandle<A> {

    pub fn upgrade(&self) -> Option<Handle<A>> {
        self.slot.upgrade().map(|slot| Handle { slot })
    }

    pub fn is_alive(&self) -> bool {
        self.slot.strong_count() > 0
    }

    /// Id of the handle this was downgraded from. Stays the same after the resource expires.
    pub fn id(&self) -> HandleId {
        self.id
    }
}

impl<A> Clone for WeakHandle<A> {
    fn clone(&self) -> Self {
        Self { id: self.id, slot: self.slot.clone() }
    }
}

impl<A> fmt::Debug for WeakHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakHandle({:#x}, alive: {})", self.id, self.is_alive())
    }
}

#[cfg(test)]
mod test {
    use crate::Handle;

    #[test]
    fn identity_equality() {
        let a = Handle::new(5);
        let b = Handle::new(5);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn weak_expires() {
        let a = Handle::new(String::from("shader"));
        let weak = a.downgrade();
        assert!(weak.is_alive());
        assert_eq!(Some(a.clone()), weak.upgrade());
        drop(a);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
