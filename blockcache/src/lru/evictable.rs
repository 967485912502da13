/// Hooks a cached value may implement to observe its own removal from an
/// [`LruCache`](super::LruCache).
///
/// Both hooks are invoked exactly once per removal, whether the removal was explicit, caused by
/// capacity pressure, by replacement through `put` or by `clear`.
pub trait EvictionListener {
    /// Called synchronously while the entry is being unlinked, with the cache lock held.
    ///
    /// Implementations must not call back into the cache that removes them.
    fn on_before_remove(&self) {}

    /// Called after the removal completed and the cache lock was released.
    fn on_after_remove(&self) {}
}

/// A cached value together with the removal hooks it opted into.
///
/// The capability is decided once, at construction: [`Evictable::new`] wraps a value without
/// hooks, [`Evictable::listening`] wires up the value's [`EvictionListener`] implementation.
pub struct Evictable<V> {
    value: V,
    before_remove: Option<fn(&V)>,
    after_remove: Option<fn(&V)>,
}

impl<V> Evictable<V> {
    /// Wrap a value which is not interested in its removal.
    pub fn new(value: V) -> Self {
        Evictable {
            value,
            before_remove: None,
            after_remove: None,
        }
    }

    /// Wrap a value whose [`EvictionListener`] hooks fire on removal.
    pub fn listening(value: V) -> Self
    where
        V: EvictionListener,
    {
        Evictable {
            value,
            before_remove: Some(<V as EvictionListener>::on_before_remove),
            after_remove: Some(<V as EvictionListener>::on_after_remove),
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn is_listening(&self) -> bool {
        self.before_remove.is_some() || self.after_remove.is_some()
    }

    pub(super) fn fire_before_remove(&self) {
        if let Some(hook) = self.before_remove {
            hook(&self.value)
        }
    }

    pub(super) fn fire_after_remove(&self) {
        if let Some(hook) = self.after_remove {
            hook(&self.value)
        }
    }
}

impl<V> From<V> for Evictable<V> {
    fn from(value: V) -> Self {
        Evictable::new(value)
    }
}
