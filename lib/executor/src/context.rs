use std::{
    any::{Any, TypeId},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::{
    mapref::one::{Ref, RefMut},
    DashMap,
};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    request_id: u64,
    entries: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// Opaque, type-keyed state carried through every delegated call of one client request.
///
/// Cloning is cheap, all clones share the same entries.
#[derive(Clone)]
pub struct GatewayContext {
    inner: Arc<ContextInner>,
}

impl Default for GatewayContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("request_id", &self.inner.request_id)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

pub struct GatewayContextRefEntry<'a, T> {
    pub entry: Option<Ref<'a, TypeId, Box<dyn Any + Send + Sync>>>,
    phantom: std::marker::PhantomData<T>,
}

impl<'a, T: Any + Send + Sync> GatewayContextRefEntry<'a, T> {
    pub fn get_ref(&self) -> Option<&T> {
        self.entry.as_ref()?.value().downcast_ref::<T>()
    }
}

pub struct GatewayContextMutEntry<'a, T> {
    pub entry: Option<RefMut<'a, TypeId, Box<dyn Any + Send + Sync>>>,
    phantom: std::marker::PhantomData<T>,
}

impl<'a, T: Any + Send + Sync> GatewayContextMutEntry<'a, T> {
    pub fn get_ref_mut(&mut self) -> Option<&mut T> {
        self.entry.as_mut()?.value_mut().downcast_mut::<T>()
    }
}

impl GatewayContext {
    pub fn new() -> Self {
        GatewayContext {
            inner: Arc::new(ContextInner {
                request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
                entries: DashMap::new(),
            }),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.inner.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Option<Box<T>> {
        self.inner
            .entries
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|boxed_any| boxed_any.downcast::<T>().ok())
    }

    /// Returns a clone of the stored value, so no lock is held by the caller.
    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.get_ref_entry::<T>().get_ref().cloned()
    }

    pub fn get_ref_entry<T: Any + Send + Sync>(&self) -> GatewayContextRefEntry<'_, T> {
        GatewayContextRefEntry {
            entry: self.inner.entries.get(&TypeId::of::<T>()),
            phantom: std::marker::PhantomData,
        }
    }

    pub fn get_mut_entry<T: Any + Send + Sync>(&self) -> GatewayContextMutEntry<'_, T> {
        GatewayContextMutEntry {
            entry: self.inner.entries.get_mut(&TypeId::of::<T>()),
            phantom: std::marker::PhantomData,
        }
    }
}
