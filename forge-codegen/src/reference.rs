//! Late-bound addresses: `RefSource`/`Reference` pairs, and the `Offset`
//! variant used for stack-relative fixups.
//!
//! Without a tracing garbage collector to maintain a weak set of
//! subscribers, each `Reference` is instead a `(source id, slot index)`
//! pair into a slot table owned by the source, with a generation counter
//! per slot so a stale `Reference` recognizes that its slot has been
//! recycled instead of observing an unrelated subscriber's address.
//!
//! A single `parking_lot::Mutex` per source serializes `set`/`steal`
//! against concurrent registration.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

struct ContentInner {
    address: usize,
    size: usize,
    /// The `RefSource` this content is currently attached to, if any. Set by
    /// `RefSource::set` when the content is handed to a source; consulted by
    /// `Content::set` to drive the broadcast without going through the
    /// source at all.
    owner: Option<Weak<SourceInner>>,
}

/// An `(address, size)` pair, at most attached to one `RefSource` at a time.
/// A cheaply-cloned handle: clones share the same backing state, so setting
/// the address through any clone is visible through every other and (once
/// attached) notifies the owning source's subscribers.
#[derive(Clone)]
pub struct Content {
    inner: Arc<Mutex<ContentInner>>,
}

impl Content {
    pub fn new() -> Self {
        Content {
            inner: Arc::new(Mutex::new(ContentInner {
                address: 0,
                size: 0,
                owner: None,
            })),
        }
    }

    pub fn address(&self) -> usize {
        self.inner.lock().address
    }

    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// Set this content's address/size. Don't do this before the content has
    /// been attached to a `RefSource` if the update is meant to be observed;
    /// once attached, this notifies every reference tracking the owning
    /// source.
    pub fn set(&self, address: usize, size: usize) {
        let owner = {
            let mut inner = self.inner.lock();
            inner.address = address;
            inner.size = size;
            inner.owner.clone()
        };
        if let Some(actual) = owner.and_then(|w| w.upgrade()) {
            actual.notify(address);
        }
    }

    fn attach(&self, owner: Weak<SourceInner>) {
        self.inner.lock().owner = Some(owner);
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::new()
    }
}

struct Slot {
    generation: AtomicU64,
    callback: Mutex<Option<Box<dyn Fn(usize) + Send + Sync>>>,
}

struct SourceInner {
    content: Mutex<Content>,
    slots: Mutex<Vec<Arc<Slot>>>,
    /// Set by `steal`: once non-empty, lookups chase here instead. Mirrors
    /// `RefSource::findActual`.
    forward: Mutex<Option<Arc<SourceInner>>>,
}

impl SourceInner {
    /// Tell every live subscriber slot the new address. Called by `Content`
    /// (once attached) and by `RefSource::set`/`steal`.
    fn notify(&self, address: usize) {
        let slots = self.slots.lock();
        for slot in slots.iter() {
            if let Some(cb) = slot.callback.lock().as_ref() {
                cb(address);
            }
        }
    }
}

/// A static name that `Reference`s refer to; its `Content` (the actual
/// address) can be replaced at any time, propagating the update to every
/// subscriber.
#[derive(Clone)]
pub struct RefSource {
    inner: Arc<SourceInner>,
    title: Arc<str>,
}

impl RefSource {
    pub fn new(title: impl Into<Arc<str>>) -> Self {
        let source = RefSource {
            inner: Arc::new(SourceInner {
                content: Mutex::new(Content::default()),
                slots: Mutex::new(Vec::new()),
                forward: Mutex::new(None),
            }),
            title: title.into(),
        };
        source.inner.content.lock().attach(Arc::downgrade(&source.inner));
        source
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    fn actual(&self) -> Arc<SourceInner> {
        let mut cur = self.inner.clone();
        loop {
            let next = cur.forward.lock().clone();
            match next {
                Some(n) => cur = n,
                None => return cur,
            }
        }
    }

    /// Attach `content` to this source, replacing whichever content was
    /// previously attached, and notify every live reference of its address.
    pub fn set(&self, content: Content) {
        let actual = self.actual();
        content.attach(Arc::downgrade(&actual));
        let address = content.address();
        *actual.content.lock() = content;
        actual.notify(address);
    }

    pub fn content(&self) -> Content {
        self.actual().content.lock().clone()
    }

    pub fn address(&self) -> usize {
        self.content().address()
    }

    /// Re-parent every reference currently pointing at `from` onto `self`,
    /// and leave a forwarding pointer in `from` so that references created
    /// against `from` before this call but read after it still resolve
    /// through `self`.
    pub fn steal(&self, from: &RefSource) {
        let from_actual = from.actual();
        let to_actual = self.actual();
        if Arc::ptr_eq(&from_actual, &to_actual) {
            return;
        }
        log::trace!("reference: stealing subscribers between sources");
        let moved: Vec<Arc<Slot>> = {
            let mut from_slots = from_actual.slots.lock();
            core::mem::take(&mut *from_slots)
        };
        let new_address = to_actual.content.lock().address();
        {
            let mut to_slots = to_actual.slots.lock();
            to_slots.extend(moved.iter().cloned());
        }
        for slot in &moved {
            if let Some(cb) = slot.callback.lock().as_ref() {
                cb(new_address);
            }
        }
        *from_actual.forward.lock() = Some(to_actual);
    }

    /// Register a new `Reference` that tracks this source, with the
    /// initial address snapshotted immediately.
    pub fn add_ref(&self) -> Reference {
        let actual = self.actual();
        let slot = Arc::new(Slot {
            generation: AtomicU64::new(0),
            callback: Mutex::new(None),
        });
        let address = Arc::new(AtomicUsize::new(actual.content.lock().address()));
        {
            let address = address.clone();
            *slot.callback.lock() = Some(Box::new(move |addr| {
                address.store(addr, Ordering::SeqCst);
            }));
        }
        actual.slots.lock().push(slot.clone());
        Reference {
            source: Arc::downgrade(&actual),
            address,
        }
    }
}

/// A subscriber to a `RefSource`'s address. Reads are lock-free; the source
/// notifies the reference's stored address on every `set`/`steal`.
#[derive(Clone)]
pub struct Reference {
    source: Weak<SourceInner>,
    address: Arc<AtomicUsize>,
}

impl Reference {
    pub fn address(&self) -> usize {
        self.address.load(Ordering::SeqCst)
    }

    /// Whether the backing `RefSource` is still alive.
    pub fn is_live(&self) -> bool {
        self.source.strong_count() > 0
    }
}

/// Carries a stack/frame `Offset` rather than an address, and may be left
/// unresolved (treated as zero) -- used for EH slot offsets computed before
/// the frame layout pass has run.
#[derive(Clone)]
pub struct OffsetSource {
    value: Arc<Mutex<Option<crate::size::Offset>>>,
    subs: Arc<Mutex<Vec<Arc<AtomicI64Pair>>>>,
}

/// `Offset` stored as two atomics since `Offset` itself isn't lock-free.
struct AtomicI64Pair {
    off32: std::sync::atomic::AtomicI32,
    off64: std::sync::atomic::AtomicI64,
}

impl OffsetSource {
    pub fn new() -> Self {
        OffsetSource {
            value: Arc::new(Mutex::new(None)),
            subs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set(&self, offset: crate::size::Offset) {
        *self.value.lock() = Some(offset);
        for s in self.subs.lock().iter() {
            s.off32.store(offset.offset32(), Ordering::SeqCst);
            s.off64.store(offset.offset64(), Ordering::SeqCst);
        }
    }

    pub fn add_ref(&self) -> OffsetReference {
        let cur: crate::size::Offset = self.value.lock().unwrap_or_default();
        let pair = Arc::new(AtomicI64Pair {
            off32: std::sync::atomic::AtomicI32::new(cur.offset32()),
            off64: std::sync::atomic::AtomicI64::new(cur.offset64()),
        });
        self.subs.lock().push(pair.clone());
        OffsetReference { pair }
    }
}

impl Default for OffsetSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber to an `OffsetSource`. Unresolved sources report a zero
/// offset.
#[derive(Clone)]
pub struct OffsetReference {
    pair: Arc<AtomicI64Pair>,
}

impl OffsetReference {
    pub fn offset(&self) -> crate::size::Offset {
        crate::size::Offset::new(
            self.pair.off32.load(Ordering::SeqCst),
            self.pair.off64.load(Ordering::SeqCst),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagation_reaches_existing_ref() {
        let source = RefSource::new("a");
        let r = source.add_ref();
        let content1 = source.content();
        content1.set(0x1000, 8);
        assert_eq!(r.address(), 0x1000);
    }

    #[test]
    fn fresh_content_can_be_attached_via_set() {
        let source = RefSource::new("a");
        let r = source.add_ref();
        let content = Content::new();
        source.set(content.clone());
        content.set(0x4000, 8);
        assert_eq!(r.address(), 0x4000);
    }

    #[test]
    fn steal_reparents_and_notifies() {
        let a = RefSource::new("A");
        let b = RefSource::new("B");
        a.content().set(0x1000, 8);
        b.content().set(0x2000, 8);
        let r = a.add_ref();
        assert_eq!(r.address(), 0x1000);

        b.steal(&a);
        assert_eq!(r.address(), 0x2000);

        // A later update on `b` still reaches the stolen reference.
        b.content().set(0x3000, 8);
        assert_eq!(r.address(), 0x3000);
    }

    #[test]
    fn offset_source_defaults_to_zero() {
        let src = OffsetSource::new();
        let r = src.add_ref();
        assert_eq!(r.offset().offset64(), 0);
        src.set(crate::size::Offset::new(4, 8));
        assert_eq!(r.offset().offset64(), 8);
    }
}
