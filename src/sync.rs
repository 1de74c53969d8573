//! The text lock.
//!
//! Serializes every write into a physical page of kernel text. It is taken once per
//! page and dropped between pages, so a patch that spans pages is a sequence of
//! independent writes: nobody may assume it lands atomically.

use spin::Mutex;

static TEXT_MUTEX: Mutex<()> = Mutex::new(());

/// Runs `f` with the text lock held.
#[inline]
pub fn with_text_lock<T, F>(f: F) -> T
where
    F: FnOnce() -> T,
{
    let _guard = TEXT_MUTEX.lock();
    #[cfg(test)]
    let _held = held::Held::enter();
    f()
}

/// Whether someone currently holds the text lock.
pub fn text_locked() -> bool {
    TEXT_MUTEX.is_locked()
}
