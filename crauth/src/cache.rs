//! The shared token cache and refresh flag

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use arc_swap::ArcSwapOption;

use crate::TokenData;

/// Holds the most recent token and whether a background refresh is running
///
/// The token is only ever replaced as a whole, so a reader holding a
/// snapshot always sees a consistent, if possibly stale, value.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    token: ArcSwapOption<TokenData>,
    refreshing: Arc<AtomicBool>,
}

/// Marks a background refresh as running until dropped
#[derive(Debug)]
pub(crate) struct RefreshGuard {
    refreshing: Arc<AtomicBool>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.refreshing.store(false, Ordering::Release);
    }
}

impl TokenCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of the current token, if any
    pub(crate) fn snapshot(&self) -> Option<Arc<TokenData>> {
        self.token.load_full()
    }

    /// Replaces the current token
    pub(crate) fn install(&self, token: TokenData) -> Arc<TokenData> {
        let token = Arc::new(token);
        self.token.store(Some(Arc::clone(&token)));
        token
    }

    #[cfg(test)]
    pub(crate) fn clear(&self) {
        self.token.store(None);
    }

    /// Claims the right to run a background refresh
    ///
    /// Returns `None` if another refresh is already running.
    pub(crate) fn try_begin_refresh(&self) -> Option<RefreshGuard> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard {
                refreshing: Arc::clone(&self.refreshing),
            })
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }
}
