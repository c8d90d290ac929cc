//! Short-lived, process-local caches.
//!
//! Each cache is an explicit object owned by whoever serves the data (the HTTP
//! server state, mostly). Time comes from an injected [`Clock`] so expiry can be
//! driven by tests without sleeping.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};

pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[allow(dead_code)]
#[derive(Debug)]
pub(crate) struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

#[allow(dead_code)]
impl FakeClock {
    pub(crate) fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub(crate) fn advance(&self, delta: TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            *now += delta;
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

pub(crate) struct TtlCache<K, V> {
    name: &'static str,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(name: &'static str, ttl: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, computing and storing it when absent
    /// or expired. A broken cache never fails the caller: the value is computed
    /// directly instead.
    pub(crate) fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let now = self.clock.now();
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(cache = self.name, error = %err, "Couldn't use the cache");
                return compute();
            }
        };

        if let Some(entry) = entries.get(key) {
            if now < entry.expires_at {
                return Ok(entry.value.clone());
            }
        }

        let value = compute()?;
        entries.retain(|_, entry| now < entry.expires_at);
        entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                expires_at: now
                    .checked_add_signed(self.ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub(crate) fn clear(&self) {
        match self.entries.lock() {
            Ok(mut entries) => entries.clear(),
            Err(err) => {
                tracing::error!(cache = self.name, error = %err, "Couldn't clear the cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2013-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn value_is_reused_until_expiry() {
        let clock = Arc::new(FakeClock::new(start()));
        let cache: TtlCache<(), u32> =
            TtlCache::new("test", TimeDelta::minutes(5), clock.clone());
        let calls = Cell::new(0);
        let compute = || -> Result<u32, ()> {
            calls.set(calls.get() + 1);
            Ok(calls.get())
        };

        assert_eq!(cache.get_or_try_insert_with(&(), compute), Ok(1));
        clock.advance(TimeDelta::minutes(4));
        assert_eq!(cache.get_or_try_insert_with(&(), compute), Ok(1));
        clock.advance(TimeDelta::minutes(1));
        assert_eq!(cache.get_or_try_insert_with(&(), compute), Ok(2));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn clear_forces_recompute() {
        let clock = Arc::new(FakeClock::new(start()));
        let cache: TtlCache<&'static str, String> =
            TtlCache::new("test", TimeDelta::minutes(5), clock);

        let first = cache.get_or_try_insert_with(&"all", || Ok::<_, ()>("old".to_string()));
        assert_eq!(first.unwrap(), "old");
        cache.clear();
        let second = cache.get_or_try_insert_with(&"all", || Ok::<_, ()>("new".to_string()));
        assert_eq!(second.unwrap(), "new");
    }

    #[test]
    fn errors_are_not_cached() {
        let clock = Arc::new(FakeClock::new(start()));
        let cache: TtlCache<u8, u8> = TtlCache::new("test", TimeDelta::minutes(5), clock);

        assert_eq!(cache.get_or_try_insert_with(&1, || Err("boom")), Err("boom"));
        assert_eq!(cache.get_or_try_insert_with(&1, || Ok::<_, &str>(7)), Ok(7));
    }

    #[test]
    fn keys_are_independent() {
        let clock = Arc::new(FakeClock::new(start()));
        let cache: TtlCache<Option<usize>, usize> =
            TtlCache::new("test", TimeDelta::minutes(5), clock);

        assert_eq!(cache.get_or_try_insert_with(&Some(2), || Ok::<_, ()>(2)), Ok(2));
        assert_eq!(cache.get_or_try_insert_with(&None, || Ok::<_, ()>(10)), Ok(10));
        assert_eq!(cache.get_or_try_insert_with(&Some(2), || Ok::<_, ()>(99)), Ok(2));
    }

    #[test]
    fn expired_entries_are_dropped_on_insert() {
        let clock = Arc::new(FakeClock::new(start()));
        let cache: TtlCache<u32, u32> = TtlCache::new("test", TimeDelta::minutes(5), clock.clone());

        for key in 0..100 {
            cache.get_or_try_insert_with(&key, || Ok::<_, ()>(key)).unwrap();
        }
        assert_eq!(cache.len(), 100);

        clock.advance(TimeDelta::hours(1));
        cache.get_or_try_insert_with(&1000, || Ok::<_, ()>(0)).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn huge_ttl_never_expires() {
        let clock = Arc::new(FakeClock::new(start()));
        let cache: TtlCache<(), u8> = TtlCache::new("test", TimeDelta::MAX, clock.clone());

        assert_eq!(cache.get_or_try_insert_with(&(), || Ok::<_, ()>(1)), Ok(1));
        clock.advance(TimeDelta::days(365));
        assert_eq!(cache.get_or_try_insert_with(&(), || Ok::<_, ()>(2)), Ok(1));
    }
}
