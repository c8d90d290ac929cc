//! Most viewed datasets, from the page-view tracking summary.

use std::sync::Arc;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::{ttl_from_secs, Clock, MostViewedConfig, PortalResult, TtlCache};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct MostViewed {
    pub(crate) url: String,
    pub(crate) running_total: i64,
    pub(crate) name: String,
    pub(crate) title: Option<String>,
}

// The dataset name is the last path segment of the tracked URL. `rtrim` with
// every non-slash character of the URL strips that segment, leaving its offset.
const MOST_VIEWED_SQL: &str = "
SELECT viewed.url, MAX(viewed.running_total) AS total, package.name, package.title
FROM (
    SELECT url,
           running_total,
           substr(url, length(rtrim(url, replace(url, '/', ''))) + 1) AS dataset_name
    FROM tracking_summary
    WHERE running_total > 0
      AND url LIKE '%/dataset/%'
      AND tracking_date = (SELECT MAX(tracking_date) FROM tracking_summary)
) AS viewed
JOIN package ON package.name = viewed.dataset_name
WHERE package.state = 'active'
GROUP BY package.name
ORDER BY total DESC, package.name ASC
LIMIT ?1
";

/// Most viewed datasets, busiest first. A limit of zero means no limit.
pub(crate) fn get_most_viewed(conn: &Connection, limit: Option<usize>) -> PortalResult<Vec<MostViewed>> {
    // SQLite treats a negative limit as no limit.
    let limit = limit
        .filter(|&n| n > 0)
        .map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let mut stmt = conn.prepare(MOST_VIEWED_SQL)?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(MostViewed {
            url: row.get(0)?,
            running_total: row.get(1)?,
            name: row.get(2)?,
            title: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Most-viewed lookups. The full ranking is cached once and cut to each
/// requested limit, unless caching is disabled.
pub(crate) struct MostViewedService {
    cache: Option<TtlCache<(), Vec<MostViewed>>>,
}

impl MostViewedService {
    pub(crate) fn new(config: &MostViewedConfig, clock: Arc<dyn Clock>) -> PortalResult<Self> {
        let cache = if config.cache_enabled {
            let ttl = ttl_from_secs(config.cache_secs)?;
            Some(TtlCache::new("most_viewed", ttl, clock))
        } else {
            None
        };
        Ok(Self { cache })
    }

    pub(crate) fn get(&self, conn: &Connection, limit: Option<usize>) -> PortalResult<Vec<MostViewed>> {
        let Some(cache) = &self.cache else {
            return get_most_viewed(conn, limit);
        };
        let mut rows = cache.get_or_try_insert_with(&(), || get_most_viewed(conn, None))?;
        if let Some(limit) = limit.filter(|&n| n > 0) {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
