use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use tracing::debug;

use crate::cache::Cache;
use crate::datamall::client::{DataMallClient, UpstreamError};
use crate::models::ServiceArrival;

/// Arrival lookups that go through a short-lived cache before the
/// upstream API, so hot stops are not fetched on every request.
pub struct ArrivalService {
    client: DataMallClient,
    cache: Cache<String, Vec<ServiceArrival>>,
}

impl ArrivalService {
    pub fn new(client: DataMallClient, ttl: Duration, item_limit: NonZeroUsize) -> Self {
        ArrivalService {
            client,
            cache: Cache::new(ttl, item_limit),
        }
    }

    pub fn client(&self) -> &DataMallClient {
        &self.client
    }

    pub fn cache(&self) -> &Cache<String, Vec<ServiceArrival>> {
        &self.cache
    }

    /// Arrivals at `stop_code`, from cache when fresh.
    ///
    /// Upstream failures are returned and not cached.
    pub async fn arrivals(&self, stop_code: &str) -> Result<Vec<ServiceArrival>, UpstreamError> {
        cached_or_fetch(&self.cache, stop_code, || self.client.fetch_arrivals(stop_code)).await
    }
}

/// Return the cached value for `key`, or run `fetch` and cache its success.
async fn cached_or_fetch<V, F, Fut, E>(cache: &Cache<String, V>, key: &str, fetch: F) -> Result<V, E>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    let key = key.to_string();
    if let Some(hit) = cache.get(&key) {
        debug!("[CACHE] Hit for {}", key);
        return Ok(hit);
    }
    let value = fetch().await?;
    cache.set(key, value.clone());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn arrival(service: &str) -> ServiceArrival {
        ServiceArrival {
            service_number: service.to_string(),
            operator: "SBST".to_string(),
            next_bus: Default::default(),
            next_bus2: Default::default(),
            next_bus3: Default::default(),
        }
    }

    fn test_cache() -> Cache<String, Vec<ServiceArrival>> {
        Cache::new(Duration::from_secs(20), NonZeroUsize::new(100).unwrap())
    }

    #[tokio::test]
    async fn test_second_lookup_served_from_cache() {
        let cache = test_cache();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, UpstreamError>(vec![arrival("67")])
        };

        let first = cached_or_fetch(&cache, "44009", fetch).await.unwrap();
        let second = cached_or_fetch(&cache, "44009", fetch).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_result_is_cached() {
        let cache = test_cache();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Vec<ServiceArrival>, UpstreamError>(Vec::new())
        };
        assert!(cached_or_fetch(&cache, "44009", fetch).await.unwrap().is_empty());
        assert!(cached_or_fetch(&cache, "44009", fetch).await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let cache = test_cache();
        let err = cached_or_fetch(&cache, "44009", || async {
            Err::<Vec<ServiceArrival>, _>(UpstreamError::Status(503))
        })
        .await
        .unwrap_err();
        assert_eq!(err, UpstreamError::Status(503));
        assert!(cache.is_empty());

        let ok = cached_or_fetch(&cache, "44009", || async {
            Ok::<_, UpstreamError>(vec![arrival("171")])
        })
        .await
        .unwrap();
        assert_eq!(ok[0].service_number, "171");
    }

    #[tokio::test]
    async fn test_service_uses_configured_cache() {
        let client = DataMallClient::new("key").unwrap();
        let service = ArrivalService::new(client, Duration::from_secs(5), NonZeroUsize::new(3).unwrap());
        assert_eq!(service.cache().capacity(), 3);
        assert_eq!(service.cache().ttl(), Duration::from_secs(5));
        service.cache().set("44009".to_string(), vec![arrival("67")]);
        // Served from cache without touching the network
        let hit = service.arrivals("44009").await.unwrap();
        assert_eq!(hit[0].service_number, "67");
    }
}
