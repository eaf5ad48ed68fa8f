// tests/rate_limiter.rs
use lead_ingest::http::{RateLimiterRegistry, TokenBucket};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn second_request_waits_for_refill() {
    // 1 token burst, 5 tokens/s => the second token is 200ms away.
    let bucket = TokenBucket::new("google_maps", 1, 5.0);
    let t0 = Instant::now();

    bucket.acquire(1).await.unwrap();
    assert_eq!(t0.elapsed(), Duration::ZERO);

    bucket.acquire(1).await.unwrap();
    let waited = t0.elapsed();
    assert!(
        waited >= Duration::from_millis(199) && waited <= Duration::from_millis(210),
        "waited {waited:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn tokens_stay_within_bounds() {
    let bucket = TokenBucket::new("yelp", 3, 10.0);
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(bucket.tokens() <= 3.0);

    let granted = (0..10).filter(|_| bucket.try_acquire(1)).count();
    assert_eq!(granted, 3);
    assert!(bucket.tokens() >= 0.0);
    assert_eq!(bucket.wait_time(1), Duration::from_millis(100));

    // More than the bucket can ever hold is refused, not waited on forever.
    assert!(bucket.acquire(4).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn concurrent_acquires_never_overdraw() {
    let bucket = Arc::new(TokenBucket::new("shared", 2, 10.0));
    let t0 = Instant::now();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let b = bucket.clone();
            tokio::spawn(async move { b.acquire(1).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    // Two from the burst, three more at 100ms each.
    let elapsed = t0.elapsed();
    assert!(
        elapsed >= Duration::from_millis(299) && elapsed < Duration::from_millis(400),
        "elapsed {elapsed:?}"
    );
    assert!(bucket.tokens() < 1.0);
}

#[test]
fn window_constructor_and_registry_sharing() {
    let b = TokenBucket::per_window("scrape", 1, Duration::from_secs(2));
    assert_eq!(b.capacity(), 1.0);
    assert!((b.refill_per_sec() - 0.5).abs() < 1e-9);

    let reg = RateLimiterRegistry::new();
    let a = reg.get_or_create("yelp", 5, Duration::from_secs(1));
    let again = reg.get_or_create("yelp", 99, Duration::from_secs(1));
    assert!(Arc::ptr_eq(&a, &again));
    assert_eq!(again.capacity(), 5.0);
    assert_eq!(reg.len(), 1);
    assert!(reg.get("google_maps").is_none());
}
