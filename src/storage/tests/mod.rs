// src/storage/tests/mod.rs


// Common utilities for storage tests
pub(crate) mod common {
    use std::time::Duration;
    use tokio::time;

    use crate::error::Result;
    use crate::storage::StorageBackend;

    // Test basic storage operations that should work on any backend
    pub async fn test_basic_operations<S: StorageBackend>(storage: &S) -> Result<()> {
        let key = "test_basic_key";
        let ttl = Duration::from_secs(60);

        assert_eq!(storage.get(key).await?, None);

        storage.put(key, "first", ttl).await?;
        assert_eq!(storage.get(key).await?.as_deref(), Some("first"));

        // Overwrite
        storage.put(key, "second", ttl).await?;
        assert_eq!(storage.get(key).await?.as_deref(), Some("second"));

        assert!(storage.delete(key).await?);
        assert_eq!(storage.get(key).await?, None);

        // Deleting again is not an error
        assert!(!storage.delete(key).await?);

        Ok(())
    }

    // Test expiration; `ttl` must suit the backend's resolution
    pub async fn test_key_expiration<S: StorageBackend>(storage: &S, ttl: Duration) -> Result<()> {
        let key = "test_expiry_key";

        storage.put(key, "expiring_value", ttl).await?;
        assert!(storage.get(key).await?.is_some());

        time::sleep(ttl + ttl / 2).await;

        assert_eq!(storage.get(key).await?, None);

        Ok(())
    }
}
