// Keeps guests from being reminded to RSVP too often.

use moka::future::Cache;
use std::time::Duration;

/// Remembers which guests were reminded recently, per wedding.
///
/// Entries expire after the cooldown, so a guest becomes eligible for the
/// next reminder run automatically. A zero cooldown disables the check.
#[derive(Clone)]
pub struct ReminderCooldown {
    cache: Option<Cache<String, ()>>,
}

impl ReminderCooldown {
    /// Creates a new `ReminderCooldown`.
    ///
    /// # Arguments
    /// * `ttl` - How long a reminded guest is left alone.
    /// * `max_capacity` - The maximum number of guests remembered.
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        if ttl.is_zero() {
            return Self { cache: None };
        }
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { cache: Some(cache) }
    }

    /// Returns `true` if the guest was reminded within the cooldown.
    pub async fn is_cooling_down(&self, wedding_id: &str, guest_id: &str) -> bool {
        match &self.cache {
            Some(cache) => cache.contains_key(&Self::key(wedding_id, guest_id)),
            None => false,
        }
    }

    /// Claims the guest for a reminder, returning `false` if another run
    /// already did so within the cooldown.
    ///
    /// The claim is atomic per key, so overlapping runs for the same wedding
    /// never remind a guest twice.
    pub async fn try_claim(&self, wedding_id: &str, guest_id: &str) -> bool {
        match &self.cache {
            Some(cache) => cache
                .entry(Self::key(wedding_id, guest_id))
                .or_insert(())
                .await
                .is_fresh(),
            None => true,
        }
    }

    /// Drops a claim whose reminder was not delivered.
    pub async fn release(&self, wedding_id: &str, guest_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&Self::key(wedding_id, guest_id)).await;
        }
    }

    fn key(wedding_id: &str, guest_id: &str) -> String {
        let data = format!("{}::{}::RSVP_REMINDER", wedding_id, guest_id);
        blake3::hash(data.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreminded_guest_is_not_cooling_down() {
        let cooldown = ReminderCooldown::new(Duration::from_secs(10), 100);
        assert!(!cooldown.is_cooling_down("w1", "g1").await);
    }

    #[tokio::test]
    async fn test_reminded_guest_is_cooling_down() {
        let cooldown = ReminderCooldown::new(Duration::from_secs(10), 100);
        assert!(cooldown.try_claim("w1", "g1").await);
        assert!(cooldown.is_cooling_down("w1", "g1").await);
    }

    #[tokio::test]
    async fn test_same_guest_id_in_other_wedding_is_independent() {
        let cooldown = ReminderCooldown::new(Duration::from_secs(10), 100);
        assert!(cooldown.try_claim("w1", "g1").await);
        assert!(!cooldown.is_cooling_down("w2", "g1").await);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cooldown = ReminderCooldown::new(Duration::from_millis(50), 100);
        assert!(cooldown.try_claim("w1", "g1").await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!cooldown.is_cooling_down("w1", "g1").await);
    }

    #[tokio::test]
    async fn test_zero_cooldown_disables_check() {
        let cooldown = ReminderCooldown::new(Duration::ZERO, 100);
        assert!(cooldown.try_claim("w1", "g1").await);
        assert!(!cooldown.is_cooling_down("w1", "g1").await);
    }

    #[tokio::test]
    async fn test_second_claim_is_refused() {
        let cooldown = ReminderCooldown::new(Duration::from_secs(10), 100);
        assert!(cooldown.try_claim("w1", "g1").await);
        assert!(!cooldown.try_claim("w1", "g1").await);
    }

    #[tokio::test]
    async fn test_released_claim_can_be_taken_again() {
        let cooldown = ReminderCooldown::new(Duration::from_secs(10), 100);
        assert!(cooldown.try_claim("w1", "g1").await);
        cooldown.release("w1", "g1").await;
        assert!(!cooldown.is_cooling_down("w1", "g1").await);
        assert!(cooldown.try_claim("w1", "g1").await);
    }
}
