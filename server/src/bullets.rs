//! Bullet ownership ledger used to attribute `DAMAGE` reports to a shooter.

use shared::BulletOwner;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BulletRecord {
    pub owner_id: String,
    pub fired_at: Instant,
}

#[derive(Debug, Default)]
pub struct BulletLedger {
    records: HashMap<String, BulletRecord>,
}

impl BulletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a bullet id of the form `<owner>_<unix millis>` and records its owner.
    ///
    /// Two shots by the same owner within one millisecond get consecutive
    /// stamps so ids stay unique.
    pub fn mint(&mut self, owner_id: &str, now_millis: u64) -> String {
        let mut stamp = now_millis;
        let mut bullet_id = format!("{}_{}", owner_id, stamp);
        while self.records.contains_key(&bullet_id) {
            stamp += 1;
            bullet_id = format!("{}_{}", owner_id, stamp);
        }

        self.records.insert(
            bullet_id.clone(),
            BulletRecord {
                owner_id: owner_id.to_string(),
                fired_at: Instant::now(),
            },
        );
        bullet_id
    }

    pub fn owner_of(&self, bullet_id: &str) -> Option<&str> {
        self.records.get(bullet_id).map(|r| r.owner_id.as_str())
    }

    /// Removes a bullet once its hit has been credited.
    pub fn claim(&mut self, bullet_id: &str) -> Option<BulletRecord> {
        self.records.remove(bullet_id)
    }

    /// Drops records older than `ttl`, returning how many were removed.
    pub fn evict_older_than(&mut self, ttl: Duration) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.fired_at.elapsed() <= ttl);
        before - self.records.len()
    }

    pub fn snapshot(&self) -> BTreeMap<String, BulletOwner> {
        self.records
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    BulletOwner {
                        owner_id: record.owner_id.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
