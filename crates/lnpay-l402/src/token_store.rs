use dashmap::DashMap;
use std::sync::{Mutex, MutexGuard};

use crate::challenge::Challenge;
use crate::error::StoreError;
use crate::types::PaymentHash;

/// A stored challenge and its settlement state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChallenge {
    pub challenge: Challenge,
    pub settled: bool,
    pub redeemed: bool,
}

/// Durable state of issued challenges, keyed by payment hash.
///
/// Implementations must be thread-safe and linearizable per key: concurrent
/// readers of one hash observe a single settlement history.
pub trait TokenStore: Send + Sync {
    /// Record a new challenge. Re-putting an existing hash keeps its
    /// settlement state.
    fn put(&self, challenge: &Challenge) -> Result<(), StoreError>;

    fn get(&self, hash: &PaymentHash) -> Result<Option<StoredChallenge>, StoreError>;

    /// `false` for unknown hashes.
    fn is_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError>;

    /// Mark a known challenge settled. Returns `false` if the hash is unknown.
    fn mark_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError>;

    /// Atomically redeem a settled, not yet redeemed challenge.
    /// Returns `true` only for the first successful redemption.
    fn try_redeem(&self, hash: &PaymentHash) -> Result<bool, StoreError>;

    fn delete(&self, hash: &PaymentHash) -> Result<(), StoreError>;

    /// Drop challenges whose `expires_at <= now`. Returns number purged.
    fn purge_expired(&self, now: u64) -> Result<usize, StoreError>;
}

/// In-memory store backed by DashMap. Fast but lost on restart.
#[derive(Default)]
pub struct InMemoryTokenStore {
    challenges: DashMap<PaymentHash, StoredChallenge>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.challenges.entry(challenge.payment_hash) {
            Entry::Occupied(mut o) => o.get_mut().challenge = challenge.clone(),
            Entry::Vacant(v) => {
                v.insert(StoredChallenge {
                    challenge: challenge.clone(),
                    settled: false,
                    redeemed: false,
                });
            }
        }
        Ok(())
    }

    fn get(&self, hash: &PaymentHash) -> Result<Option<StoredChallenge>, StoreError> {
        Ok(self.challenges.get(hash).map(|c| c.clone()))
    }

    fn is_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        Ok(self.challenges.get(hash).is_some_and(|c| c.settled))
    }

    fn mark_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        Ok(match self.challenges.get_mut(hash) {
            Some(mut c) => {
                c.settled = true;
                true
            }
            None => false,
        })
    }

    fn try_redeem(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        // get_mut holds the shard write lock, making check-and-set atomic
        Ok(match self.challenges.get_mut(hash) {
            Some(mut c) if c.settled && !c.redeemed => {
                c.redeemed = true;
                true
            }
            _ => false,
        })
    }

    fn delete(&self, hash: &PaymentHash) -> Result<(), StoreError> {
        self.challenges.remove(hash);
        Ok(())
    }

    fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        let before = self.challenges.len();
        self.challenges
            .retain(|_, stored| !stored.challenge.is_expired(now));
        Ok(before.saturating_sub(self.challenges.len()))
    }
}

/// Persistent store backed by SQLite. Survives restarts.
pub struct SqliteTokenStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteTokenStore {
    /// Open (or create) a challenge database at `path`.
    ///
    /// On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS challenges (
                payment_hash BLOB PRIMARY KEY,
                challenge TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                settled INTEGER NOT NULL DEFAULT 0,
                redeemed INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_challenges_expires_at ON challenges(expires_at);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set token database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("token store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Expiry timestamps beyond i64 are clamped; they never expire in practice.
fn sql_time(t: u64) -> i64 {
    i64::try_from(t).unwrap_or(i64::MAX)
}

impl TokenStore for SqliteTokenStore {
    fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(challenge).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.conn().execute(
            "INSERT INTO challenges (payment_hash, challenge, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(payment_hash) DO UPDATE SET
                challenge = excluded.challenge,
                expires_at = excluded.expires_at",
            rusqlite::params![
                challenge.payment_hash.as_bytes().as_slice(),
                json,
                sql_time(challenge.expires_at)
            ],
        )?;
        Ok(())
    }

    fn get(&self, hash: &PaymentHash) -> Result<Option<StoredChallenge>, StoreError> {
        let conn = self.conn();
        let row = conn.query_row(
            "SELECT challenge, settled, redeemed FROM challenges WHERE payment_hash = ?1",
            [hash.as_bytes().as_slice()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        );
        let (json, settled, redeemed) = match row {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let challenge =
            serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Some(StoredChallenge {
            challenge,
            settled,
            redeemed,
        }))
    }

    fn is_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        let settled: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM challenges WHERE payment_hash = ?1 AND settled = 1",
            [hash.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(settled > 0)
    }

    fn mark_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "UPDATE challenges SET settled = 1 WHERE payment_hash = ?1",
            [hash.as_bytes().as_slice()],
        )?;
        Ok(changed > 0)
    }

    fn try_redeem(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        // Single conditional UPDATE: atomic at the database level
        let changed = self.conn().execute(
            "UPDATE challenges SET redeemed = 1
             WHERE payment_hash = ?1 AND settled = 1 AND redeemed = 0",
            [hash.as_bytes().as_slice()],
        )?;
        Ok(changed == 1)
    }

    fn delete(&self, hash: &PaymentHash) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM challenges WHERE payment_hash = ?1",
            [hash.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        Ok(self.conn().execute(
            "DELETE FROM challenges WHERE expires_at <= ?1",
            rusqlite::params![sql_time(now)],
        )?)
    }
}
