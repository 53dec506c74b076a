//! Faucet database for tracking drips and the token registry

use crate::error::{FaucetError, FaucetResult};
use crate::token::Token;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

/// Lifecycle of a drip record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DripStatus {
    /// Admitted; transaction not yet submitted or not yet included.
    Pending,
    /// Included and executed successfully.
    Completed,
    /// Never reached the network.
    Failed,
    /// Included but execution failed; gas was spent.
    Reverted,
}

impl DripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DripStatus::Pending => "pending",
            DripStatus::Completed => "completed",
            DripStatus::Failed => "failed",
            DripStatus::Reverted => "reverted",
        }
    }
}

impl fmt::Display for DripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One admitted drip request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DripRecord {
    pub id: u64,
    /// Lower-case `0x` address
    pub recipient: String,
    pub token_id: String,
    /// Human amount as configured on the token, e.g. "100"
    pub amount: String,
    pub tx_hash: Option<String>,
    pub source_ip: String,
    pub fingerprint: String,
    pub status: DripStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DripRecord {
    /// New pending record; the id is assigned by [`FaucetDatabase::create_drip`].
    pub fn pending(
        recipient: String,
        token_id: String,
        amount: String,
        source_ip: String,
        fingerprint: String,
    ) -> Self {
        Self {
            id: 0,
            recipient,
            token_id,
            amount,
            tx_hash: None,
            source_ip,
            fingerprint,
            status: DripStatus::Pending,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Faucet statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStatistics {
    /// Completed drips across all tokens
    pub total_drips: u64,
    /// Distinct recipients of completed drips
    pub total_users: u64,
    /// Completed drips per token id
    pub per_token: HashMap<String, u64>,
}

/// Faucet database
pub struct FaucetDatabase {
    db: Db,
    /// Drip records keyed by big-endian id
    drips: Tree,
    /// `{recipient}:{token}:` ++ id, for latest-drip lookups
    drips_by_recipient: Tree,
    /// Token registry keyed by token id
    tokens: Tree,
}

impl FaucetDatabase {
    /// Create or open faucet database
    pub fn new(path: &str) -> FaucetResult<Self> {
        info!("Opening faucet database at: {}", path);

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024)
            .open()?;

        Self::from_db(db)
    }

    /// In-memory database removed on drop. Used by tests.
    pub fn temporary() -> FaucetResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> FaucetResult<Self> {
        let drips = db.open_tree("drips")?;
        let drips_by_recipient = db.open_tree("drips_by_recipient")?;
        let tokens = db.open_tree("tokens")?;

        Ok(Self {
            db,
            drips,
            drips_by_recipient,
            tokens,
        })
    }

    /// Underlying sled handle, shared with the sled rate-limit store.
    pub fn db(&self) -> &Db {
        &self.db
    }

    // --- Token registry ---

    /// Insert tokens that are not present yet. Existing entries are kept
    /// untouched so operator edits survive restarts.
    pub fn seed_tokens(&self, tokens: &[Token]) -> FaucetResult<usize> {
        let mut seeded = 0;
        for token in tokens {
            let value = bincode::serialize(token)?;
            let result = self
                .tokens
                .compare_and_swap(token.id.as_bytes(), None as Option<&[u8]>, Some(value))?;
            if result.is_ok() {
                info!("Seeded token: {}", token.symbol);
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    pub fn upsert_token(&self, token: &Token) -> FaucetResult<()> {
        self.tokens.insert(token.id.as_bytes(), bincode::serialize(token)?)?;
        Ok(())
    }

    pub fn get_token(&self, id: &str) -> FaucetResult<Option<Token>> {
        match self.tokens.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_tokens(&self) -> FaucetResult<Vec<Token>> {
        let mut tokens = Vec::new();
        for item in self.tokens.iter() {
            let (_, value) = item?;
            tokens.push(bincode::deserialize::<Token>(&value)?);
        }
        Ok(tokens)
    }

    // --- Drip ledger ---

    /// Store a new record and return its id.
    pub fn create_drip(&self, mut record: DripRecord) -> FaucetResult<u64> {
        // sled ids start at 0; shift so 0 never names a stored record
        let id = self.db.generate_id()? + 1;
        record.id = id;

        self.drips.insert(id.to_be_bytes(), bincode::serialize(&record)?)?;
        self.drips_by_recipient
            .insert(recipient_key(&record.recipient, &record.token_id, id), Vec::<u8>::new())?;

        debug!("Created drip {} for {} ({})", id, record.recipient, record.token_id);
        Ok(id)
    }

    pub fn get_drip(&self, id: u64) -> FaucetResult<Option<DripRecord>> {
        match self.drips.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_drip<F>(&self, id: u64, update: F) -> FaucetResult<DripRecord>
    where
        F: FnOnce(&mut DripRecord),
    {
        let mut record = self
            .get_drip(id)?
            .ok_or_else(|| FaucetError::InternalError(format!("Drip {} not found", id)))?;
        update(&mut record);
        self.drips.insert(id.to_be_bytes(), bincode::serialize(&record)?)?;
        Ok(record)
    }

    /// The transaction reached the node; status stays pending.
    pub fn mark_submitted(&self, id: u64, tx_hash: &str) -> FaucetResult<()> {
        self.update_drip(id, |record| {
            record.tx_hash = Some(tx_hash.to_string());
            record.status = DripStatus::Pending;
        })?;
        Ok(())
    }

    /// The transaction could not be built or submitted.
    pub fn mark_failed(&self, id: u64, error: &str) -> FaucetResult<()> {
        self.update_drip(id, |record| {
            record.status = DripStatus::Failed;
            record.error = Some(error.to_string());
        })?;
        Ok(())
    }

    /// Terminal state reported by the confirmation watcher.
    pub fn complete_drip(
        &self,
        id: u64,
        status: DripStatus,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> FaucetResult<()> {
        self.update_drip(id, |record| {
            record.status = status;
            record.error = error;
            record.completed_at = Some(completed_at);
        })?;
        Ok(())
    }

    /// Most recent drip of `token_id` to `recipient`.
    pub fn latest_drip(&self, recipient: &str, token_id: &str) -> FaucetResult<Option<DripRecord>> {
        let prefix = recipient_prefix(recipient, token_id);
        match self.drips_by_recipient.scan_prefix(prefix.as_bytes()).next_back() {
            Some(item) => {
                let (key, _) = item?;
                let id_bytes: [u8; 8] = (&key[prefix.len()..])
                    .try_into()
                    .map_err(|_| FaucetError::InternalError("Invalid drip index key".to_string()))?;
                self.get_drip(u64::from_be_bytes(id_bytes))
            }
            None => Ok(None),
        }
    }

    /// Most recent records first.
    pub fn recent_drips(&self, limit: usize) -> FaucetResult<Vec<DripRecord>> {
        let mut records = Vec::with_capacity(limit);
        for item in self.drips.iter().rev().take(limit) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    /// Get statistics
    pub fn get_statistics(&self) -> FaucetResult<FaucetStatistics> {
        let mut total_drips = 0u64;
        let mut recipients = HashSet::new();
        let mut per_token: HashMap<String, u64> = HashMap::new();

        for item in self.drips.iter() {
            let (_, value) = item?;
            let record: DripRecord = bincode::deserialize(&value)?;
            if record.status != DripStatus::Completed {
                continue;
            }
            total_drips += 1;
            *per_token.entry(record.token_id).or_default() += 1;
            recipients.insert(record.recipient);
        }

        Ok(FaucetStatistics {
            total_drips,
            total_users: recipients.len() as u64,
            per_token,
        })
    }

    /// Remove records created more than `days` before `now`.
    pub fn cleanup_old_records(&self, now: DateTime<Utc>, days: i64) -> FaucetResult<usize> {
        let cutoff = now - Duration::days(days);
        let mut stale = Vec::new();

        for item in self.drips.iter() {
            let (key, value) = item?;
            let record: DripRecord = bincode::deserialize(&value)?;
            if record.created_at < cutoff {
                stale.push((key, record));
            }
        }

        for (key, record) in &stale {
            self.drips.remove(key)?;
            self.drips_by_recipient
                .remove(recipient_key(&record.recipient, &record.token_id, record.id))?;
        }

        info!("Cleaned up {} old records (older than {} days)", stale.len(), days);
        Ok(stale.len())
    }

    pub fn flush(&self) -> FaucetResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn recipient_prefix(recipient: &str, token_id: &str) -> String {
    format!("{}:{}:", recipient.to_lowercase(), token_id)
}

fn recipient_key(recipient: &str, token_id: &str, id: u64) -> Vec<u8> {
    let mut key = recipient_prefix(recipient, token_id).into_bytes();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::default_tokens;

    fn pending(recipient: &str, token: &str) -> DripRecord {
        DripRecord::pending(
            recipient.to_string(),
            token.to_string(),
            "100".to_string(),
            "10.0.0.1".to_string(),
            "fp-1".to_string(),
        )
    }

    #[test]
    fn test_seed_keeps_existing_tokens() {
        let db = FaucetDatabase::temporary().unwrap();
        let tokens = default_tokens();
        assert_eq!(db.seed_tokens(&tokens).unwrap(), tokens.len());

        let mut usdc = db.get_token("usdc").unwrap().unwrap();
        usdc.is_active = false;
        db.upsert_token(&usdc).unwrap();

        assert_eq!(db.seed_tokens(&tokens).unwrap(), 0);
        assert!(!db.get_token("usdc").unwrap().unwrap().is_active);
        assert_eq!(db.list_tokens().unwrap().len(), tokens.len());
    }

    #[test]
    fn test_drip_lifecycle() {
        let db = FaucetDatabase::temporary().unwrap();
        let id = db.create_drip(pending("0xabc", "eth")).unwrap();
        assert!(id > 0);

        let record = db.get_drip(id).unwrap().unwrap();
        assert_eq!(record.status, DripStatus::Pending);
        assert_eq!(record.tx_hash, None);

        db.mark_submitted(id, "0xfeed").unwrap();
        let completed_at = Utc::now();
        db.complete_drip(id, DripStatus::Completed, None, completed_at).unwrap();

        let record = db.get_drip(id).unwrap().unwrap();
        assert_eq!(record.tx_hash.as_deref(), Some("0xfeed"));
        assert_eq!(record.status, DripStatus::Completed);
        assert_eq!(record.completed_at, Some(completed_at));
    }

    #[test]
    fn test_mark_failed_keeps_error_text() {
        let db = FaucetDatabase::temporary().unwrap();
        let id = db.create_drip(pending("0xabc", "eth")).unwrap();
        db.mark_failed(id, "insufficient funds for gas").unwrap();

        let record = db.get_drip(id).unwrap().unwrap();
        assert_eq!(record.status, DripStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("insufficient funds for gas"));
        assert!(db.mark_failed(id + 100, "missing").is_err());
    }

    #[test]
    fn test_latest_drip_per_recipient_and_token() {
        let db = FaucetDatabase::temporary().unwrap();
        db.create_drip(pending("0xabc", "eth")).unwrap();
        let second = db.create_drip(pending("0xabc", "eth")).unwrap();
        let other_token = db.create_drip(pending("0xabc", "usdc")).unwrap();
        db.create_drip(pending("0xdef", "eth")).unwrap();

        assert_eq!(db.latest_drip("0xABC", "eth").unwrap().unwrap().id, second);
        assert_eq!(db.latest_drip("0xabc", "usdc").unwrap().unwrap().id, other_token);
        assert!(db.latest_drip("0xabc", "dai").unwrap().is_none());
    }

    #[test]
    fn test_statistics_count_completed_only() {
        let db = FaucetDatabase::temporary().unwrap();
        let a = db.create_drip(pending("0xaaa", "eth")).unwrap();
        let b = db.create_drip(pending("0xaaa", "usdc")).unwrap();
        let c = db.create_drip(pending("0xbbb", "usdc")).unwrap();
        db.create_drip(pending("0xccc", "usdc")).unwrap();

        for id in [a, b, c] {
            db.complete_drip(id, DripStatus::Completed, None, Utc::now()).unwrap();
        }

        let stats = db.get_statistics().unwrap();
        assert_eq!(stats.total_drips, 3);
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.per_token.get("usdc"), Some(&2));
        assert_eq!(stats.per_token.get("eth"), Some(&1));
    }

    #[test]
    fn test_cleanup_old_records() {
        let db = FaucetDatabase::temporary().unwrap();
        let mut old = pending("0xaaa", "eth");
        old.created_at = Utc::now() - Duration::days(45);
        db.create_drip(old).unwrap();
        let fresh = db.create_drip(pending("0xaaa", "eth")).unwrap();

        // Retention is measured from the supplied time
        assert_eq!(db.cleanup_old_records(Utc::now() - Duration::days(20), 30).unwrap(), 0);
        assert_eq!(db.cleanup_old_records(Utc::now(), 30).unwrap(), 1);
        assert_eq!(db.recent_drips(10).unwrap().len(), 1);
        assert_eq!(db.latest_drip("0xaaa", "eth").unwrap().unwrap().id, fresh);
    }
}
