/// Message persistence: raw message records stored in sled DB, keyed by id
use crate::error::{InboxError, Result};
use crate::message::Message;
use std::path::Path;
use tracing::debug;

pub struct MessageStore {
    db: sled::Db,
}

impl MessageStore {
    /// Create message store
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("messages.db");
        let db = sled::open(&db_path)
            .map_err(|e| InboxError::Storage(format!("Failed to open messages DB: {}", e)))?;

        Ok(Self { db })
    }

    /// Insert or replace a message
    pub fn save(&self, msg: &Message) -> Result<()> {
        let value = serde_json::to_vec(msg).map_err(InboxError::Serialization)?;

        self.db
            .insert(msg.id.as_bytes(), value)
            .map_err(|e| InboxError::Storage(format!("Failed to save message: {}", e)))?;

        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Message>> {
        match self
            .db
            .get(id.as_bytes())
            .map_err(|e| InboxError::Storage(format!("get message: {}", e)))?
        {
            Some(val) => Ok(Some(serde_json::from_slice(&val).map_err(InboxError::Serialization)?)),
            None => Ok(None),
        }
    }

    /// All stored messages in key order; undecodable records are skipped
    pub fn list(&self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        for entry in self.db.iter() {
            let (key, value) = entry
                .map_err(|e| InboxError::Storage(format!("Failed to read messages: {}", e)))?;
            match serde_json::from_slice::<Message>(&value) {
                Ok(msg) => messages.push(msg),
                Err(e) => debug!("Skipping undecodable record {:?}: {}", String::from_utf8_lossy(&key), e),
            }
        }

        Ok(messages)
    }

    /// Remove every message tied to `group_id`, returning how many went
    pub fn delete_group(&self, group_id: &str) -> Result<usize> {
        let doomed: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|m| m.group_id.as_deref() == Some(group_id))
            .map(|m| m.id)
            .collect();

        for id in &doomed {
            self.db
                .remove(id.as_bytes())
                .map_err(|e| InboxError::Storage(format!("Failed to delete message: {}", e)))?;
        }

        Ok(doomed.len())
    }

    /// Get message count
    pub fn count(&self) -> usize {
        self.db.len()
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| InboxError::Storage(format!("Failed to flush messages DB: {}", e)))?;
        Ok(())
    }
}

impl Clone for MessageStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}
