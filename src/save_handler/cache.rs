//! Redis-backed save handler.
//!
//! Sessions are stored with a TTL equal to the gc lifetime, so Redis expires
//! them itself and [`SaveHandler::gc`] has nothing to do.

use log::{debug, info};
use redis::{Client as RedisClient, Commands, Connection};

use super::SaveHandler;
use crate::error::SaveHandlerError;

/// Redis key prefix for session blobs
pub const REDIS_SESSION_PREFIX: &str = "session:";

pub struct CacheSaveHandler {
    client: RedisClient,
    connection: Option<Connection>,
    session_name: String,
    lifetime: u64,
}

impl CacheSaveHandler {
    pub fn new(client: RedisClient, lifetime: u64) -> Self {
        Self {
            client,
            connection: None,
            session_name: String::new(),
            lifetime,
        }
    }

    pub fn from_url(url: &str, lifetime: u64) -> Result<Self, SaveHandlerError> {
        Ok(Self::new(RedisClient::open(url)?, lifetime))
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}:{}", REDIS_SESSION_PREFIX, self.session_name, id)
    }

    fn connection(&mut self) -> Result<&mut Connection, SaveHandlerError> {
        self.connection.as_mut().ok_or(SaveHandlerError::NotOpen)
    }
}

impl SaveHandler for CacheSaveHandler {
    fn open(&mut self, _save_path: &str, session_name: &str) -> Result<bool, SaveHandlerError> {
        self.connection = Some(self.client.get_connection()?);
        self.session_name = session_name.to_string();
        info!("Opened Redis session cache for {}", session_name);
        Ok(true)
    }

    fn close(&mut self) -> Result<bool, SaveHandlerError> {
        self.connection = None;
        Ok(true)
    }

    fn read(&mut self, id: &str) -> Result<String, SaveHandlerError> {
        let key = self.key(id);
        let data: Option<String> = self.connection()?.get(&key)?;
        Ok(data.unwrap_or_default())
    }

    fn write(&mut self, id: &str, data: &str) -> Result<bool, SaveHandlerError> {
        let key = self.key(id);
        let lifetime = self.lifetime;
        let _: () = self.connection()?.set_ex(&key, data, lifetime)?;
        debug!("Wrote session {} with TTL {}s", key, lifetime);
        Ok(true)
    }

    fn destroy(&mut self, id: &str) -> Result<bool, SaveHandlerError> {
        let key = self.key(id);
        let _: () = self.connection()?.del(&key)?;
        Ok(true)
    }

    fn gc(&mut self, _max_lifetime: u64) -> Result<bool, SaveHandlerError> {
        Ok(true)
    }
}
