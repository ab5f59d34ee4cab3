#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate tracing;

use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use entity::Entity;
use relay_protocol::RelayError;

pub mod entity;
pub mod settings;
pub mod store;

#[derive(Debug)]
pub enum StoreError {
    Database(sled::Error),
    Relay(RelayError),
    Serialization(serde_json::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<RelayError> for StoreError {
    fn from(err: RelayError) -> Self {
        StoreError::Relay(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl std::error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::Database(err) => write!(fmt, "session database error : {}", err),
            StoreError::Relay(err) => write!(fmt, "session relay error : {}", err),
            StoreError::Serialization(err) => write!(fmt, "session serialization error : {}", err),
        }
    }
}

/// An embedded key-value database, one tree per [`Entity::COLLECTION`].
#[derive(Clone, Debug)]
pub struct Database {
    inner: sled::Db,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let inner = sled::open(path)?;
        Ok(Database { inner })
    }

    /// A database removed from disk once dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let inner = sled::Config::new().temporary(true).open()?;
        Ok(Database { inner })
    }

    pub fn insert<T>(&self, entity: &T) -> Result<(), StoreError>
    where
        T: Sized + Entity + Serialize,
    {
        let json = serde_json::to_string(entity)?;

        debug!("Inserting entity {}:", json);

        self.inner
            .open_tree(T::COLLECTION)?
            .insert(entity.get_key(), json.as_bytes())?;

        Ok(())
    }

    pub fn get_all<T>(&self) -> Result<Vec<T>, StoreError>
    where
        T: Entity + DeserializeOwned,
    {
        let tree = self.inner.open_tree(T::COLLECTION)?;
        let mut entities = vec![];

        for entry in tree.iter() {
            let (key, value) = entry?;
            match serde_json::from_slice(&value) {
                Ok(entity) => entities.push(entity),
                Err(err) => warn!(
                    "Skipping unreadable {} entry {:?} : {}",
                    T::COLLECTION,
                    String::from_utf8_lossy(&key),
                    err
                ),
            }
        }

        Ok(entities)
    }

    pub fn get_by_key<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: Entity + DeserializeOwned,
    {
        let raw = self.inner.open_tree(T::COLLECTION)?.get(key)?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Remove an entity, returns true if it existed.
    pub fn remove<T>(&self, key: &str) -> Result<bool, StoreError>
    where
        T: Entity,
    {
        let previous = self.inner.open_tree(T::COLLECTION)?.remove(key)?;
        Ok(previous.is_some())
    }
}
