use std::fmt::Debug;
use std::sync::Arc;

use relay_protocol::client::RelayClient;

use crate::entity::session::{unix_now, Session};
use crate::{Database, StoreError};

/// Shared handle on the session store selected at startup.
pub type Store = Arc<dyn SessionStore>;

/// Where sessions live. Expired sessions are never returned by [`SessionStore::load`].
#[async_trait]
pub trait SessionStore: Debug + Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Insert or replace the session, pushing its expiry forward.
    async fn save(&self, session: &mut Session) -> Result<(), StoreError>;

    async fn destroy(&self, id: &str) -> Result<(), StoreError>;

    /// Issue a new session identifier, carrying the display name of `previous` over and
    /// destroying it.
    async fn regenerate(&self, previous: Option<&str>) -> Result<Session, StoreError> {
        let user = match previous {
            Some(id) => {
                let user = self.load(id).await?.and_then(|session| session.user);
                self.destroy(id).await?;
                user
            }
            None => None,
        };

        let mut session = Session::new(user);
        self.save(&mut session).await?;
        Ok(session)
    }
}

/// Sessions stored in the local embedded [`Database`], only visible to this process.
#[derive(Debug, Clone)]
pub struct LocalSessionStore {
    db: Database,
    ttl_secs: u32,
}

impl LocalSessionStore {
    pub fn new(db: Database, ttl_secs: u32) -> Self {
        LocalSessionStore { db, ttl_secs }
    }

    /// Remove every expired session, returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = unix_now();
        let mut purged = 0;

        for session in self.db.get_all::<Session>()? {
            if session.is_expired(now) && self.db.remove::<Session>(&session.id)? {
                purged += 1;
            }
        }

        Ok(purged)
    }
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        match self.db.get_by_key::<Session>(id)? {
            Some(session) if session.is_expired(unix_now()) => {
                debug!("Session {} expired", id);
                self.db.remove::<Session>(id)?;
                Ok(None)
            }
            session => Ok(session),
        }
    }

    async fn save(&self, session: &mut Session) -> Result<(), StoreError> {
        session.touch(self.ttl_secs);
        self.db.insert(session)
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        self.db.remove::<Session>(id).map(|_| ())
    }
}

/// Sessions stored in the relay broker key space, shared by every chat server connected to it.
#[derive(Debug, Clone)]
pub struct RelaySessionStore {
    client: RelayClient,
    ttl_secs: u32,
}

impl RelaySessionStore {
    pub fn new(client: RelayClient, ttl_secs: u32) -> Self {
        RelaySessionStore { client, ttl_secs }
    }

    fn key(id: &str) -> String {
        format!("sess:{}", id)
    }
}

#[async_trait]
impl SessionStore for RelaySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        match self.client.get(&RelaySessionStore::key(id)).await? {
            Some(raw) => {
                let session: Session = serde_json::from_str(&raw)?;
                // The broker expires keys itself, this only guards against clock skew
                if session.is_expired(unix_now()) {
                    Ok(None)
                } else {
                    Ok(Some(session))
                }
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session: &mut Session) -> Result<(), StoreError> {
        session.touch(self.ttl_secs);
        let json = serde_json::to_string(session)?;
        self.client
            .set(&RelaySessionStore::key(&session.id), json, self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        self.client.delete(&RelaySessionStore::key(id)).await?;
        Ok(())
    }
}
