use std::sync::{Mutex, Weak};

use uuid::Uuid;

use crate::connection::Connection;
use crate::errors::Result;
use crate::properties::SelectionProperties;

/// A membership set of connections sharing a properties template.
/// Members are held weakly: a connection leaving the group (dropping)
/// removes itself without requiring cooperation from other holders.
pub struct ConnectionGroup {
    members: Mutex<Vec<(Uuid, Weak<Connection>)>>,
    pub properties_template: SelectionProperties,
}

impl ConnectionGroup {
    pub fn new(properties_template: SelectionProperties) -> Self {
        ConnectionGroup {
            members: Mutex::new(Vec::new()),
            properties_template,
        }
    }

    /// Adding a connection is idempotent.
    pub fn add(&self, conn: &std::sync::Arc<Connection>) {
        let mut members = self.members.lock().unwrap();
        if members.iter().any(|(id, _)| *id == conn.id()) {
            return;
        }
        members.push((conn.id(), std::sync::Arc::downgrade(conn)));
    }

    /// Current live membership, pruning any connection that has already
    /// been dropped.
    pub fn members(&self) -> Vec<std::sync::Arc<Connection>> {
        let mut members = self.members.lock().unwrap();
        members.retain(|(_, weak)| weak.strong_count() > 0);
        members.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    pub fn len(&self) -> usize {
        self.members()
            .into_iter()
            .filter(|c| c.state() != crate::state::ConnectionState::Closed)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fans `close()` out to every current member. Idempotent; does not
    /// fail if members have already closed.
    pub async fn close_group(&self) -> Result<()> {
        for conn in self.members() {
            conn.close().await?;
        }
        Ok(())
    }

    /// Fans `abort()` out to every current member. Idempotent.
    pub async fn abort_group(&self) -> Result<()> {
        for conn in self.members() {
            conn.abort().await?;
        }
        Ok(())
    }
}
