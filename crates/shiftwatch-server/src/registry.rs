//! Connection registry: which channels are open for each account, by role.
//!
//! Holds no lock of its own; [`crate::monitor::PresenceMonitor`] owns it
//! alongside presence state under a single mutex.

use std::collections::HashMap;
use std::sync::Arc;

use shiftwatch_core::{AccountId, ConnectionId};

use crate::connection::{ChannelRole, ClientConnection};

#[derive(Default)]
struct AccountChannels {
    primary: Option<Arc<ClientConnection>>,
    secondary: Option<Arc<ClientConnection>>,
}

impl AccountChannels {
    fn slot(&mut self, role: ChannelRole) -> &mut Option<Arc<ClientConnection>> {
        match role {
            ChannelRole::Primary => &mut self.primary,
            ChannelRole::Secondary => &mut self.secondary,
        }
    }

    fn get(&self, role: ChannelRole) -> Option<&Arc<ClientConnection>> {
        match role {
            ChannelRole::Primary => self.primary.as_ref(),
            ChannelRole::Secondary => self.secondary.as_ref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }
}

/// At most one channel per (account, role).
#[derive(Default)]
pub struct ConnectionRegistry {
    accounts: HashMap<AccountId, AccountChannels>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `channel` under (account, role). Last write wins; the superseded
    /// channel is returned but left open.
    pub fn register(
        &mut self,
        account: AccountId,
        role: ChannelRole,
        channel: Arc<ClientConnection>,
    ) -> Option<Arc<ClientConnection>> {
        self.accounts
            .entry(account)
            .or_default()
            .slot(role)
            .replace(channel)
            .filter(|old| old.is_open())
    }

    /// Remove the entry for (account, role), dropping the account once it has no roles.
    pub fn unregister(&mut self, account: &AccountId, role: ChannelRole) -> Option<Arc<ClientConnection>> {
        let channels = self.accounts.get_mut(account)?;
        let removed = channels.slot(role).take();
        if channels.is_empty() {
            let _ = self.accounts.remove(account);
        }
        removed
    }

    /// Unregister only if `connection_id` still owns the slot.
    ///
    /// Returns `false` for a channel that was already superseded.
    pub fn release(&mut self, account: &AccountId, role: ChannelRole, connection_id: &ConnectionId) -> bool {
        if !self.is_current(account, role, connection_id) {
            return false;
        }
        self.unregister(account, role).is_some()
    }

    pub fn is_current(&self, account: &AccountId, role: ChannelRole, connection_id: &ConnectionId) -> bool {
        self.accounts
            .get(account)
            .and_then(|c| c.get(role))
            .is_some_and(|c| &c.id == connection_id)
    }

    /// The primary channel, only if it is still open. This is the prober's target.
    pub fn open_primary(&self, account: &AccountId) -> Option<&Arc<ClientConnection>> {
        self.accounts
            .get(account)
            .and_then(|c| c.primary.as_ref())
            .filter(|c| c.is_open())
    }

    /// Primary if open, else secondary if open. Used for notification delivery.
    pub fn preferred_channel(&self, account: &AccountId) -> Option<Arc<ClientConnection>> {
        let channels = self.accounts.get(account)?;
        channels
            .primary
            .iter()
            .chain(channels.secondary.iter())
            .find(|c| c.is_open())
            .cloned()
    }

    /// Every channel registered for the account, open or not.
    pub fn channels(&self, account: &AccountId) -> Vec<Arc<ClientConnection>> {
        self.accounts
            .get(account)
            .map(|c| c.primary.iter().chain(c.secondary.iter()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_channels(&self, account: &AccountId) -> bool {
        self.accounts.contains_key(account)
    }

    pub fn channel_count(&self) -> usize {
        self.accounts
            .values()
            .map(|c| usize::from(c.primary.is_some()) + usize::from(c.secondary.is_some()))
            .sum()
    }
}
