//! Selected-account tracking.
//!
//! At most one account is selected at a time; it is the only account whose
//! key material may be used for signing, and every completion re-verifies
//! the passphrase against the keystore at the moment of signing.

use std::sync::Mutex;

use embergate_types::{Address, GatewayError, Result};
use k256::ecdsa::SigningKey;

use crate::keystore::KeyStore;

// ---------------------------------------------------------------------------
// SelectedAccount
// ---------------------------------------------------------------------------

/// The currently unlocked signing identity.
#[derive(Clone)]
pub struct SelectedAccount {
    /// Address of the selected account.
    pub address: Address,
    /// Decrypted signing key; zeroized when the last clone drops.
    pub key: SigningKey,
}

// ---------------------------------------------------------------------------
// AccountSelector
// ---------------------------------------------------------------------------

/// Globally shared selected-account slot.
///
/// Mutates only via [`select`](Self::select) and
/// [`logout`](Self::logout); readers get a cloned snapshot so the lock is
/// never held across signing or I/O.
#[derive(Default)]
pub struct AccountSelector {
    inner: Mutex<Option<SelectedAccount>>,
}

impl AccountSelector {
    /// Creates an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unlocks `address` with `password` and makes it the selected
    /// account, replacing any previous selection.
    pub fn select(
        &self,
        keystore: &dyn KeyStore,
        address: Address,
        password: &str,
    ) -> Result<()> {
        let unlocked = keystore.unlock(address, password)?;
        let mut slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(SelectedAccount {
            address: unlocked.address,
            key: unlocked.key,
        });
        Ok(())
    }

    /// Returns a snapshot of the selected account.
    ///
    /// # Errors
    ///
    /// [`GatewayError::AccountNotSelected`] if nothing is selected.
    pub fn selected(&self) -> Result<SelectedAccount> {
        let slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        slot.clone().ok_or(GatewayError::AccountNotSelected)
    }

    /// Returns the selected address without exposing key material.
    pub fn selected_address(&self) -> Option<Address> {
        let slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        slot.as_ref().map(|account| account.address)
    }

    /// Clears the selection, dropping the decrypted key.
    pub fn logout(&self) {
        let mut slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::DirKeyStore;

    #[test]
    fn select_then_logout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirKeyStore::new(dir.path());
        let address = store.create_account("pw").expect("create");

        let selector = AccountSelector::new();
        assert!(matches!(
            selector.selected(),
            Err(GatewayError::AccountNotSelected),
        ));

        selector.select(&store, address, "pw").expect("select");
        assert_eq!(selector.selected_address(), Some(address));
        assert_eq!(selector.selected().expect("selected").address, address);

        selector.logout();
        assert_eq!(selector.selected_address(), None);
    }

    #[test]
    fn select_with_wrong_password_keeps_previous_selection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirKeyStore::new(dir.path());
        let first = store.create_account("pw1").expect("create");
        let second = store.create_account("pw2").expect("create");

        let selector = AccountSelector::new();
        selector.select(&store, first, "pw1").expect("select");

        let err = selector
            .select(&store, second, "wrong")
            .expect_err("must fail");
        assert!(matches!(err, GatewayError::InvalidPassword));
        assert_eq!(selector.selected_address(), Some(first));
    }

    #[test]
    fn reselect_replaces_account() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirKeyStore::new(dir.path());
        let first = store.create_account("pw1").expect("create");
        let second = store.create_account("pw2").expect("create");

        let selector = AccountSelector::new();
        selector.select(&store, first, "pw1").expect("select");
        selector.select(&store, second, "pw2").expect("reselect");
        assert_eq!(selector.selected_address(), Some(second));
    }
}
