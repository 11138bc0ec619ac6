use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

/// Decides whether the current user may start a workflow, and ends their
/// session on request. Sign-in itself happens outside the workflow.
pub trait SessionAuthority: Send + Sync {
    fn is_authorized(&self) -> bool;
    fn sign_out(&self) -> Result<()>;
}

/// In-process authority backed by a flag. Used by the CLI and in tests.
#[derive(Debug)]
pub struct StaticAuthority {
    authorized: AtomicBool,
}

impl StaticAuthority {
    pub fn authorized() -> Self {
        Self {
            authorized: AtomicBool::new(true),
        }
    }

    pub fn denied() -> Self {
        Self {
            authorized: AtomicBool::new(false),
        }
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }
}

impl SessionAuthority for StaticAuthority {
    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    fn sign_out(&self) -> Result<()> {
        self.authorized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionAuthority, StaticAuthority};

    #[test]
    fn sign_out_revokes() -> anyhow::Result<()> {
        let authority = StaticAuthority::authorized();
        assert!(authority.is_authorized());
        authority.sign_out()?;
        assert!(!authority.is_authorized());
        authority.set_authorized(true);
        assert!(authority.is_authorized());
        assert!(!StaticAuthority::denied().is_authorized());
        Ok(())
    }
}
