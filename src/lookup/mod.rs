// SPDX-License-Identifier: GPL-3.0-or-later

//! The destination-resolver capability (spec §4.2): given an accepted,
//! redirected connection, recover the original pre-redirection destination.

pub mod redirect;

use std::{net::SocketAddr, sync::Arc};

use once_cell::sync::OnceCell;
use tokio::net::TcpStream;

use crate::error::{LookupError, RegistryError};

/// Capability that recovers the original destination of a redirected,
/// already-accepted TCP socket.
///
/// Exactly one implementation is active per process (see [`LookupRegistry`]);
/// the trait itself has no such restriction, which is what makes it usable
/// directly in tests without going through the registry at all.
pub trait OrigDestLookup: Send + Sync {
    /// Recovers the original destination of `socket`.
    fn resolve(&self, socket: &TcpStream) -> Result<SocketAddr, LookupError>;

    /// Human-readable name, used only for logging.
    fn name(&self) -> &str;
}

struct Registered {
    name: String,
    lookup: Arc<dyn OrigDestLookup>,
}

/// Process-wide, single-slot registry of named [`OrigDestLookup`]
/// implementations.
///
/// This single-slot design is, per the Design Notes, an artifact carried
/// over from the original C global — a modern port would simply hand the
/// listener an `Arc<dyn OrigDestLookup>` directly. It is kept here only
/// because [`crate::cfg::config::Config`] selects the active backend by
/// name at startup, which is exactly the case the Design Notes call out as
/// still warranting a name-based registry.
pub struct LookupRegistry {
    slot: OnceCell<Registered>,
}

impl LookupRegistry {
    pub const fn new() -> Self {
        Self { slot: OnceCell::new() }
    }

    /// Registers `lookup` under `name`. Fails if a backend is already
    /// registered — the registry accepts exactly one, ever, for the
    /// lifetime of the process.
    pub fn register(
        &self,
        name: impl Into<String>,
        lookup: Arc<dyn OrigDestLookup>,
    ) -> Result<(), RegistryError> {
        self.slot
            .set(Registered { name: name.into(), lookup })
            .map_err(|_| RegistryError::AlreadyRegistered)
    }

    /// Succeeds only if `name` equals the currently registered name,
    /// returning a clone of the registered implementation to the caller.
    pub fn switchto(&self, name: &str) -> Result<Arc<dyn OrigDestLookup>, RegistryError> {
        match self.slot.get() {
            Some(r) if r.name == name => Ok(Arc::clone(&r.lookup)),
            Some(_) | None => Err(RegistryError::NameMismatch(name.to_string())),
        }
    }
}

impl Default for LookupRegistry {
    fn default() -> Self {
        Self::new()
    }
}
