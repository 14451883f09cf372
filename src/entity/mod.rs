//! Database entity models.
//!
//! Two tables back the service: `users`, owned by the credential store, and
//! `sessions`, owned exclusively by the session store.

/// Session rows persisted for authenticated clients.
pub mod session;

/// User records checked at login and listed by the restricted endpoint.
pub mod user;
