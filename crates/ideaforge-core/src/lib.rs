//! Routing logic and trait definitions for IdeaForge.
//!
//! This crate defines the ports the infrastructure layer implements
//! (`ProviderAdapter`, `ResponseCache`, `SecretProvider`) and the router that
//! drives them. It depends only on `ideaforge-types` -- never on
//! `ideaforge-infra` or any HTTP/database crate.

pub mod budget;
pub mod cache;
pub mod provider;
pub mod rate_limit;
pub mod router;
pub mod secret;
pub mod selector;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its counters consistent,
/// so a poisoned lock still guards valid state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
