//! Centralized defaults, mirroring the teacher's `constants` module so a
//! single place governs the numbers that would otherwise be copy-pasted
//! across `tenant.rs`, `resolver.rs`, and the orchestrator.

/// Default tenant config cache TTL before a resolved `TenantConfig` is
/// considered stale and re-resolved from the backing store.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Hard ceiling applied regardless of tenant override, preventing a
/// misconfigured tenant from requesting an unbounded context window.
pub const MAX_CONTEXT_TOKENS_CEILING: usize = 32_000;

/// Hard floor on `k_base` — retrieval with fewer than this many candidates
/// is not considered meaningful fan-out.
pub const MIN_K_BASE: usize = 1;

pub const DEFAULT_LANGUAGE: &str = "en";
