// crates/intake-api/src/routes/mod.rs
// ============================================================================
// Module: HTTP Routes
// Description: Route handler groups for the job intake surface.
// ============================================================================

pub mod health;
pub mod jobs;
