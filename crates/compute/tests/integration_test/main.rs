/// Integration tests for the voltwatch pipeline covering the end-to-end spike
/// scenario, batch skipping, report filtering and model store round trips.

mod batch;
mod e2e;
mod helpers;
mod store;
