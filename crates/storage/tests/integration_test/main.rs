/// Integration tests for the filesystem model store: save/load round trips,
/// listing, removal and registry loading.

mod helpers;
mod store_ops;
