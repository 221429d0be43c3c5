// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod export;
pub mod filter;
pub mod model;
pub mod snapshot;
pub mod state;

pub use export::*;
pub use filter::*;
pub use model::*;
pub use snapshot::*;
pub use state::*;
