//! Contract Tests - Pool and Supervisor Invariant Protection
//!
//! This file aggregates all contract test modules.
//! Contract tests verify invariants that MUST NEVER BREAK.

// Contract test modules
mod contracts {
    // Port pool contracts
    mod port_pool {
        include!("port_pool_contracts.rs");
    }

    // Process supervisor contracts
    mod process_supervisor {
        include!("process_supervisor_contracts.rs");
    }
}
