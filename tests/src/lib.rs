//! # V2X Safety Stack Test Suite
//!
//! Unified test crate for behavior that spans components.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── scenarios.rs    # LDM growth, window wraparound, permits, flooding
//!     └── end_to_end.rs   # Two stacks talking over UDP loopback
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p its-tests
//! cargo test -p its-tests integration::end_to_end
//! ```

pub mod integration;
