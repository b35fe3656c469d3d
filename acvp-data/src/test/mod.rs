//! Fixtures shared by the unit tests of this crate and the tests of dependent crates.
