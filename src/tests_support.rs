//! Shared fixture for unit tests across modules (spec §10): installs
//! [`crate::NullHost`] once per process, mirroring the teacher's own
//! `src/tests.rs`, which builds one fixed `Kernel` fixture that every
//! test function in the crate reaches for.

use crate::{NullHost, Runtime};

pub(crate) struct Fixture;

impl Fixture {
    pub(crate) fn install() -> Self {
        Runtime::install(NullHost);
        Fixture
    }
}
