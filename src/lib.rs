//! Drives embedded boards over serial links: write a command, wait for the line that proves it
//! worked, across several boards on one timeline.
//!
//! The layers build on each other:
//! [`communication`] owns the ports, [`expectation`] waits for output, [`session`] gives the
//! per-device `write`/`expect` API, [`scenario`] scripts multi-device interactions and
//! [`runner`] ties a whole run together and decides the exit code. Every pause goes through a
//! [`sleeper::Sleeper`].

pub mod communication;
pub mod config;
pub mod expectation;
pub mod logging;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod sleeper;
