//! Concrete guided workflows.

pub mod box_checking;
