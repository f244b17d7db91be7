#![allow(dead_code)]

pub mod fake_node;
pub mod fixtures;
pub mod invoice;
