//! Utility
mod binary_heap;
mod ring;

pub(crate) use self::{binary_heap::*, ring::*};
