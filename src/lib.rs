//! `meshlink`: a two-tier message routing overlay.
//!
//! See `rtp` for the implementation.

pub mod rtp;
