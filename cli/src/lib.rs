//! Image Warden CLI library.

pub mod commands;
