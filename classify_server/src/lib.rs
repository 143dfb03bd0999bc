//! Live image classification of a webcam stream or uploaded images, shown in
//! the browser.
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

pub mod capture;
pub mod config;
pub mod controller;
pub mod devices;
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod model_gate;
pub mod nn;
pub mod presenter;
pub mod pubsub;
pub mod sensors;
pub mod utils;

pub fn hashed(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}
