pub mod hasher;
pub mod key;
