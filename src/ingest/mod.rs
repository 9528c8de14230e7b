pub mod hasher;
pub mod register;
