//! HTTP service that accepts food photo uploads and returns a structured
//! nutrition estimate produced by an upstream vision model.

pub mod auth;
pub mod decision;
pub mod handlers;
