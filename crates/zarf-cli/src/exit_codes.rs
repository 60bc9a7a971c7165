//! Exit codes per verb
//!
//! Every verb exits 0 on success. The non-zero codes are part of the CLI
//! contract and are stable per verb.

#![allow(dead_code)]

pub const SUCCESS: i32 = 0;

// package create
pub const CREATE_VALIDATION: i32 = 1;
pub const CREATE_BUILD: i32 = 2;
pub const CREATE_SIGNING: i32 = 3;

// package deploy
pub const DEPLOY_LOAD: i32 = 1;
pub const DEPLOY_FAILED: i32 = 2;
pub const DEPLOY_WAIT_TIMEOUT: i32 = 3;

// package inspect
pub const INSPECT_LOAD: i32 = 1;

// package mirror-resources
pub const MIRROR_PUSH: i32 = 1;

// package remove
pub const REMOVE_MISSING: i32 = 1;

// connect
pub const CONNECT_FAILED: i32 = 1;

// dev update-schema
pub const SCHEMA_UNMIGRATABLE: i32 = 1;
