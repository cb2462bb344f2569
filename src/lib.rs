//! # Helpdesk Portal Client
//!
//! Client library for an internal helpdesk web portal with a
//! session-authenticated HTML/JSON hybrid backend.
//!
//! This library provides:
//! - A blocking [`PortalClient`] holding one authenticated session and
//!   exposing one typed method per portal action: list tasks, start a task
//!   timer, prepare and commit a close, add a task, search task types
//! - Pure parsers turning the portal's server-rendered markup into record
//!   types ([`Task`], [`TaskWait`], [`Initiator`], ...)
//! - A closed [`Error`] taxonomy covering transport faults, server banners,
//!   and business-rule rejections
//!
//! ## Session flow
//! 1. Build a client with credentials
//! 2. `authorization()` — extracts the user id and session CSRF token
//! 3. Call task operations; [`Error::SessionExpired`] means the portal
//!    dropped the session and `authorization()` must run again
//!
//! Closing a task is a two-step exchange: `prepare_task_for_close` fetches
//! a single-use CSRF token and opens a ten-minute window in which
//! `close_task` must commit.
//!
//! The client is synchronous and single-session; callers serialize access
//! to an instance themselves.
//!
//! ## Modules
//! - `client`: session client and transport primitives
//! - `parse`: markup parsers
//! - `types`: record types
//! - `error`: error taxonomy

pub mod client;
pub mod error;
pub mod parse;
pub mod types;

pub use client::{ClientOptions, PortalClient};
pub use error::{Error, Result};
pub use types::{
    CloseChoice, CloseFollowUp, CommentType, Initiator, Task, TaskResponse, TaskType,
    TaskTypesGroup, TaskWait, TasksList,
};
