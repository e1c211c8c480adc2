//! Domain core of a laboratory sample-tracking application.
//!
//! Everything revolves around collections of physical samples: who may see
//! or change them ([`security`]), how samples derive from one another
//! through splits and combinations ([`db::model::sample`]), how users prove
//! control of their addresses and accounts ([`db::model::verification`]),
//! and how much storage their attachments consume
//! ([`db::model::attachment`]).
//!
//! The crate is synchronous and self-contained. Time, mail delivery, and
//! thumbnail rendering are injected collaborators; persistence is the
//! in-process transactional store in [`db::store`].

pub mod config;
pub mod db;
pub mod mail;
pub mod security;
pub mod util;
pub mod validators;
