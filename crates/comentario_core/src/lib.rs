/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod authsessions;
pub mod cleanup;
pub mod comments;
pub mod config_store;
pub mod db;
pub mod domains;
pub mod error;
pub mod mail;
pub mod markdown;
pub mod pages;
pub mod perlustration;
pub mod tokens;
pub mod users;
pub mod util;

pub use error::{Error, Result};
