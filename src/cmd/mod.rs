//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `serve`         | `Serve`                                            |
//! | `guide`         | `Guide`                                            |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod guide;
pub mod serve;

pub use config::cmd_config;
pub use guide::cmd_guide;
pub use serve::{ServeOverrides, cmd_serve};
