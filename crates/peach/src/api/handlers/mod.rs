//! API request handlers, organized by domain:
//! - `environments`: environment resolution, lookup and layout
//! - `terminal`: terminal session initiation
//! - `files`: workspace file and directory operations
//! - `misc`: health check

mod environments;
mod extract;
mod files;
mod misc;
mod terminal;

pub use environments::{create_environment, get_environment, update_layout};
pub use extract::FormOrJson;
pub use files::{
    create_directory, create_file, delete_directory, delete_file, get_pdf, move_directory,
    move_file,
};
pub use misc::health;
pub use terminal::init_terminal;
