//! One handler per IMAP command.

mod capability;
mod fetch;
mod list;
mod login;
mod logout;
mod noop;

pub use capability::handle_capability;
pub use fetch::handle_fetch;
pub use list::handle_list;
pub use login::handle_login;
pub use logout::handle_logout;
pub use noop::handle_noop;
pub use select::handle_select;
