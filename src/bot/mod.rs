//! Welcome bot logic.
//!
//! Startup provisioning, the incoming-message handler with its per-chat
//! welcome record, and the operator diagnostics banner.

mod controller;
mod diagnostics;
mod store;

pub use controller::{StartupError, WelcomeBot, bring_online, resolve_account};
pub use diagnostics::print_contact_banner;
pub use store::WelcomeStore;
